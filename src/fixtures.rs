#[cfg(test)]
pub mod test {
    use confique::Config;
    use serde::{Deserialize, Serialize};

    use crate::schema::{FieldInfo, Schema};
    use crate::tree::Node;

    #[derive(Config, Serialize, Deserialize, Debug, PartialEq)]
    pub struct TestConfig {
        /// The application host.
        #[config(default = "localhost")]
        pub host: String,

        /// The port number.
        #[config(default = 8080)]
        pub port: u16,

        /// Enable debug mode.
        #[config(default = false)]
        pub debug: bool,

        /// Key for the upstream API.
        pub api_key: String,

        /// Database settings.
        #[config(nested)]
        pub database: TestDbConfig,
    }

    #[derive(Config, Serialize, Deserialize, Debug, PartialEq)]
    pub struct TestDbConfig {
        /// Connection string URL.
        pub url: Option<String>,

        /// Connection pool size.
        #[config(default = 5)]
        pub pool_size: usize,
    }

    #[test]
    fn test_config_needs_api_key() {
        assert!(TestConfig::builder().load().is_err());
    }

    // -- Plain serde types ------------------------------------------------------

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    pub struct Person {
        pub first_name: String,
        #[serde(default)]
        pub age: u32,
        #[serde(default)]
        pub email: Option<String>,
    }

    /// Hand-written schema for [`Person`].
    pub struct PersonSchema;

    impl Schema for PersonSchema {
        type Target = Person;

        fn fields() -> Vec<FieldInfo> {
            vec![
                FieldInfo::required("first_name").describe("Given name"),
                FieldInfo::with_default("age", 0),
                FieldInfo::optional("email"),
            ]
        }
    }

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    pub struct Server {
        pub url: String,
        pub port: u16,
    }

    impl Default for Server {
        fn default() -> Self {
            Self {
                url: "http://default".into(),
                port: 8080,
            }
        }
    }

    // -- Trees ------------------------------------------------------------------

    /// `{a: {b: 3}, root: R, b: true, num: 5, home: /home}`
    pub fn sample_tree() -> Node {
        Node::parse_yaml("a: {b: 3}\nroot: R\nb: true\nnum: 5\nhome: /home").unwrap()
    }
}
