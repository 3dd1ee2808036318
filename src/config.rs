//! The configuration facade: one merged tree plus helpers and type bindings.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::convert::{TypeRegistry, convert_to};
use crate::env::Env;
use crate::error::LayerfigError;
use crate::interpolate::{Resolver, Resolvers};
use crate::merge::merge_nodes;
use crate::schema::{ConfiqueSchema, Schema, default_tree};
use crate::tree::{self, Node};

/// A merged configuration tree with typed, resolved access.
///
/// Sources are merged in with the `setup_*` methods; later calls override
/// earlier ones key by key. Values are resolved (interpolated) on read and
/// the results cached until the next merge.
pub struct Configuration {
    tree: Node,
    helpers: IndexMap<String, String>,
    type_paths: HashMap<TypeId, Option<String>>,
    resolvers: Resolvers,
    converters: TypeRegistry,
    env: Env,
    node_cache: RwLock<HashMap<String, Node>>,
    type_cache: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Configuration {
    /// Deep copy of the tree, helpers and type bindings. Caches start empty.
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            helpers: self.helpers.clone(),
            type_paths: self.type_paths.clone(),
            resolvers: self.resolvers.clone(),
            converters: self.converters.clone(),
            env: self.env.clone(),
            node_cache: RwLock::new(HashMap::new()),
            type_cache: RwLock::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("tree", &self.tree)
            .field("helpers", &self.helpers)
            .field("resolvers", &self.resolvers)
            .finish_non_exhaustive()
    }
}

impl Configuration {
    /// An empty configuration reading the process environment.
    pub fn new() -> Self {
        Self {
            tree: Node::mapping(),
            helpers: IndexMap::new(),
            type_paths: HashMap::new(),
            resolvers: Resolvers::default(),
            converters: TypeRegistry::default(),
            env: Env::real(),
            node_cache: RwLock::new(HashMap::new()),
            type_cache: RwLock::new(HashMap::new()),
        }
    }

    /// An independent copy to build on; changes to either side are not seen
    /// by the other.
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// Replace the environment used by `${env:...}` and environment loading.
    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self.clear_caches();
        self
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The raw merged tree, interpolations unevaluated.
    pub fn tree(&self) -> &Node {
        &self.tree
    }

    /// Key path → description, for help output.
    pub fn helpers(&self) -> &IndexMap<String, String> {
        &self.helpers
    }

    pub fn register_resolver<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&str, &mut Resolver<'_>) -> Result<Node, LayerfigError> + Send + Sync + 'static,
    {
        self.resolvers.register(name, function);
        self.clear_caches();
    }

    pub fn register_converter<T, F>(&mut self, converter: F)
    where
        T: Any + Send,
        F: Fn(&Node) -> Result<T, String> + Send + Sync + 'static,
    {
        self.converters.register::<T, F>(converter);
        self.clear_caches();
    }

    // -- Setup ------------------------------------------------------------------

    /// Merge a configuration mapping at the root.
    pub fn setup_configuration(&mut self, conf: Node) -> Result<(), LayerfigError> {
        self.merge_in(conf, Vec::new(), "")
    }

    /// Merge a configuration mapping under `prefix` (dotted, empty = root)
    /// along with helper descriptions keyed relative to `conf`.
    pub fn setup_with<K, V>(
        &mut self,
        conf: Node,
        helpers: impl IntoIterator<Item = (K, V)>,
        prefix: &str,
    ) -> Result<(), LayerfigError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let helpers = helpers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.merge_in(conf, helpers, prefix)
    }

    /// Merge the defaults of a schema under `prefix` and bind its target type
    /// there.
    pub fn setup_schema<S: Schema>(&mut self, prefix: &str) -> Result<(), LayerfigError> {
        let fields = S::fields();
        if fields.is_empty() {
            return Err(LayerfigError::InvalidConfiguration(format!(
                "schema {} has no fields",
                type_name::<S::Target>()
            )));
        }
        let (defaults, helpers) = default_tree(&fields);
        self.merge_in(defaults, helpers, prefix)?;
        self.bind_type::<S::Target>(prefix);
        Ok(())
    }

    /// [`setup_schema`](Self::setup_schema) for a confique config struct.
    pub fn setup_config<C: confique::Config + 'static>(
        &mut self,
        prefix: &str,
    ) -> Result<(), LayerfigError> {
        self.setup_schema::<ConfiqueSchema<C>>(prefix)
    }

    /// Merge a serializable instance under `prefix` and bind its type there.
    pub fn setup_value<T: Serialize + 'static>(
        &mut self,
        value: &T,
        prefix: &str,
    ) -> Result<(), LayerfigError> {
        let conf = Node::from_serialize(value)
            .map_err(|e| LayerfigError::InvalidConfiguration(e.to_string()))?;
        self.merge_in(conf, Vec::new(), prefix)?;
        self.bind_type::<T>(prefix);
        Ok(())
    }

    fn merge_in(
        &mut self,
        conf: Node,
        helpers: Vec<(String, String)>,
        prefix: &str,
    ) -> Result<(), LayerfigError> {
        let conf = match conf {
            Node::Mapping(map) if !map.is_empty() => tree::normalize_keys(Node::Mapping(map)),
            Node::Mapping(_) => {
                return Err(LayerfigError::InvalidConfiguration(
                    "configuration is empty".into(),
                ));
            }
            other => {
                return Err(LayerfigError::InvalidConfiguration(format!(
                    "expected a mapping, found a {}",
                    other.type_name()
                )));
            }
        };

        for (key, _) in &helpers {
            let first = tree::parse_path(key)?
                .first()
                .map(tree::Segment::as_key)
                .unwrap_or_default();
            let known = conf
                .as_mapping()
                .is_some_and(|map| map.contains_key(&first));
            if !known {
                return Err(LayerfigError::InvalidHelper(key.clone()));
            }
        }

        let mounted = tree::mount(prefix, conf)?;
        self.merge_source(mounted);
        for (key, description) in helpers {
            let key = if prefix.is_empty() {
                key
            } else {
                format!("{prefix}.{key}")
            };
            self.helpers.insert(key, description);
        }
        Ok(())
    }

    /// Merge an already normalized tree on top, skipping validation. Empty
    /// fragments are ignored.
    pub(crate) fn merge_source(&mut self, node: Node) {
        if node.as_mapping().is_some_and(|m| m.is_empty()) {
            return;
        }
        let base = std::mem::take(&mut self.tree);
        self.tree = merge_nodes(base, node);
        self.clear_caches();
    }

    fn bind_type<T: 'static>(&mut self, prefix: &str) {
        let id = TypeId::of::<T>();
        match self.type_paths.get(&id) {
            None => {
                self.type_paths.insert(id, Some(prefix.to_string()));
            }
            Some(Some(existing)) if existing != prefix => {
                tracing::debug!(
                    r#type = type_name::<T>(),
                    first = %existing,
                    second = %prefix,
                    "type registered at two paths; type lookup disabled"
                );
                self.type_paths.insert(id, None);
            }
            Some(_) => {}
        }
    }

    fn clear_caches(&mut self) {
        self.node_cache.get_mut().clear();
        self.type_cache.get_mut().clear();
    }

    // -- Reads ------------------------------------------------------------------

    /// The resolved node at `key`.
    ///
    /// Absent keys are [`LayerfigError::KeyNotFound`]; a mandatory value that
    /// was never supplied is [`LayerfigError::MissingMandatoryValue`].
    pub fn get_node(&self, key: &str) -> Result<Node, LayerfigError> {
        if let Some(node) = self.node_cache.read().get(key) {
            return Ok(node.clone());
        }
        let node = Resolver::new(&self.tree, &self.resolvers, &self.env)
            .resolve(key)?
            .ok_or_else(|| LayerfigError::KeyNotFound(key.to_string()))?;
        self.node_cache.write().insert(key.to_string(), node.clone());
        Ok(node)
    }

    /// The resolved value at `key` converted to `T`.
    pub fn get<T: DeserializeOwned + Any>(&self, key: &str) -> Result<T, LayerfigError> {
        let node = self.get_node(key)?;
        convert_to(&node, &self.converters, key)
    }

    /// `None` when the key is absent, mandatory-missing or null.
    pub fn get_opt<T: DeserializeOwned + Any>(&self, key: &str) -> Result<Option<T>, LayerfigError> {
        match self.get_node(key) {
            Ok(Node::Null) => Ok(None),
            Ok(node) => convert_to(&node, &self.converters, key).map(Some),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `default` when the key is absent or mandatory-missing. A null value is
    /// converted like any other, so `Option<T>` reads it as `None`.
    pub fn get_or<T: DeserializeOwned + Any>(&self, key: &str, default: T) -> Result<T, LayerfigError> {
        match self.get_node(key) {
            Ok(node) => convert_to(&node, &self.converters, key),
            Err(e) if e.is_missing() => Ok(default),
            Err(e) => Err(e),
        }
    }

    /// The value of the type bound by `setup_schema`/`setup_value`.
    pub fn get_type<T>(&self) -> Result<T, LayerfigError>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let id = TypeId::of::<T>();
        if let Some(value) = self.type_cache.read().get(&id)
            && let Some(value) = value.downcast_ref::<T>()
        {
            return Ok(value.clone());
        }
        let path = match self.type_paths.get(&id) {
            Some(Some(path)) => path.clone(),
            Some(None) => return Err(LayerfigError::AmbiguousType(type_name::<T>())),
            None => return Err(LayerfigError::TypeNotRegistered(type_name::<T>())),
        };
        let value: T = self.get(&path)?;
        self.type_cache.write().insert(id, Box::new(value.clone()));
        Ok(value)
    }

    /// [`get_type`](Self::get_type), falling back to `default` when a value is
    /// missing.
    pub fn get_type_or<T>(&self, default: T) -> Result<T, LayerfigError>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        match self.get_type::<T>() {
            Err(e) if e.is_missing() => Ok(default),
            other => other,
        }
    }

    /// Extract a confique config struct at `key` (empty = root). confique
    /// fills defaults for absent fields and rejects missing required ones.
    pub fn get_config<C>(&self, key: &str) -> Result<C, LayerfigError>
    where
        C: confique::Config,
        C::Layer: DeserializeOwned,
    {
        let label = if key.is_empty() { "<root>" } else { key };
        let node = match self.get_node(key) {
            Ok(node) => node,
            Err(LayerfigError::KeyNotFound(_)) => Node::mapping(),
            Err(e) => return Err(e),
        };
        let layer: C::Layer =
            serde_json::from_value(node.to_json()).map_err(|e| LayerfigError::TypeConversion {
                key: label.to_string(),
                reason: e.to_string(),
            })?;
        C::builder()
            .preloaded(layer)
            .load()
            .map_err(|e| LayerfigError::TypeConversion {
                key: label.to_string(),
                reason: e.to_string(),
            })
    }

    /// Resolve the whole tree, reporting every missing mandatory key at once.
    pub fn resolve_all(&self) -> Result<Node, LayerfigError> {
        Resolver::new(&self.tree, &self.resolvers, &self.env).resolve_all()
    }

    /// Paths of mandatory values not supplied by any source.
    pub fn missing_keys(&self) -> Vec<String> {
        self.tree.missing_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::{Person, PersonSchema, Server, TestConfig, TestDbConfig, sample_tree};

    fn config_from(yaml: &str) -> Configuration {
        let mut config = Configuration::new().with_env(Env::from_vars(Vec::<(String, String)>::new()));
        config.setup_configuration(Node::parse_yaml(yaml).unwrap()).unwrap();
        config
    }

    #[test]
    fn typed_reads() {
        let mut config = Configuration::new();
        config.setup_configuration(sample_tree()).unwrap();
        assert_eq!(config.get::<i64>("a.b").unwrap(), 3);
        assert_eq!(config.get::<String>("root").unwrap(), "R");
        assert!(config.get::<bool>("b").unwrap());
        assert_eq!(config.get::<u8>("num").unwrap(), 5);
    }

    #[test]
    fn absent_key() {
        let config = config_from("a: 1");
        assert!(matches!(
            config.get::<i64>("nope"),
            Err(LayerfigError::KeyNotFound(k)) if k == "nope"
        ));
        assert_eq!(config.get_opt::<i64>("nope").unwrap(), None);
        assert_eq!(config.get_or("nope", 7).unwrap(), 7);
    }

    #[test]
    fn mandatory_enforcement() {
        let mut config = config_from("req: '???'\nnull_value: null");
        assert!(matches!(
            config.get::<String>("req"),
            Err(LayerfigError::MissingMandatoryValue { key }) if key == "req"
        ));
        assert_eq!(config.get_or("req", "fallback".to_string()).unwrap(), "fallback");
        assert!(matches!(
            config.get_or("null_value", 1),
            Err(LayerfigError::TypeConversion { .. })
        ));
        assert_eq!(config.get_opt::<i64>("null_value").unwrap(), None);

        config
            .setup_configuration(Node::parse_yaml("req: given").unwrap())
            .unwrap();
        assert_eq!(config.get::<String>("req").unwrap(), "given");
    }

    #[test]
    fn null_layer_switches_off_a_default() {
        let mut config = config_from("proxy: 'http://p'");
        let fallback = Some("fallback".to_string());
        assert_eq!(
            config.get_or::<Option<String>>("proxy", fallback.clone()).unwrap(),
            Some("http://p".to_string())
        );
        config
            .setup_configuration(Node::parse_yaml("proxy: null").unwrap())
            .unwrap();
        assert_eq!(config.get_or::<Option<String>>("proxy", fallback.clone()).unwrap(), None);
        assert_eq!(config.get_or::<Option<String>>("absent", fallback.clone()).unwrap(), fallback);
    }

    #[test]
    fn setup_overrides_and_clears_cache() {
        let mut config = config_from("port: 1");
        assert_eq!(config.get::<i64>("port").unwrap(), 1);
        config
            .setup_configuration(Node::parse_yaml("port: 2").unwrap())
            .unwrap();
        assert_eq!(config.get::<i64>("port").unwrap(), 2);
    }

    #[test]
    fn interpolation_through_facade() {
        let config = config_from("host: h\nport: 80\nurl: 'http://${host}:${port}'");
        assert_eq!(config.get::<String>("url").unwrap(), "http://h:80");
    }

    #[test]
    fn prefix_mounts_tree() {
        let mut config = Configuration::new();
        config
            .setup_with(
                Node::parse_yaml("x: 954").unwrap(),
                Vec::<(String, String)>::new(),
                "a.b",
            )
            .unwrap();
        assert_eq!(config.get::<i64>("a.b.x").unwrap(), 954);
    }

    #[test]
    fn dotted_keys_normalized() {
        let mut config = Configuration::new();
        config
            .setup_configuration(Node::from(serde_json::json!({"a.b": 1, "a": {"c": 2}})))
            .unwrap();
        assert_eq!(config.get::<i64>("a.b").unwrap(), 1);
        assert_eq!(config.get::<i64>("a.c").unwrap(), 2);
    }

    #[test]
    fn helpers_validated_and_prefixed() {
        let mut config = Configuration::new();
        config
            .setup_with(
                Node::parse_yaml("server: {url: x}").unwrap(),
                [("server.url", "Where to connect")],
                "app",
            )
            .unwrap();
        assert_eq!(
            config.helpers().get("app.server.url").map(String::as_str),
            Some("Where to connect")
        );

        let err = config
            .setup_with(Node::parse_yaml("a: 1").unwrap(), [("nope", "x")], "")
            .unwrap_err();
        assert!(matches!(err, LayerfigError::InvalidHelper(k) if k == "nope"));
    }

    #[test]
    fn invalid_configurations() {
        let mut config = Configuration::new();
        assert!(matches!(
            config.setup_configuration(Node::mapping()),
            Err(LayerfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            config.setup_configuration(Node::from(3)),
            Err(LayerfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn branch_is_independent() {
        let parent = config_from("a: 1");
        let mut child = parent.branch();
        child
            .setup_configuration(Node::parse_yaml("a: 2\nb: 3").unwrap())
            .unwrap();
        assert_eq!(parent.get::<i64>("a").unwrap(), 1);
        assert!(parent.get::<i64>("b").is_err());
        assert_eq!(child.get::<i64>("a").unwrap(), 2);
    }

    #[test]
    fn schema_defaults_and_type_lookup() {
        let mut config = Configuration::new();
        config.setup_schema::<PersonSchema>("person").unwrap();
        assert_eq!(config.get::<u32>("person.age").unwrap(), 0);
        assert_eq!(config.get_opt::<String>("person.email").unwrap(), None);
        assert!(matches!(
            config.get_type::<Person>(),
            Err(LayerfigError::MissingMandatoryValue { key }) if key == "person.first_name"
        ));
        assert_eq!(config.missing_keys(), vec!["person.first_name"]);

        config
            .setup_configuration(Node::parse_yaml("person: {first_name: Ada}").unwrap())
            .unwrap();
        let person = config.get_type::<Person>().unwrap();
        assert_eq!(person.first_name, "Ada");
        assert_eq!(person.age, 0);
        assert_eq!(
            config.helpers().get("person.first_name").map(String::as_str),
            Some("Given name")
        );
    }

    #[test]
    fn instance_binding_and_ambiguity() {
        let mut config = Configuration::new();
        assert!(matches!(
            config.get_type::<Server>(),
            Err(LayerfigError::TypeNotRegistered(_))
        ));
        config.setup_value(&Server::default(), "server").unwrap();
        assert_eq!(config.get_type::<Server>().unwrap(), Server::default());

        config.setup_value(&Server::default(), "server").unwrap();
        assert!(config.get_type::<Server>().is_ok());

        config.setup_value(&Server::default(), "backup").unwrap();
        assert!(matches!(
            config.get_type::<Server>(),
            Err(LayerfigError::AmbiguousType(_))
        ));
        assert_eq!(config.get::<Server>("backup").unwrap(), Server::default());
    }

    #[test]
    fn merge_refreshes_typed_values() {
        let mut config = Configuration::new();
        config.setup_value(&Server::default(), "server").unwrap();
        assert_eq!(config.get_type::<Server>().unwrap().port, 8080);
        config
            .setup_configuration(Node::parse_yaml("server: {port: 1}").unwrap())
            .unwrap();
        let server = config.get_type::<Server>().unwrap();
        assert_eq!(server.port, 1);
        assert_eq!(server.url, "http://default");
    }

    #[test]
    fn get_type_or_default() {
        let mut config = Configuration::new();
        config.setup_schema::<PersonSchema>("").unwrap();
        let fallback = Person {
            first_name: "Nobody".into(),
            age: 1,
            email: None,
        };
        assert_eq!(config.get_type_or(fallback.clone()).unwrap(), fallback);
    }

    #[test]
    fn confique_extraction() {
        let mut config = Configuration::new();
        config.setup_config::<TestConfig>("app").unwrap();
        config
            .setup_configuration(Node::parse_yaml("app: {api_key: k, port: 9000}").unwrap())
            .unwrap();
        let loaded: TestConfig = config.get_config("app").unwrap();
        assert_eq!(loaded.host, "localhost");
        assert_eq!(loaded.api_key, "k");
        assert_eq!(loaded.database, TestDbConfig { url: None, pool_size: 5 });

        let port: u16 = config.get("app.port").unwrap();
        assert_eq!(port, 9000);
    }

    #[test]
    fn confique_missing_required() {
        let config = config_from("other: 1");
        assert!(matches!(
            config.get_config::<TestConfig>("app"),
            Err(LayerfigError::TypeConversion { .. })
        ));
    }

    #[test]
    fn resolve_all_lists_missing() {
        let config = config_from("a: '???'\nb: {c: '???'}\nd: 1");
        match config.resolve_all() {
            Err(LayerfigError::MissingMandatoryValues { keys }) => {
                assert_eq!(keys, vec!["a", "b.c"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn custom_resolver_and_env() {
        let mut config = Configuration::new().with_env(Env::from_vars([("TOKEN", "abc")]));
        config.register_resolver("twice", |arg, _| Ok(Node::String(arg.repeat(2))));
        config
            .setup_configuration(Node::parse_yaml("a: '${twice:xy}'\nt: '${env:TOKEN}'").unwrap())
            .unwrap();
        assert_eq!(config.get::<String>("a").unwrap(), "xyxy");
        assert_eq!(config.get::<String>("t").unwrap(), "abc");
    }

    #[test]
    fn configuration_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Configuration>();
    }
}
