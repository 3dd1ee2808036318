//! Typed extraction of resolved nodes.
//!
//! [`convert_to`] looks for a converter registered for the target type first
//! and falls back to serde deserialization. The built-in converters are lenient
//! the way configuration values need to be: `"8080"` is a valid port, `"off"`
//! is `false`, `"~/data"` is a path under the home directory.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;

use crate::error::LayerfigError;
use crate::tree::Node;

type ConverterFn = dyn Fn(&Node) -> Result<Box<dyn Any + Send>, String> + Send + Sync;

/// Strings that read as `false`, compared after trimming and lower-casing.
const FALSE_STRINGS: &[&str] = &[
    "no", "false", "n", "f", "off", "none", "null", "undefined", "0",
];

static BUILTIN: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::builtin);

/// Converters from [`Node`] to concrete types, keyed by [`TypeId`].
#[derive(Clone)]
pub struct TypeRegistry {
    converters: HashMap<TypeId, Arc<ConverterFn>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        BUILTIN.clone()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("converters", &self.converters.len())
            .finish()
    }
}

macro_rules! register_ints {
    ($registry:expr, $($t:ty),*) => {
        $( $registry.register::<$t, _>(|node| {
            let value = parse_integer(node)?;
            <$t>::try_from(value).map_err(|_| format!("{value} is out of range for {}", stringify!($t)))
        }); )*
    };
}

impl TypeRegistry {
    /// A registry without converters; everything goes through serde.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register::<Node, _>(|node| Ok(node.clone()));
        registry.register::<bool, _>(parse_bool);
        register_ints!(registry, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);
        registry.register::<f64, _>(parse_float);
        registry.register::<f32, _>(|node| parse_float(node).map(|f| f as f32));
        registry.register::<String, _>(|node| match node {
            Node::Null => Err("expected a string, found null".to_string()),
            other => other
                .scalar_text()
                .ok_or_else(|| format!("expected a string, found a {}", other.type_name())),
        });
        registry.register::<PathBuf, _>(|node| {
            let text = expect_str(node)?;
            Ok(PathBuf::from(shellexpand::tilde(text).as_ref()))
        });
        registry.register::<NaiveDate, _>(|node| {
            NaiveDate::parse_from_str(expect_str(node)?.trim(), "%Y-%m-%d").map_err(|e| e.to_string())
        });
        registry.register::<NaiveDateTime, _>(|node| {
            let text = expect_str(node)?.trim();
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .ok_or_else(|| format!("'{text}' is not an ISO 8601 date-time"))
        });
        registry.register::<NaiveTime, _>(|node| {
            let text = expect_str(node)?.trim();
            ["%H:%M:%S%.f", "%H:%M"]
                .iter()
                .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
                .ok_or_else(|| format!("'{text}' is not a time of day"))
        });
        registry.register::<DateTime<FixedOffset>, _>(|node| {
            DateTime::parse_from_rfc3339(expect_str(node)?.trim()).map_err(|e| e.to_string())
        });
        registry.register::<DateTime<Utc>, _>(|node| {
            DateTime::parse_from_rfc3339(expect_str(node)?.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| e.to_string())
        });
        registry
    }

    /// Register (or replace) the converter for `T`.
    pub fn register<T, F>(&mut self, converter: F)
    where
        T: Any + Send,
        F: Fn(&Node) -> Result<T, String> + Send + Sync + 'static,
    {
        self.converters.insert(
            TypeId::of::<T>(),
            Arc::new(move |node| converter(node).map(|v| Box::new(v) as Box<dyn Any + Send>)),
        );
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.converters.contains_key(&TypeId::of::<T>())
    }

    fn convert<T: Any>(&self, node: &Node) -> Option<Result<T, String>> {
        let converter = self.converters.get(&TypeId::of::<T>())?;
        Some(converter(node).and_then(|boxed| {
            boxed
                .downcast::<T>()
                .map(|b| *b)
                .map_err(|_| "converter returned the wrong type".to_string())
        }))
    }
}

/// Convert a resolved node to `T`. `key` only labels errors.
pub fn convert_to<T>(node: &Node, registry: &TypeRegistry, key: &str) -> Result<T, LayerfigError>
where
    T: DeserializeOwned + Any,
{
    let result = match registry.convert::<T>(node) {
        Some(result) => result,
        None => serde_json::from_value::<T>(node.to_json()).map_err(|e| e.to_string()),
    };
    result.map_err(|reason| LayerfigError::TypeConversion {
        key: key.to_string(),
        reason,
    })
}

/// Lenient boolean: strings are true unless they are one of the usual
/// negative words, numbers are true unless zero.
pub fn parse_bool(node: &Node) -> Result<bool, String> {
    match node {
        Node::Bool(b) => Ok(*b),
        Node::Null => Ok(false),
        Node::Integer(i) => Ok(*i != 0),
        Node::Float(f) => Ok(*f != 0.0),
        Node::String(s) => Ok(!FALSE_STRINGS.contains(&s.trim().to_lowercase().as_str())),
        other => Err(format!("expected a boolean, found a {}", other.type_name())),
    }
}

fn parse_integer(node: &Node) -> Result<i64, String> {
    match node {
        Node::Integer(i) => Ok(*i),
        Node::Bool(b) => Ok(i64::from(*b)),
        Node::Float(f) => float_to_integer(*f),
        Node::String(s) => {
            let s = s.trim();
            s.parse::<i64>().or_else(|_| match s.parse::<f64>() {
                Ok(f) => float_to_integer(f),
                Err(_) => Err(format!("'{s}' is not an integer")),
            })
        }
        other => Err(format!("expected an integer, found a {}", other.type_name())),
    }
}

// `as` saturates, so the range is checked first.
fn float_to_integer(f: f64) -> Result<i64, String> {
    if f.fract() != 0.0 || !f.is_finite() {
        return Err(format!("{f} is not an integer"));
    }
    if !(-9.223372036854775808e18..9.223372036854775808e18).contains(&f) {
        return Err(format!("{f} is out of range"));
    }
    Ok(f as i64)
}

fn parse_float(node: &Node) -> Result<f64, String> {
    match node {
        Node::Float(f) => Ok(*f),
        Node::Integer(i) => Ok(*i as f64),
        Node::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Node::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s.trim())),
        other => Err(format!("expected a number, found a {}", other.type_name())),
    }
}

fn expect_str(node: &Node) -> Result<&str, String> {
    node.as_str()
        .ok_or_else(|| format!("expected a string, found a {}", node.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::Person;
    use serde::Deserialize;

    fn convert<T: DeserializeOwned + Any>(node: Node) -> Result<T, LayerfigError> {
        convert_to::<T>(&node, &TypeRegistry::default(), "k")
    }

    #[test]
    fn lenient_bool() {
        for falsy in ["no", "False", " off ", "N", "0", "null", "undefined", "none", "f"] {
            assert!(!convert::<bool>(Node::from(falsy)).unwrap(), "{falsy}");
        }
        for truthy in ["yes", "true", "1", "on", "anything"] {
            assert!(convert::<bool>(Node::from(truthy)).unwrap(), "{truthy}");
        }
        assert!(!convert::<bool>(Node::Null).unwrap());
        assert!(convert::<bool>(Node::Integer(2)).unwrap());
    }

    #[test]
    fn integers_from_strings_and_numbers() {
        assert_eq!(convert::<u16>(Node::from("8080")).unwrap(), 8080);
        assert_eq!(convert::<i64>(Node::Integer(-3)).unwrap(), -3);
        assert_eq!(convert::<i32>(Node::Float(4.0)).unwrap(), 4);
        assert_eq!(convert::<usize>(Node::Bool(true)).unwrap(), 1);
        assert!(convert::<u8>(Node::Integer(300)).is_err());
        assert!(convert::<u32>(Node::Integer(-1)).is_err());
        assert!(convert::<i32>(Node::from("abc")).is_err());
        assert!(convert::<i32>(Node::Float(1.5)).is_err());
    }

    #[test]
    fn out_of_range_floats_are_rejected() {
        assert!(matches!(
            convert::<u64>(Node::from("1e30")),
            Err(LayerfigError::TypeConversion { .. })
        ));
        assert!(convert::<i64>(Node::Float(-1e300)).is_err());
        assert!(convert::<i64>(Node::Float(f64::NAN)).is_err());
        assert_eq!(convert::<i64>(Node::from("1e3")).unwrap(), 1000);
    }

    #[test]
    fn floats() {
        assert_eq!(convert::<f64>(Node::Integer(2)).unwrap(), 2.0);
        assert_eq!(convert::<f64>(Node::from("1.25")).unwrap(), 1.25);
        assert_eq!(convert::<f32>(Node::Float(0.5)).unwrap(), 0.5);
    }

    #[test]
    fn strings_from_scalars() {
        assert_eq!(convert::<String>(Node::from("x")).unwrap(), "x");
        assert_eq!(convert::<String>(Node::Integer(5)).unwrap(), "5");
        assert_eq!(convert::<String>(Node::Bool(true)).unwrap(), "true");
        assert!(convert::<String>(Node::Null).is_err());
        assert!(convert::<String>(Node::mapping()).is_err());
    }

    #[test]
    fn path_expands_tilde() {
        let path = convert::<PathBuf>(Node::from("~/data")).unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("data"));
        assert_eq!(
            convert::<PathBuf>(Node::from("/abs/x")).unwrap(),
            PathBuf::from("/abs/x")
        );
    }

    #[test]
    fn dates_and_times() {
        assert_eq!(
            convert::<NaiveDate>(Node::from("2023-05-06")).unwrap(),
            NaiveDate::from_ymd_opt(2023, 5, 6).unwrap()
        );
        assert!(convert::<NaiveDate>(Node::from("06/05/2023")).is_err());

        let dt = convert::<NaiveDateTime>(Node::from("2023-05-06T07:08:09")).unwrap();
        assert_eq!(dt.to_string(), "2023-05-06 07:08:09");
        let spaced = convert::<NaiveDateTime>(Node::from("2023-05-06 07:08:09")).unwrap();
        assert_eq!(dt, spaced);

        let t = convert::<NaiveTime>(Node::from("10:30")).unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(10, 30, 0).unwrap());

        let utc = convert::<DateTime<Utc>>(Node::from("2023-05-06T07:08:09+02:00")).unwrap();
        assert_eq!(utc.to_rfc3339(), "2023-05-06T05:08:09+00:00");
        let offset =
            convert::<DateTime<FixedOffset>>(Node::from("2023-05-06T07:08:09+02:00")).unwrap();
        assert_eq!(offset.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn node_is_identity() {
        let node = Node::parse_yaml("a: [1, 2]").unwrap();
        assert_eq!(convert::<Node>(node.clone()).unwrap(), node);
    }

    #[test]
    fn structs_use_serde() {
        let node = Node::parse_yaml("first_name: Ada\nage: 36").unwrap();
        let person: Person = convert(node).unwrap();
        assert_eq!(person.first_name, "Ada");
        assert_eq!(person.age, 36);
    }

    #[test]
    fn serde_errors_name_the_key() {
        #[derive(Deserialize, Debug)]
        #[allow(dead_code)]
        struct Strict {
            port: u16,
        }
        let err = convert::<Strict>(Node::parse_yaml("port: nope").unwrap()).unwrap_err();
        match err {
            LayerfigError::TypeConversion { key, reason } => {
                assert_eq!(key, "k");
                assert!(reason.contains("invalid type"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn option_from_null() {
        assert_eq!(convert::<Option<u16>>(Node::Null).unwrap(), None);
        assert_eq!(convert::<Option<u16>>(Node::Integer(3)).unwrap(), Some(3));
    }

    #[test]
    fn custom_converter_wins() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Upper(String);

        let mut registry = TypeRegistry::default();
        registry.register::<Upper, _>(|node| {
            node.as_str()
                .map(|s| Upper(s.to_uppercase()))
                .ok_or_else(|| "not a string".to_string())
        });
        let value: Upper = convert_to(&Node::from("abc"), &registry, "k").unwrap();
        assert_eq!(value, Upper("ABC".into()));
        assert!(registry.contains::<Upper>());
        assert!(!TypeRegistry::empty().contains::<bool>());
    }
}
