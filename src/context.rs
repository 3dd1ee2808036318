//! Process-wide configuration context.
//!
//! Two slots live here:
//!
//! - the **defaults**: a [`Configuration`] seeded with the built-in defaults,
//!   where libraries register their own defaults and helpers (see
//!   [`setup_configuration`]). Every [`Application`](crate::Application)
//!   starts from a branch of it;
//! - the **current** configuration, set while an application runs (see
//!   [`enter`]). [`get`] and friends read it, or the defaults when nothing
//!   is running.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Configuration;
use crate::defaults::builtin_defaults;
use crate::error::LayerfigError;
use crate::file::read_configuration_file;
use crate::schema::Schema;
use crate::tree::{Node, normalize_keys};

static DEFAULTS: Lazy<RwLock<Configuration>> = Lazy::new(|| RwLock::new(seeded()));
static CURRENT: Lazy<RwLock<Option<Arc<Configuration>>>> = Lazy::new(|| RwLock::new(None));

fn seeded() -> Configuration {
    let mut config = Configuration::new();
    config.merge_source(builtin_defaults());
    config
}

/// A branch of the process-wide defaults.
pub fn defaults() -> Configuration {
    DEFAULTS.read().branch()
}

/// Drop everything registered in the defaults, keeping the built-ins.
pub fn reset_defaults() {
    *DEFAULTS.write() = seeded();
}

/// Add a default configuration mapping at the root.
pub fn setup_configuration(conf: Node) -> Result<(), LayerfigError> {
    DEFAULTS.write().setup_configuration(conf)
}

/// Add a default configuration under `prefix`, with help descriptions.
pub fn setup_with<K, V>(
    conf: Node,
    helpers: impl IntoIterator<Item = (K, V)>,
    prefix: &str,
) -> Result<(), LayerfigError>
where
    K: Into<String>,
    V: Into<String>,
{
    DEFAULTS.write().setup_with(conf, helpers, prefix)
}

/// Add the defaults of a schema under `prefix`.
pub fn setup_schema<S: Schema>(prefix: &str) -> Result<(), LayerfigError> {
    DEFAULTS.write().setup_schema::<S>(prefix)
}

/// Add the defaults of a confique config struct under `prefix`.
pub fn setup_config<C: confique::Config + 'static>(prefix: &str) -> Result<(), LayerfigError> {
    DEFAULTS.write().setup_config::<C>(prefix)
}

/// Add a serializable value as defaults under `prefix`.
pub fn setup_value<T: Serialize + 'static>(value: &T, prefix: &str) -> Result<(), LayerfigError> {
    DEFAULTS.write().setup_value(value, prefix)
}

/// Merge a configuration file into the defaults, as if it had been passed to
/// [`setup_configuration`].
pub fn load_configuration_file(path: &Path) -> Result<(), LayerfigError> {
    let node = normalize_keys(read_configuration_file(path)?);
    tracing::debug!(path = %path.display(), "load default configuration");
    setup_configuration(node)
}

/// Restores the previous current configuration when dropped.
#[must_use = "the configuration is only current while the guard lives"]
#[derive(Debug)]
pub struct ContextGuard {
    previous: Option<Arc<Configuration>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        *CURRENT.write() = self.previous.take();
    }
}

/// Make `config` the current configuration until the guard is dropped.
pub fn enter(config: Arc<Configuration>) -> ContextGuard {
    let previous = CURRENT.write().replace(config);
    ContextGuard { previous }
}

/// The current configuration, if an application is running.
pub fn current() -> Option<Arc<Configuration>> {
    CURRENT.read().clone()
}

fn with_active<R>(read: impl FnOnce(&Configuration) -> R) -> R {
    match current() {
        Some(config) => read(&config),
        None => read(&DEFAULTS.read()),
    }
}

/// Read `key` from the current configuration.
pub fn get<T: DeserializeOwned + Any>(key: &str) -> Result<T, LayerfigError> {
    with_active(|config| config.get(key))
}

/// Read `key`, `None` when absent, null or mandatory-missing.
pub fn get_opt<T: DeserializeOwned + Any>(key: &str) -> Result<Option<T>, LayerfigError> {
    with_active(|config| config.get_opt(key))
}

/// Read `key`, falling back to `default`.
pub fn get_or<T: DeserializeOwned + Any>(key: &str, default: T) -> Result<T, LayerfigError> {
    with_active(|config| config.get_or(key, default))
}

/// Read the parameter `name` under `prefix` (`prefix.name`, or just `name`
/// for an empty prefix). `None` when absent or mandatory-missing, so callers
/// can fall back to their own default.
///
/// ```ignore
/// fn connect(host: Option<String>, port: Option<u16>) { ... }
/// connect(param("server", "host")?, param("server", "port")?);
/// ```
pub fn param<T: DeserializeOwned + Any>(prefix: &str, name: &str) -> Result<Option<T>, LayerfigError> {
    let key = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    };
    match get::<T>(&key) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_missing() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read the value of a type bound with `setup_schema`/`setup_value`.
pub fn get_type<T>() -> Result<T, LayerfigError>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    with_active(|config| config.get_type::<T>())
}
