//! Layered configuration for Rust applications. Declare defaults, point at
//! your files, and read typed values.
//!
//! Layerfig merges configuration from multiple sources (built-in defaults,
//! config files, environment variables and command-line fragments) into one
//! tree, resolves `${...}` interpolations on read, and hands you typed values.
//!
//! ```ignore
//! layerfig::setup_configuration(Node::parse_yaml("server: {url: 'http://localhost', port: 8080}")?)?;
//!
//! let mut app = Application::builder().name("myapp").version("1.0").build();
//! app.run(|config| {
//!     let port: u16 = config.get("server.port")?;
//!     Ok(())
//! });
//! ```
//!
//! That `run` call parses the command line, loads `myapp.{yaml,json,toml}`
//! from the usual places, merges `SERVER_*` environment variables, handles
//! `--help`, `--version` and `--configuration`, sets up logging, and then
//! calls `main` with the resolved configuration.
//!
//! # Why layerfig
//!
//! Most applications need layered configuration: compiled defaults, a config
//! file, environment variables, maybe a few `key=value` overrides on the
//! command line. Wiring each source by hand means parsing files, iterating
//! env vars and mapping arguments, and the plumbing grows with every setting.
//!
//! Layerfig keeps one ordered tree. Every source is converted into the same
//! [`Node`] model and deep-merged on top of what came before, so each layer
//! only needs the keys it changes.
//!
//! # Layer precedence
//!
//! ```text
//! Library defaults      layerfig::setup_configuration(), setup_config::<C>()
//!        ↑ overridden by
//! Application           application.{name, version, uuid}
//!        ↑ overridden by
//! Config files          $LAYERFIG_CONFIG, discovered files, explicit paths
//!        ↑ overridden by
//! Environment vars      SERVER_URL → server.url
//!        ↑ overridden by
//! Command line          -f file.yaml, key=value, --select key=template
//! ```
//!
//! Mappings merge key by key. Anything else, lists included, is replaced
//! whole by the higher layer.
//!
//! # Interpolation
//!
//! String values holding `${...}` are kept unevaluated until read:
//!
//! - `${server.host}` references another key; `${..port}` is relative to the
//!   key holding the expression;
//! - `${env:HOME}` reads an environment variable;
//! - `${select:base.logging.default}` reads a key, or null when absent;
//! - `${read_text:/path}` and `${read_strip:/path}` read a file.
//!
//! More functions can be added with
//! [`register_resolver`](Configuration::register_resolver). Cycles are
//! detected and reported with the key that started them.
//!
//! # Mandatory values
//!
//! A value written as `???` must be supplied by some layer. Reading it before
//! then fails with [`LayerfigError::MissingMandatoryValue`]; application setup
//! resolves the whole tree and reports every missing key at once, exiting
//! with code 99 from [`Application::run`].
//!
//! # Typed access
//!
//! [`Configuration::get`] converts with built-in converters for primitives,
//! paths and dates (see [`TypeRegistry`]) and falls back to serde for
//! anything else. Schemas register a type at a path, so it can later be read
//! without naming the key:
//!
//! - [`setup_config::<C>`](Configuration::setup_config) takes a
//!   [confique](https://docs.rs/confique) struct: `#[config(default)]` values
//!   become defaults, fields with neither default nor `Option` become `???`,
//!   and `///` doc comments become help text.
//! - [`setup_schema::<S>`](Configuration::setup_schema) takes any
//!   [`Schema`] built from [`FieldInfo`] entries.
//! - [`setup_value`](Configuration::setup_value) takes a serializable
//!   instance as the defaults.
//!
//! # Environment variables
//!
//! By default every top-level key `k` accepts variables prefixed `K_`. Single
//! underscores are ambiguous, so names are matched against the keys that
//! already exist, longest first:
//!
//! | Env var | Existing tree | Config key |
//! |---------|---------------|------------|
//! | `SERVER_URL` | `server: {url}` | `server.url` |
//! | `MY_TEST_A` | `my_test: {a}` | `my_test.a` |
//!
//! Values are parsed as YAML scalars, so `8080` is an integer and `true` a
//! bool. See [`EnvPrefixes`] for explicit prefixes or turning this off.
//!
//! # Core library, no CLI framework required
//!
//! The [`args`] module describes a parsed command line without any CLI
//! framework. The optional [clap](https://docs.rs/clap) adapter (the [`cli`]
//! module, behind the `clap` Cargo feature, on by default) fills it from
//! process arguments and can be merged into your own clap `Command`. To use
//! layerfig without clap:
//!
//! ```toml
//! layerfig = { version = "...", default-features = false }
//! ```
//!
//! # Secrets
//!
//! `--configuration` prints the merged tree with values under keys containing
//! `password`, `secret` or `key` replaced by `*****` (see [`mask`]). Masking
//! is display-only; the configuration itself is unchanged.
//!
//! # Error handling
//!
//! All fallible operations return [`LayerfigError`]. Library calls always
//! hand the error back; only [`Application::run`] turns it into an exit
//! code. See the [`error`] module for the full set.

pub mod args;
#[cfg(feature = "clap")]
pub mod cli;
pub mod context;
pub mod error;
pub mod interpolate;
pub mod logging;
pub mod mask;
pub mod schema;
pub mod tree;
pub mod types;

mod app;
mod config;
mod convert;
mod defaults;
mod env;
mod file;
pub(crate) mod merge;

#[cfg(test)]
mod fixtures;

pub use app::{Application, ApplicationBuilder, CONFIG_ENV_VAR, Outcome, SetupOptions};
pub use args::{Action, Fragment, ParseResult};
pub use config::Configuration;
pub use context::{
    enter, get, get_opt, get_or, get_type, load_configuration_file, param, setup_config,
    setup_schema, setup_configuration, setup_value, setup_with,
};
pub use convert::{TypeRegistry, parse_bool};
pub use defaults::builtin_defaults;
pub use env::{Env, PrefixMode, env_to_tree, find_name};
pub use error::LayerfigError;
pub use file::{SUPPORTED_EXTENSIONS, read_configuration_file};
pub use mask::MaskOptions;
pub use merge::{deep_merge, merge_all};
pub use schema::{ConfiqueSchema, FieldInfo, FieldKind, Schema};
pub use tree::{MANDATORY, Mapping, Node};
pub use types::{EnvPrefixes, SearchPath};
