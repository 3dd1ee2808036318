//! Logging setup from the `logging` subtree.
//!
//! The subtree is a small dictionary-style description, so presets can be
//! swapped from the command line (`--select logging=none`):
//!
//! ```yaml
//! version: 1
//! formatters:
//!   color: {format: full, ansi: true}
//!   json: {format: json}
//! handlers:
//!   console: {formatter: color, stream: stdout}
//! root: {level: INFO, handlers: [console]}
//! loggers:
//!   hyper: {level: WARNING}
//! ```
//!
//! Each handler listed in `root.handlers` becomes a `tracing-subscriber` fmt
//! layer. `RUST_LOG`, when set, takes precedence over the configured levels.

use std::io;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::error::LayerfigError;
use crate::tree::Node;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub formatters: IndexMap<String, FormatterConfig>,
    #[serde(default)]
    pub handlers: IndexMap<String, HandlerConfig>,
    #[serde(default)]
    pub root: RootConfig,
    /// Per-target levels, e.g. `{hyper: {level: WARNING}}`.
    #[serde(default)]
    pub loggers: IndexMap<String, LoggerConfig>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    #[default]
    Full,
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FormatterConfig {
    #[serde(default)]
    pub format: FormatKind,
    #[serde(default)]
    pub ansi: bool,
    #[serde(default = "yes")]
    pub target: bool,
    #[serde(default)]
    pub thread_names: bool,
}

fn yes() -> bool {
    true
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            format: FormatKind::default(),
            ansi: false,
            target: true,
            thread_names: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    #[default]
    Stderr,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct HandlerConfig {
    pub formatter: Option<String>,
    #[serde(default)]
    pub stream: Stream,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RootConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub handlers: Vec<String>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            handlers: Vec::new(),
        }
    }
}

fn default_level() -> String {
    "INFO".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggerConfig {
    pub level: String,
}

impl LoggingConfig {
    /// Read from a resolved `logging` node.
    pub fn from_node(node: &Node) -> Result<Self, LayerfigError> {
        serde_json::from_value(node.to_json()).map_err(|e| LayerfigError::Logging(e.to_string()))
    }

    /// `EnvFilter` directives for the configured levels.
    pub fn directives(&self) -> Result<String, LayerfigError> {
        let mut directives = vec![level_directive(&self.root.level)?];
        for (target, logger) in &self.loggers {
            directives.push(format!("{target}={}", level_directive(&logger.level)?));
        }
        Ok(directives.join(","))
    }

    fn layers(&self) -> Result<Vec<BoxedLayer>, LayerfigError> {
        self.root
            .handlers
            .iter()
            .map(|name| {
                let handler = self.handlers.get(name).ok_or_else(|| {
                    LayerfigError::Logging(format!("unknown handler '{name}'"))
                })?;
                let formatter = match &handler.formatter {
                    Some(f) => self.formatters.get(f).cloned().ok_or_else(|| {
                        LayerfigError::Logging(format!("unknown formatter '{f}'"))
                    })?,
                    None => FormatterConfig::default(),
                };
                Ok(build_layer(&formatter, handler.stream))
            })
            .collect()
    }
}

/// Map a level name (`WARNING`, `CRITICAL` and friends accepted) to a filter directive.
pub fn level_directive(level: &str) -> Result<String, LayerfigError> {
    let directive = match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "NOTSET" => "trace",
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" | "FATAL" => "error",
        "OFF" => "off",
        other => return Err(LayerfigError::Logging(format!("unknown level '{other}'"))),
    };
    Ok(directive.to_string())
}

fn build_layer(formatter: &FormatterConfig, stream: Stream) -> BoxedLayer {
    let writer = match stream {
        Stream::Stdout => BoxMakeWriter::new(io::stdout),
        Stream::Stderr => BoxMakeWriter::new(io::stderr),
    };
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(formatter.ansi)
        .with_target(formatter.target)
        .with_thread_names(formatter.thread_names);
    match formatter.format {
        FormatKind::Full => layer.boxed(),
        FormatKind::Compact => layer.compact().boxed(),
        FormatKind::Pretty => layer.pretty().boxed(),
        FormatKind::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber.
///
/// `None` installs a plain stderr logger at INFO with colors. A config whose
/// root lists no handlers installs nothing. Returns whether a subscriber was
/// installed; one already set by the process is left in place.
pub fn setup_logging(config: Option<&LoggingConfig>) -> Result<bool, LayerfigError> {
    let (layers, directives) = match config {
        Some(config) => (config.layers()?, config.directives()?),
        None => {
            let formatter = FormatterConfig {
                ansi: true,
                ..FormatterConfig::default()
            };
            (vec![build_layer(&formatter, Stream::Stderr)], "info".to_string())
        }
    };
    if layers.is_empty() {
        tracing::debug!("logging configured without handlers");
        return Ok(false);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .map_err(|e| LayerfigError::Logging(e.to_string()))?;

    match tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
    {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::debug!(error = %e, "logging already set up");
            Ok(false)
        }
    }
}
