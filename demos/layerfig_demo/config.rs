//! Configuration structs for the layerfig demo application.
//!
//! Each struct derives [`confique::Config`] for defaults and help text, plus
//! [`Serialize`]/[`Deserialize`] for typed reads. They are registered under
//! their own top-level key, which also enables the matching env prefix:
//!
//! | Env var                  | Config key               |
//! |--------------------------|--------------------------|
//! | `SERVER_HOST`            | `server.host`            |
//! | `SERVER_PORT`            | `server.port`            |
//! | `SERVER_MAX_CONNECTIONS` | `server.max_connections` |
//! | `DISPLAY_COLOR`          | `display.color`          |

use confique::Config;
use serde::{Deserialize, Serialize};

/// Server-related configuration, under `server.*`.
#[derive(Config, Serialize, Deserialize, Debug)]
pub struct ServerConfig {
    /// Hostname to bind to.
    #[config(default = "127.0.0.1")]
    pub host: String,

    /// Port number.
    #[config(default = 3000)]
    pub port: u16,

    /// Maximum number of allowed connections.
    #[config(default = 100)]
    pub max_connections: u32,

    /// Password for the admin endpoint. Must be supplied.
    pub admin_password: String,
}

/// Display settings, under `display.*`.
#[derive(Config, Serialize, Deserialize, Debug)]
pub struct DisplayConfig {
    /// Terminal color for the output.
    ///
    /// Supported values: red, green, yellow, blue, magenta, cyan, white.
    #[config(default = "yellow")]
    pub color: String,

    /// Output format (pretty or plain).
    #[config(default = "pretty")]
    pub format: String,
}
