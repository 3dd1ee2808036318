//! Small shared types for configuring how an application loads its sources.
//!
//! # Discovery
//!
//! Configuration files are looked up as `{name}.{yaml,json,toml}` in each
//! [`SearchPath`], in the order given. Every file found is loaded and merged,
//! later files overriding earlier ones:
//!
//! ```text
//! /etc/myapp.yaml            System       (%APPDATA% on Windows)
//! %LOCALAPPDATA%/myapp.yaml  LocalData    (Windows only)
//! ~/.myapp.yaml              HomeDotfile
//! ~/.config/myapp.yaml       UserConfig
//! ./myapp.yaml               Cwd
//! ```
//!
//! Missing files are skipped. A file that exists but cannot be parsed is an
//! error.
//!
//! # Environment prefixes
//!
//! [`EnvPrefixes::Auto`] accepts `SERVER_*` for a top-level `server` key and
//! keeps the prefix as the first key segment (`SERVER_URL` → `server.url`).
//! [`EnvPrefixes::Explicit`] accepts the listed prefixes and strips them
//! (`APP_SERVER_URL` with `APP_` → `server.url`).

use std::path::PathBuf;

/// Where to search for configuration files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPath {
    /// `/etc` on Unix, `%APPDATA%` on Windows.
    System,
    /// `%LOCALAPPDATA%` on Windows; nothing elsewhere.
    LocalData,
    /// A dotfile in the home directory: `~/.{name}.{ext}`.
    HomeDotfile,
    /// The user configuration directory (`~/.config` on Linux).
    UserConfig,
    /// Current working directory.
    Cwd,
    /// An explicit directory.
    Path(PathBuf),
}

impl SearchPath {
    /// The standard lookup order, lowest priority first.
    pub fn defaults() -> Vec<SearchPath> {
        vec![
            SearchPath::System,
            SearchPath::LocalData,
            SearchPath::HomeDotfile,
            SearchPath::UserConfig,
            SearchPath::Cwd,
        ]
    }
}

/// Which environment variables are loaded into the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvPrefixes {
    /// `K_` for every top-level key `k` of the configuration merged so far.
    #[default]
    Auto,
    /// Only these prefixes; they are stripped from variable names.
    Explicit(Vec<String>),
    /// Do not read the environment.
    Disabled,
}
