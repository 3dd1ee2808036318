//! Configuration file discovery and loading.
//!
//! The format follows the extension: `.yaml`/`.yml` (or none) as YAML,
//! `.json` as JSON, `.toml` as TOML. Every file yields a mapping; a file
//! whose root is a list is wrapped as `{config: [...]}`.
//!
//! Discovery resolves each [`SearchPath`] to a directory and checks it for
//! `{name}.{ext}` (`.{name}.{ext}` for [`SearchPath::HomeDotfile`]) with every
//! supported extension. See [`types`](crate::types) for the standard order.

use std::path::{Path, PathBuf};

use crate::error::LayerfigError;
use crate::tree::{Mapping, Node};
use crate::types::SearchPath;

/// Extensions tried during discovery, in order.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["yaml", "json", "toml"];

/// Read and parse one configuration file.
pub fn read_configuration_file(path: &Path) -> Result<Node, LayerfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| LayerfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_configuration(path, &content)
}

/// Parse file content according to the extension of `path`.
pub fn parse_configuration(path: &Path, content: &str) -> Result<Node, LayerfigError> {
    let parse_error = |reason: String| LayerfigError::ParseError {
        path: path.to_path_buf(),
        reason,
    };
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let node = match extension.as_deref() {
        Some("json") => serde_json::from_str::<serde_json::Value>(content)
            .map(Node::from)
            .map_err(|e| parse_error(e.to_string()))?,
        Some("toml") => content
            .parse::<toml::Table>()
            .map(|t| Node::from(toml::Value::Table(t)))
            .map_err(|e| parse_error(e.to_string()))?,
        Some("yaml") | Some("yml") | None => {
            Node::parse_yaml(content).map_err(|e| parse_error(e.to_string()))?
        }
        Some(_) => return Err(LayerfigError::UnsupportedFormat(path.to_path_buf())),
    };

    Ok(match node {
        Node::Mapping(_) => node,
        Node::Null => Node::mapping(),
        other => {
            let mut map = Mapping::new();
            map.insert("config".to_string(), other);
            Node::Mapping(map)
        }
    })
}

/// Resolve a [`SearchPath`] to the candidate files for `app_name`.
///
/// Returns nothing when the location does not apply to this platform or the
/// directory cannot be determined.
pub fn candidate_files(search_path: &SearchPath, app_name: &str) -> Vec<PathBuf> {
    let in_dir = |dir: PathBuf, stem: String| -> Vec<PathBuf> {
        SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{stem}.{ext}")))
            .collect()
    };

    match search_path {
        SearchPath::System => {
            if cfg!(windows) {
                std::env::var_os("APPDATA")
                    .map(|dir| in_dir(PathBuf::from(dir), app_name.to_string()))
                    .unwrap_or_default()
            } else {
                in_dir(PathBuf::from("/etc"), app_name.to_string())
            }
        }
        SearchPath::LocalData => {
            if cfg!(windows) {
                directories::BaseDirs::new()
                    .map(|dirs| in_dir(dirs.data_local_dir().to_path_buf(), app_name.to_string()))
                    .unwrap_or_default()
            } else {
                vec![]
            }
        }
        SearchPath::HomeDotfile => directories::UserDirs::new()
            .map(|user| in_dir(user.home_dir().to_path_buf(), format!(".{app_name}")))
            .unwrap_or_default(),
        SearchPath::UserConfig => directories::BaseDirs::new()
            .map(|dirs| in_dir(dirs.config_dir().to_path_buf(), app_name.to_string()))
            .unwrap_or_default(),
        SearchPath::Cwd => std::env::current_dir()
            .map(|dir| in_dir(dir, app_name.to_string()))
            .unwrap_or_default(),
        SearchPath::Path(dir) => in_dir(dir.clone(), app_name.to_string()),
    }
}

/// Load every existing configuration file across `search_paths`, in order.
///
/// Missing files are skipped; unreadable or malformed files are errors.
pub fn load_config_files(
    search_paths: &[SearchPath],
    app_name: &str,
) -> Result<Vec<(PathBuf, Node)>, LayerfigError> {
    let mut results = Vec::new();
    for search_path in search_paths {
        for path in candidate_files(search_path, app_name) {
            if !path.is_file() {
                continue;
            }
            tracing::debug!(path = %path.display(), "loading configuration file");
            let node = read_configuration_file(&path)?;
            results.push((path, node));
        }
    }
    Ok(results)
}
