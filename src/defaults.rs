//! Built-in defaults merged below every application configuration.
//!
//! `base.logging` holds the logging presets; `logging` selects one of them
//! (`default` unless overridden, e.g. with `--select logging=none`).

use serde_json::json;

use crate::tree::Node;

/// The built-in tree: logging presets and the `logging` selector.
pub fn builtin_defaults() -> Node {
    let logging_default = json!({
        "version": 1,
        "formatters": {
            "simple": {"format": "compact", "target": false},
            "default": {"format": "full", "thread_names": true},
            "color": {
                "format": "${..default.format}",
                "thread_names": "${..default.thread_names}",
                "ansi": true,
            },
            "json": {"format": "json"},
        },
        "handlers": {
            "console": {"formatter": "color", "stream": "stdout"},
        },
        "root": {"level": "INFO", "handlers": ["console"]},
    });
    let logging_none = json!({
        "version": 1,
        "formatters": {
            "default": {"format": "full"},
        },
        "handlers": {},
        "root": {"level": "INFO", "handlers": []},
    });

    Node::from(json!({
        "logging": "${select:base.logging.default}",
        "base": {
            "logging": {
                "default": logging_default,
                "none": logging_none,
            },
        },
    }))
}
