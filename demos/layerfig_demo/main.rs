//! # layerfig demo application
//!
//! A sample CLI tool that showcases how to integrate layerfig into a real
//! application. It exists purely to demonstrate and manually verify
//! layerfig's features.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example layerfig_demo -- server.admin_password=s3cret
//! cargo run --example layerfig_demo -- --help
//! ```
//!
//! ## Features demonstrated
//!
//! | Feature                | How to exercise it                                                            |
//! |------------------------|-------------------------------------------------------------------------------|
//! | Mandatory value        | `cargo run --example layerfig_demo` exits with code 99                         |
//! | Compiled defaults      | `cargo run --example layerfig_demo -- server.admin_password=x`                 |
//! | Config file (cwd)      | Create `layerfig-demo.yaml` in cwd, then run                                   |
//! | Explicit config file   | `cargo run --example layerfig_demo -- -f my.toml`                              |
//! | Env var override       | `SERVER_PORT=9999 cargo run --example layerfig_demo -- server.admin_password=x` |
//! | Interpolation          | `greeting` is built from `server.host` and `server.port`                       |
//! | Show configuration     | `cargo run --example layerfig_demo -- -C` (the password is masked)              |
//! | Help with descriptions | `cargo run --example layerfig_demo -- --help`                                  |
//! | Logging preset         | `cargo run --example layerfig_demo -- --select logging=none ...`               |

mod config;

use layerfig::{Application, Configuration, Node};

use config::{DisplayConfig, ServerConfig};

fn ansi_color_code(name: &str) -> &str {
    match name {
        "red" => "\x1b[31m",
        "green" => "\x1b[32m",
        "yellow" => "\x1b[33m",
        "blue" => "\x1b[34m",
        "magenta" => "\x1b[35m",
        "cyan" => "\x1b[36m",
        "white" => "\x1b[37m",
        _ => "\x1b[0m",
    }
}

const RESET: &str = "\x1b[0m";

fn register_defaults() -> Result<(), layerfig::LayerfigError> {
    layerfig::setup_config::<ServerConfig>("server")?;
    layerfig::setup_config::<DisplayConfig>("display")?;
    layerfig::setup_with(
        Node::from(serde_json::json!({
            "greeting": "listening on ${server.host}:${server.port}",
        })),
        [("greeting", "Message printed at startup")],
        "",
    )
}

fn echo(config: &Configuration) -> anyhow::Result<()> {
    let server: ServerConfig = config.get_config("server")?;
    let display: DisplayConfig = config.get_config("display")?;
    let greeting: String = config.get("greeting")?;
    let color = ansi_color_code(&display.color);

    let entries = [
        ("greeting", greeting),
        ("server.host", server.host),
        ("server.port", server.port.to_string()),
        ("server.max_connections", server.max_connections.to_string()),
        ("display.format", display.format.clone()),
    ];

    if display.format == "plain" {
        for (key, value) in &entries {
            println!("{key}={value}");
        }
    } else {
        let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in &entries {
            println!("{color}{key:<width$}{RESET}  {value}");
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = register_defaults() {
        eprintln!("Failed to register defaults:\n{e}");
        std::process::exit(1);
    }

    let mut app = Application::builder()
        .name("layerfig-demo")
        .version(env!("CARGO_PKG_VERSION"))
        .short_description("A sample CLI app for showcasing layerfig")
        .build();
    app.run(echo);
}
