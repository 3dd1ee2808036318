use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::args::{Action, ParseResult, option_help};
use crate::config::Configuration;
use crate::context;
use crate::env::{self, Env, PrefixMode};
use crate::error::{EXIT_MISSING_VALUE, LayerfigError};
use crate::file;
use crate::logging::{LoggingConfig, setup_logging};
use crate::mask::{MaskOptions, mask_tree};
use crate::tree::{self, Node};
use crate::types::{EnvPrefixes, SearchPath};

/// Environment variable naming one extra configuration file, loaded before
/// the discovered ones.
pub const CONFIG_ENV_VAR: &str = "LAYERFIG_CONFIG";

static DOTENV_LOADED: OnceCell<()> = OnceCell::new();

/// What to do after setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Configuration is ready; run the application.
    Ready,
    /// An action (help, version, show configuration) was handled; stop.
    Exit,
}

/// How [`Application::setup_configuration`] gathers its sources.
#[derive(Debug, Clone)]
pub struct SetupOptions {
    env_prefixes: EnvPrefixes,
    configuration_paths: Vec<PathBuf>,
    search_paths: Vec<SearchPath>,
    load_dotenv: bool,
    resolve_configuration: bool,
    setup_logging: bool,
    env: Env,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            env_prefixes: EnvPrefixes::default(),
            configuration_paths: Vec::new(),
            search_paths: SearchPath::defaults(),
            load_dotenv: true,
            resolve_configuration: true,
            setup_logging: true,
            env: Env::real(),
        }
    }
}

impl SetupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Which environment variables are loaded (default: [`EnvPrefixes::Auto`]).
    pub fn env_prefixes(mut self, prefixes: EnvPrefixes) -> Self {
        self.env_prefixes = prefixes;
        self
    }

    /// Extra configuration files, merged after the discovered ones. Paths
    /// that are not files are skipped.
    pub fn configuration_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.configuration_paths.push(path.into());
        self
    }

    /// Replace the discovery locations entirely.
    ///
    /// Paths are listed in **priority-ascending** order: the last entry has
    /// the highest priority.
    pub fn search_paths(mut self, paths: Vec<SearchPath>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Load `.env` (and `.env.local` next to it) into the process
    /// environment first. Done at most once per process.
    pub fn load_dotenv(mut self, load: bool) -> Self {
        self.load_dotenv = load;
        self
    }

    /// Resolve the whole tree after setup, failing early on missing
    /// mandatory values and broken interpolations (default: `true`).
    pub fn resolve_configuration(mut self, resolve: bool) -> Self {
        self.resolve_configuration = resolve;
        self
    }

    /// Install a `tracing` subscriber from the `logging` key (default: `true`).
    pub fn setup_logging(mut self, setup: bool) -> Self {
        self.setup_logging = setup;
        self
    }

    /// The environment to read instead of the process environment.
    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }
}

/// Builder for [`Application`].
#[derive(Debug, Default)]
pub struct ApplicationBuilder {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    short_description: Option<String>,
    parent: Option<Configuration>,
    options: SetupOptions,
}

impl ApplicationBuilder {
    /// The application name (default: the executable's file stem). It names
    /// the configuration files looked up during discovery.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Enables `-V/--version`.
    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    /// Shown in the help.
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Shown with the version, and in the help when there is no description.
    pub fn short_description(mut self, description: &str) -> Self {
        self.short_description = Some(description.to_string());
        self
    }

    /// Start from `parent` instead of the process-wide defaults.
    pub fn parent(mut self, parent: Configuration) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Options used by [`Application::try_run`] and [`Application::run`].
    pub fn options(mut self, options: SetupOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Application {
        Application {
            name: self.name.unwrap_or_else(default_name),
            version: self.version,
            description: self.description,
            short_description: self.short_description,
            parent: self.parent,
            options: self.options,
            configuration: None,
        }
    }
}

fn default_name() -> String {
    std::env::args_os()
        .next()
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "app".to_string())
}

/// An application: its description, how it loads configuration, and the
/// configuration once loaded.
///
/// ```ignore
/// fn main() {
///     let mut app = Application::builder().name("myapp").version("1.0").build();
///     app.run(|config| {
///         let url: String = config.get("server.url")?;
///         println!("connecting to {url}");
///         Ok(())
///     });
/// }
/// ```
#[derive(Debug)]
pub struct Application {
    name: String,
    version: Option<String>,
    description: Option<String>,
    short_description: Option<String>,
    parent: Option<Configuration>,
    options: SetupOptions,
    configuration: Option<Arc<Configuration>>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn short_description(&self) -> Option<&str> {
        self.short_description.as_deref()
    }

    pub fn options(&self) -> &SetupOptions {
        &self.options
    }

    /// The loaded configuration.
    pub fn configuration(&self) -> Result<&Arc<Configuration>, LayerfigError> {
        self.configuration.as_ref().ok_or(LayerfigError::NotConfigured)
    }

    /// Read `key` from the loaded configuration.
    pub fn get<T: DeserializeOwned + std::any::Any>(&self, key: &str) -> Result<T, LayerfigError> {
        self.configuration()?.get(key)
    }

    fn app_fragment(&self) -> Node {
        Node::from(json!({
            "application": {
                "name": self.name,
                "version": self.version.clone().unwrap_or_default(),
                "uuid": uuid::Uuid::new_v4().to_string(),
            }
        }))
    }

    /// Load and merge every source, then handle the parsed action.
    ///
    /// Sources, lowest priority first:
    ///
    /// 1. the parent configuration (the process-wide defaults by default)
    /// 2. `application.{name, version, uuid}`
    /// 3. the file named by `LAYERFIG_CONFIG`
    /// 4. files found in the search paths
    /// 5. the explicit configuration paths
    /// 6. environment variables
    /// 7. command-line fragments, in order
    ///
    /// Can only be called once successfully. On error the application stays
    /// unconfigured.
    pub fn setup_configuration(
        &mut self,
        parsed: ParseResult,
        options: &SetupOptions,
    ) -> Result<Outcome, LayerfigError> {
        if self.configuration.is_some() {
            return Err(LayerfigError::AlreadyConfigured);
        }
        tracing::debug!(app = %self.name, "start setup configuration");

        if options.load_dotenv {
            load_dotenv();
        }

        let parent = self.parent.clone().unwrap_or_else(context::defaults);
        let mut config = parent.with_env(options.env.clone());
        let mut merged = 1;

        config.merge_source(self.app_fragment());
        merged += 1;

        if let Some(path) = options.env.var(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
            merged += merge_file(&mut config, Path::new(&path))?;
        }
        for (path, node) in file::load_config_files(&options.search_paths, &self.name)? {
            tracing::debug!(path = %path.display(), "load configuration");
            config.merge_source(tree::normalize_keys(node));
            merged += 1;
        }
        for path in &options.configuration_paths {
            merged += merge_file(&mut config, path)?;
        }

        let env_source = match &options.env_prefixes {
            EnvPrefixes::Auto => Some((env::default_prefixes(config.tree()), PrefixMode::Keep)),
            EnvPrefixes::Explicit(prefixes) => Some((prefixes.clone(), PrefixMode::Strip)),
            EnvPrefixes::Disabled => None,
        };
        if let Some((prefixes, mode)) = env_source
            && !prefixes.is_empty()
        {
            tracing::debug!(?prefixes, "loading env configuration");
            let node = env::env_to_tree(&prefixes, mode, options.env.vars(), config.tree());
            config.merge_source(node);
            merged += 1;
        }

        for node in parsed.configurations()? {
            config.merge_source(tree::normalize_keys(node));
            merged += 1;
        }
        tracing::debug!(count = merged, "merged configurations");

        let config = Arc::new(config);

        if let Some(action) = parsed.action {
            self.configuration = Some(config);
            if let Some(text) = self.render_action(action)? {
                println!("{text}");
            }
            tracing::debug!(?action, "normal application exit");
            return Ok(Outcome::Exit);
        }
        if !parsed.rest.is_empty() {
            return Err(LayerfigError::Argument(format!(
                "Too many arguments {:?}",
                parsed.rest
            )));
        }

        if options.resolve_configuration {
            config.resolve_all()?;
        }

        if options.setup_logging {
            let logging = match config.get_opt::<Node>("logging")? {
                Some(node) => Some(LoggingConfig::from_node(&node)?),
                None => None,
            };
            setup_logging(logging.as_ref())?;
        }
        self.configuration = Some(config);
        Ok(Outcome::Ready)
    }

    /// [`setup_configuration`](Self::setup_configuration) with the process
    /// arguments and this application's options.
    #[cfg(feature = "clap")]
    pub fn setup_from_args(&mut self) -> Result<Outcome, LayerfigError> {
        let parsed = crate::cli::parse_args(
            &self.name,
            self.version.is_some(),
            std::env::args_os(),
        )?;
        let options = self.options.clone();
        self.setup_configuration(parsed, &options)
    }

    /// The text an action prints, if any.
    pub fn render_action(&self, action: Action) -> Result<Option<String>, LayerfigError> {
        Ok(match action {
            Action::ShowHelp => Some(self.help_text()),
            Action::ShowVersion => Some(self.version_text()),
            Action::ShowConfiguration => {
                let masked = self.masked_configuration(&MaskOptions::default())?;
                Some(
                    serde_yaml::to_string(&masked)
                        .map_err(|e| LayerfigError::InvalidConfiguration(e.to_string()))?,
                )
            }
            Action::Exit => None,
        })
    }

    /// Usage, description, options and the helper descriptions of the
    /// configuration keys.
    pub fn help_text(&self) -> String {
        let mut lines = vec![format!("usage: {} [arguments] [key=value ...]", self.name)];
        if let Some(description) = self.description.as_ref().or(self.short_description.as_ref()) {
            lines.push(String::new());
            lines.push(description.clone());
        }

        lines.push(String::new());
        lines.push("options:".to_string());
        for (option, help) in option_help(self.version.is_some()) {
            push_help_line(&mut lines, option, help);
        }

        let helpers = match &self.configuration {
            Some(config) => config.helpers().clone(),
            None => self
                .parent
                .as_ref()
                .map(|p| p.helpers().clone())
                .unwrap_or_else(|| context::defaults().helpers().clone()),
        };
        if !helpers.is_empty() {
            lines.push(String::new());
            lines.push("configuration:".to_string());
            for (key, help) in &helpers {
                push_help_line(&mut lines, key, help);
            }
        }
        lines.join("\n")
    }

    /// `name version`, then the short description.
    pub fn version_text(&self) -> String {
        let mut text = format!("{} {}", self.name, self.version.as_deref().unwrap_or_default());
        if let Some(description) = &self.short_description {
            text.push('\n');
            text.push_str(description);
        }
        text
    }

    /// A copy of the loaded tree prepared for display.
    pub fn masked_configuration(&self, options: &MaskOptions) -> Result<Node, LayerfigError> {
        Ok(mask_tree(self.configuration()?.tree(), options))
    }

    fn setup_default(&mut self) -> Result<Outcome, LayerfigError> {
        #[cfg(feature = "clap")]
        return self.setup_from_args();
        #[cfg(not(feature = "clap"))]
        {
            let options = self.options.clone();
            self.setup_configuration(ParseResult::new(), &options)
        }
    }

    /// Set up from the process arguments (when the `clap` feature is on) and
    /// run `main` with the configuration made current.
    ///
    /// Returns `Ok(None)` when an action ended the run or when `testing` is
    /// set in the configuration.
    pub fn try_run<T, F>(&mut self, main: F) -> Result<Option<T>, LayerfigError>
    where
        F: FnOnce(&Configuration) -> anyhow::Result<T>,
    {
        if self.setup_default()? == Outcome::Exit {
            return Ok(None);
        }
        self.run_main(main)
    }

    /// Run `main` against an already set up configuration.
    pub fn run_main<T, F>(&self, main: F) -> Result<Option<T>, LayerfigError>
    where
        F: FnOnce(&Configuration) -> anyhow::Result<T>,
    {
        let config = Arc::clone(self.configuration()?);
        if config.get_or("testing", false)? {
            tracing::info!(app = %self.name, "Application testing");
            return Ok(None);
        }
        for key in config.missing_keys() {
            tracing::warn!(key = %key, "Missing configuration key");
        }

        let _guard = context::enter(Arc::clone(&config));
        tracing::info!(app = %self.name, "Application start");
        match main(&config) {
            Ok(result) => {
                tracing::info!(app = %self.name, "Application end");
                Ok(Some(result))
            }
            Err(e) => {
                tracing::error!(app = %self.name, error = %e, "Application failed");
                Err(LayerfigError::Application(e))
            }
        }
    }

    /// [`try_run`](Self::try_run), exiting the process on errors and actions:
    /// 0 after an action, 2 on argument errors, 99 on missing mandatory
    /// values, 1 otherwise.
    pub fn run<T, F>(&mut self, main: F) -> Option<T>
    where
        F: FnOnce(&Configuration) -> anyhow::Result<T>,
    {
        match self.setup_default() {
            Ok(Outcome::Ready) => {}
            Ok(Outcome::Exit) => std::process::exit(0),
            Err(e) => exit_with(e),
        }
        self.run_main(main).unwrap_or_else(|e| exit_with(e))
    }
}

fn exit_with(error: LayerfigError) -> ! {
    match &error {
        // already logged by run_main
        LayerfigError::Application(_) => {}
        e if e.exit_code() == EXIT_MISSING_VALUE => {
            tracing::error!(error = %e, "missing configuration");
            eprintln!("{e}");
        }
        e => {
            tracing::error!(error = %e, "setup failed");
            eprintln!("{e}");
        }
    }
    std::process::exit(error.exit_code())
}

fn merge_file(config: &mut Configuration, path: &Path) -> Result<usize, LayerfigError> {
    if !path.is_file() {
        return Ok(0);
    }
    tracing::debug!(path = %path.display(), "load configuration");
    config.merge_source(tree::normalize_keys(file::read_configuration_file(path)?));
    Ok(1)
}

fn push_help_line(lines: &mut Vec<String>, name: &str, help: &str) {
    const WIDTH: usize = 27;
    if name.len() > WIDTH {
        lines.push(format!("  {name}"));
        if !help.is_empty() {
            lines.push(format!("{}{help}", " ".repeat(WIDTH + 3)));
        }
    } else {
        lines.push(format!("  {name:<WIDTH$} {help}").trim_end().to_string());
    }
}

fn load_dotenv() {
    DOTENV_LOADED.get_or_init(|| match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "loaded dotenv");
            let mut local = path.into_os_string();
            local.push(".local");
            let local = PathBuf::from(local);
            if local.is_file() {
                match dotenvy::from_path(&local) {
                    Ok(()) => tracing::debug!(path = %local.display(), "loaded dotenv"),
                    Err(e) => tracing::warn!(path = %local.display(), error = %e, "cannot load dotenv"),
                }
            }
        }
        Err(e) if e.not_found() => tracing::debug!("no dotenv file"),
        Err(e) => tracing::warn!(error = %e, "cannot load dotenv"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EXIT_ARGUMENT_ERROR, EXIT_MISSING_VALUE};
    use crate::fixtures::test::Server;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn options(vars: &[(&str, &str)]) -> SetupOptions {
        SetupOptions::new()
            .search_paths(vec![])
            .load_dotenv(false)
            .setup_logging(false)
            .env(Env::from_vars(vars.iter().copied()))
    }

    fn parent() -> Configuration {
        let mut config = Configuration::new();
        config
            .setup_with(
                Node::parse_yaml("server: {url: 'http://default', port: 8080}").unwrap(),
                [("server.url", "Where to connect")],
                "",
            )
            .unwrap();
        config
    }

    fn app() -> Application {
        Application::builder()
            .name("myapp")
            .version("1.2.3")
            .short_description("Does things")
            .parent(parent())
            .build()
    }

    fn url(app: &Application) -> String {
        app.get::<String>("server.url").unwrap()
    }

    #[test]
    fn sources_in_priority_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf.yaml");
        fs::write(&path, "server: {url: 'http://file'}").unwrap();

        let mut only_defaults = app();
        only_defaults
            .setup_configuration(ParseResult::new(), &options(&[]))
            .unwrap();
        assert_eq!(url(&only_defaults), "http://default");

        let mut with_file = app();
        with_file
            .setup_configuration(ParseResult::new(), &options(&[]).configuration_path(&path))
            .unwrap();
        assert_eq!(url(&with_file), "http://file");

        let mut with_env = app();
        with_env
            .setup_configuration(
                ParseResult::new(),
                &options(&[("SERVER_URL", "http://env")]).configuration_path(&path),
            )
            .unwrap();
        assert_eq!(url(&with_env), "http://env");

        let mut with_cli = app();
        with_cli
            .setup_configuration(
                ParseResult::new().with_assignment("server.url=http://cli"),
                &options(&[("SERVER_URL", "http://env")]).configuration_path(&path),
            )
            .unwrap();
        assert_eq!(url(&with_cli), "http://cli");
        assert_eq!(with_cli.get::<u16>("server.port").unwrap(), 8080);
    }

    #[test]
    fn discovered_files_and_config_env_var() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("myapp.toml"), "[server]\nport = 1\n").unwrap();
        let extra = dir.path().join("extra.json");
        fs::write(&extra, r#"{"server": {"port": 2, "url": "http://extra"}}"#).unwrap();

        let mut app = app();
        let extra = extra.to_string_lossy().to_string();
        app.setup_configuration(
            ParseResult::new(),
            &options(&[(CONFIG_ENV_VAR, extra.as_str())])
                .search_paths(vec![SearchPath::Path(dir.path().to_path_buf())]),
        )
        .unwrap();
        // discovered files override the LAYERFIG_CONFIG file
        assert_eq!(app.get::<u16>("server.port").unwrap(), 1);
        assert_eq!(url(&app), "http://extra");
    }

    #[test]
    fn explicit_env_prefixes_are_stripped() {
        let mut app = app();
        app.setup_configuration(
            ParseResult::new(),
            &options(&[("MYAPP_SERVER_PORT", "9000"), ("SERVER_URL", "http://ignored")])
                .env_prefixes(EnvPrefixes::Explicit(vec!["MYAPP_".into()])),
        )
        .unwrap();
        assert_eq!(app.get::<u16>("server.port").unwrap(), 9000);
        assert_eq!(url(&app), "http://default");
    }

    #[test]
    fn disabled_env() {
        let mut app = app();
        app.setup_configuration(
            ParseResult::new(),
            &options(&[("SERVER_URL", "http://env")]).env_prefixes(EnvPrefixes::Disabled),
        )
        .unwrap();
        assert_eq!(url(&app), "http://default");
    }

    #[test]
    fn application_fragment() {
        let mut app = app();
        app.setup_configuration(ParseResult::new(), &options(&[]))
            .unwrap();
        assert_eq!(app.get::<String>("application.name").unwrap(), "myapp");
        assert_eq!(app.get::<String>("application.version").unwrap(), "1.2.3");
        let id: String = app.get("application.uuid").unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn setup_only_once() {
        let mut app = app();
        app.setup_configuration(ParseResult::new(), &options(&[]))
            .unwrap();
        let again = app.setup_configuration(ParseResult::new(), &options(&[]));
        assert!(matches!(again, Err(LayerfigError::AlreadyConfigured)));
    }

    #[test]
    fn not_configured() {
        assert!(matches!(app().configuration(), Err(LayerfigError::NotConfigured)));
    }

    #[test]
    fn missing_mandatory_fails_setup() {
        let mut parent = parent();
        parent
            .setup_configuration(Node::parse_yaml("server: {token: '???'}").unwrap())
            .unwrap();
        let mut app = Application::builder().name("myapp").parent(parent).build();
        let err = app
            .setup_configuration(ParseResult::new(), &options(&[]))
            .unwrap_err();
        assert_eq!(err.exit_code(), EXIT_MISSING_VALUE);
        assert!(matches!(app.configuration(), Err(LayerfigError::NotConfigured)));
        assert!(matches!(
            app.run_main(|_| -> anyhow::Result<()> { panic!("must not run") }),
            Err(LayerfigError::NotConfigured)
        ));

        let mut lazy = Application::builder().name("myapp").parent(self::parent()).build();
        lazy.setup_configuration(
            ParseResult::new().with_assignment("server.token=???"),
            &options(&[]).resolve_configuration(false),
        )
        .unwrap();
        assert!(matches!(
            lazy.get::<String>("server.token"),
            Err(LayerfigError::MissingMandatoryValue { .. })
        ));
    }

    #[test]
    fn leftover_tokens_without_action() {
        let mut parsed = ParseResult::new();
        parsed.rest = vec!["extra".into()];
        let err = app()
            .setup_configuration(parsed.clone(), &options(&[]))
            .unwrap_err();
        assert_eq!(err.exit_code(), EXIT_ARGUMENT_ERROR);

        let mut retried = app();
        assert!(retried.setup_configuration(parsed.clone(), &options(&[])).is_err());
        assert!(retried.configuration().is_err());
        retried
            .setup_configuration(ParseResult::new(), &options(&[]))
            .unwrap();
        assert_eq!(url(&retried), "http://default");

        let outcome = app()
            .setup_configuration(parsed.with_action(Action::Exit), &options(&[]))
            .unwrap();
        assert_eq!(outcome, Outcome::Exit);
    }

    #[test]
    fn actions_exit_before_resolution() {
        let mut app = app();
        let outcome = app
            .setup_configuration(
                ParseResult::new()
                    .with_action(Action::ShowVersion)
                    .with_assignment("broken=${nowhere}"),
                &options(&[]),
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Exit);
    }

    #[test]
    fn help_lists_options_and_helpers() {
        let app = app();
        let help = app.help_text();
        assert!(help.starts_with("usage: myapp [arguments] [key=value ...]"));
        assert!(help.contains("Does things"));
        assert!(help.contains("-V, --version"));
        assert!(help.contains("  server.url"));
        assert!(help.contains("Where to connect"));

        let no_version = Application::builder().name("x").parent(parent()).build();
        assert!(!no_version.help_text().contains("--version"));
    }

    #[test]
    fn version_text() {
        assert_eq!(app().version_text(), "myapp 1.2.3\nDoes things");
    }

    #[test]
    fn show_configuration_is_masked() {
        let mut app = app();
        app.setup_configuration(
            ParseResult::new().with_assignment("server.password=hunter2"),
            &options(&[]),
        )
        .unwrap();
        let text = app
            .render_action(Action::ShowConfiguration)
            .unwrap()
            .unwrap();
        assert!(text.contains(MASK_TEXT));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("uuid"));
        assert!(text.contains("http://default"));
    }

    const MASK_TEXT: &str = crate::mask::MASK;

    #[test]
    #[serial]
    fn run_main_enters_context() {
        let mut app = app();
        app.setup_configuration(ParseResult::new(), &options(&[]))
            .unwrap();
        let seen = app
            .run_main(|config| {
                let from_context: String = crate::context::get("server.url")?;
                assert_eq!(from_context, config.get::<String>("server.url")?);
                Ok(from_context)
            })
            .unwrap();
        assert_eq!(seen.as_deref(), Some("http://default"));
        assert!(crate::context::current().is_none());
    }

    #[test]
    fn run_main_skips_when_testing() {
        let mut app = app();
        app.setup_configuration(ParseResult::new().with_assignment("testing=true"), &options(&[]))
            .unwrap();
        let result = app.run_main(|_| -> anyhow::Result<()> { panic!("must not run") });
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    #[serial]
    fn main_errors_are_application_errors() {
        let mut app = app();
        app.setup_configuration(ParseResult::new(), &options(&[]))
            .unwrap();
        let err = app
            .run_main(|_| -> anyhow::Result<()> { anyhow::bail!("boom") })
            .unwrap_err();
        assert!(matches!(err, LayerfigError::Application(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    #[serial]
    fn starts_from_context_defaults() {
        crate::context::reset_defaults();
        crate::context::setup_value(&Server::default(), "server").unwrap();
        let mut app = Application::builder().name("ctx").build();
        app.setup_configuration(ParseResult::new(), &options(&[("SERVER_PORT", "81")]))
            .unwrap();
        let server: Server = app.configuration().unwrap().get_type().unwrap();
        assert_eq!(server.port, 81);
        assert_eq!(server.url, "http://default");
        // built-in logging presets come along
        assert!(app.get::<Node>("base.logging.default.root").is_ok());
        crate::context::reset_defaults();
    }
}
