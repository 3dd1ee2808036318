//! Clap adapter for layerfig.
//!
//! This module is the **optional integration layer** between layerfig's
//! framework-agnostic core and the [clap](https://docs.rs/clap) CLI parser.
//! It is compiled only when the `clap` Cargo feature is enabled (on by
//! default).
//!
//! [`configure_command`] adds the configuration arguments to a clap
//! [`Command`], so an application can keep its own arguments next to them:
//!
//! ```text
//! -h, --help                  Show the help
//! -V, --version               Show the version (only with a version)
//! -C, --configuration         Show the configuration
//! -f, --config PATH           Load configuration from file
//! --select KEY=TEMPLATE       Shortcut to select a base configuration
//! key=value                   Configuration items
//! -- ...                      Everything after is left to the application
//! ```
//!
//! [`parse_matches`] turns the matches into a [`ParseResult`]. Files given
//! with `-f` are read right away; fragments keep their command-line order.
//! Without clap, build a [`ParseResult`] directly.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::args::{Action, Fragment, ParseResult, select_assignment};
use crate::error::LayerfigError;
use crate::file::read_configuration_file;

const HELP: &str = "help";
const VERSION: &str = "version";
const CONFIGURATION: &str = "configuration";
const CONFIG_FILE: &str = "config_file";
const SELECT: &str = "select";
const ASSIGNMENTS: &str = "assignments";
const REST: &str = "rest";

/// Add the configuration arguments to `command`. Clap's own help and version
/// flags are replaced by actions. `-V` is only added `with_version`.
pub fn configure_command(command: Command, with_version: bool) -> Command {
    let mut command = command
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new(HELP)
                .short('h')
                .long("help")
                .action(ArgAction::SetTrue)
                .help("Show the help"),
        );
    if with_version {
        command = command.arg(
            Arg::new(VERSION)
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Show the version"),
        );
    }
    command
        .arg(
            Arg::new(CONFIGURATION)
                .short('C')
                .long("configuration")
                .action(ArgAction::SetTrue)
                .help("Show the configuration"),
        )
        .arg(
            Arg::new(CONFIG_FILE)
                .short('f')
                .long("config")
                .visible_alias("config-file")
                .value_name("path")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Load configuration from file"),
        )
        .arg(
            Arg::new(SELECT)
                .long("select")
                .value_name("key=base_template")
                .action(ArgAction::Append)
                .help("Shortcut to select a base configuration"),
        )
        .arg(
            Arg::new(ASSIGNMENTS)
                .value_name("key=value")
                .num_args(0..)
                .action(ArgAction::Append)
                .value_parser(|value: &str| -> Result<String, String> {
                    if value.contains('=') {
                        Ok(value.to_string())
                    } else {
                        Err(format!("Unrecognized argument: {value}"))
                    }
                })
                .help("Configuration items"),
        )
        .arg(
            Arg::new(REST)
                .num_args(0..)
                .last(true)
                .action(ArgAction::Append)
                .hide(true),
        )
}

/// Read a [`ParseResult`] out of matches produced by a command set up with
/// [`configure_command`].
pub fn parse_matches(matches: &ArgMatches) -> Result<ParseResult, LayerfigError> {
    let mut result = ParseResult::new();

    // The first action on the command line wins.
    let mut actions: Vec<(usize, Action)> = [
        (HELP, Action::ShowHelp),
        (VERSION, Action::ShowVersion),
        (CONFIGURATION, Action::ShowConfiguration),
    ]
    .into_iter()
    .filter(|(id, _)| flag_set(matches, id))
    .map(|(id, action)| (matches.index_of(id).unwrap_or(usize::MAX), action))
    .collect();
    actions.sort_by_key(|(index, _)| *index);
    result.action = actions.first().map(|(_, action)| *action);

    let mut fragments: Vec<(usize, Fragment)> = Vec::new();
    for (index, path) in indexed::<PathBuf>(matches, CONFIG_FILE) {
        tracing::debug!(path = %path.display(), "loading configuration file from arguments");
        fragments.push((index, Fragment::Tree(read_configuration_file(&path)?)));
    }
    for (index, select) in indexed::<String>(matches, SELECT) {
        fragments.push((index, Fragment::Assignment(select_assignment(&select)?)));
    }
    for (index, assignment) in indexed::<String>(matches, ASSIGNMENTS) {
        fragments.push((index, Fragment::Assignment(assignment)));
    }
    fragments.sort_by_key(|(index, _)| *index);
    result.fragments = fragments.into_iter().map(|(_, f)| f).collect();

    result.rest = matches
        .get_many::<String>(REST)
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    Ok(result)
}

/// Parse `args` (including the program name) with the configuration
/// arguments only.
pub fn parse_args<I, T>(name: &str, with_version: bool, args: I) -> Result<ParseResult, LayerfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let command = configure_command(Command::new(name.to_string()), with_version);
    let matches = command
        .try_get_matches_from(args)
        .map_err(|e| LayerfigError::Argument(e.to_string().trim_end().to_string()))?;
    parse_matches(&matches)
}

fn flag_set(matches: &ArgMatches, id: &str) -> bool {
    matches
        .try_get_one::<bool>(id)
        .ok()
        .flatten()
        .copied()
        .unwrap_or(false)
}

fn indexed<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Vec<(usize, T)> {
    match (matches.indices_of(id), matches.get_many::<T>(id)) {
        (Some(indices), Some(values)) => indices.zip(values.cloned()).collect(),
        _ => Vec::new(),
    }
}
