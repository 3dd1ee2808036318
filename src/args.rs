//! The outcome of command-line parsing, independent of any CLI framework.
//!
//! The [`cli`](crate::cli) module fills a [`ParseResult`] from clap matches;
//! programs with their own parser can build one directly.

use crate::env::parse_value;
use crate::error::LayerfigError;
use crate::tree::{self, Node};

/// What the command line asked the application to do instead of running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Print the masked configuration as YAML and exit.
    ShowConfiguration,
    /// Print usage, options and configuration helpers and exit.
    ShowHelp,
    /// Print `name version` and the short description and exit.
    ShowVersion,
    /// Exit without output.
    Exit,
}

/// One configuration item from the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// `key=value`; the value is parsed like an environment value.
    Assignment(String),
    /// A whole tree, e.g. the content of a `-f` file.
    Tree(Node),
}

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub action: Option<Action>,
    /// Configuration items, in command-line order.
    pub fragments: Vec<Fragment>,
    /// Tokens after `--`, left for the application.
    pub rest: Vec<String>,
}

impl ParseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_assignment(mut self, assignment: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Assignment(assignment.into()));
        self
    }

    pub fn with_tree(mut self, node: Node) -> Self {
        self.fragments.push(Fragment::Tree(node));
        self
    }

    /// The fragments as trees to merge, in order. Consecutive assignments
    /// are grouped into one tree.
    pub fn configurations(&self) -> Result<Vec<Node>, LayerfigError> {
        let mut out = Vec::new();
        let mut pending: Option<Node> = None;
        for fragment in &self.fragments {
            match fragment {
                Fragment::Assignment(assignment) => {
                    let (key, value) = split_assignment(assignment)?;
                    let target = pending.get_or_insert_with(Node::mapping);
                    tree::set_path(target, key, parse_value(value))?;
                }
                Fragment::Tree(node) => {
                    out.extend(pending.take());
                    out.push(node.clone());
                }
            }
        }
        out.extend(pending);
        Ok(out)
    }
}

/// Option lines for the application help, in display order.
pub fn option_help(with_version: bool) -> Vec<(&'static str, &'static str)> {
    let mut lines = vec![("-h, --help", "Show the help")];
    if with_version {
        lines.push(("-V, --version", "Show the version"));
    }
    lines.extend([
        ("-C, --configuration", "Show the configuration"),
        ("-f, --config, --config-file path", "Load configuration from file"),
        ("--select key=base_template", "Shortcut to select a base configuration"),
        ("key=value", "Configuration items"),
    ]);
    lines
}

/// Split `key=value` at the first `=`.
pub fn split_assignment(assignment: &str) -> Result<(&str, &str), LayerfigError> {
    match assignment.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        Some(_) => Err(LayerfigError::Argument(format!(
            "{assignment}: missing key before '='"
        ))),
        None => Err(LayerfigError::Argument(format!(
            "{assignment}: argument should be in format key=value"
        ))),
    }
}

/// `--select key=template` as an assignment:
/// `key=${select:base.key.template}`. An empty template selects `default`.
pub fn select_assignment(argument: &str) -> Result<String, LayerfigError> {
    let (key, template) = match argument.split_once('=') {
        Some((key, template)) => (key.trim(), template.trim()),
        None => (argument.trim(), ""),
    };
    if key.is_empty() {
        return Err(LayerfigError::Argument(format!(
            "--select {argument}: missing key"
        )));
    }
    let template = if template.is_empty() { "default" } else { template };
    Ok(format!("{key}=${{select:base.{key}.{template}}}"))
}
