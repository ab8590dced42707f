//! Declarative command definitions.
//!
//! A command is a template with `{name}` placeholders, a flag saying how
//! its reply is delimited, and a post-processing step turning the reply
//! text into the command's output.

use serde::Deserialize;
use std::{fmt, str::FromStr};

use crate::{parse_sessions, Error, PeerSession, Reply, Result, Transport};

/// What a command gives back to its caller: either its (possibly
/// structured) output, or the failure message received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    Failure(String),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The output, if the command succeeded
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(output) => Some(output),
            Outcome::Failure(_) => None,
        }
    }

    /// The failure message, if the command failed
    pub fn failure(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(message) => Some(message),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, op: F) -> Outcome<U> {
        match self {
            Outcome::Success(output) => Outcome::Success(op(output)),
            Outcome::Failure(message) => Outcome::Failure(message),
        }
    }
}

pub trait Command {
    type Output;

    fn template(&self) -> &str;

    /// Whether the reply ends at the first empty line rather than at a
    /// terminal code
    fn blank_line_significant(&self) -> bool {
        false
    }

    /// Turns the text of a successful reply into the output
    fn parse_reply(&self, text: String) -> Outcome<Self::Output>;

    /// Formats the command line from `args`
    fn render(&self, args: &[(&str, &str)]) -> Result<String> {
        render_template(self.template(), args)
    }

    /// A failed reply is passed through untouched, a successful one goes
    /// through [Command::parse_reply]
    fn finish(&self, reply: Reply) -> Outcome<Self::Output> {
        if reply.success {
            self.parse_reply(reply.text)
        } else {
            Outcome::Failure(reply.text)
        }
    }

    fn execute<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        args: &[(&str, &str)],
    ) -> Result<Outcome<Self::Output>> {
        let request = self.render(args)?;
        log::debug!("cmd: executing {:?}", request);
        let reply = transport.execute(&request, self.blank_line_significant());
        Ok(self.finish(reply))
    }
}

/// Fills `{name}` placeholders of `template` from `args`. `{{` and `}}`
/// stand for literal braces.
pub fn render_template(template: &str, args: &[(&str, &str)]) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                result.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                result.push('}');
            }
            '{' => {
                let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
                let value = args
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| Error::MissingArgument(name.clone()))?;
                if value.contains(|c: char| c == '\n' || c == '\r') {
                    return Err(Error::InvalidArgument(format!(
                        "{} contains a line break",
                        name
                    )));
                }
                result.push_str(value);
            }
            _ => result.push(c),
        }
    }
    Ok(result.trim_end().to_owned())
}

/// A command whose output is the reply text itself
#[derive(Debug, Clone, Copy)]
pub struct TextCommand {
    template: &'static str,
    blank_line_significant: bool,
}

impl TextCommand {
    pub const fn new(template: &'static str) -> Self {
        TextCommand {
            template,
            blank_line_significant: false,
        }
    }

    /// Makes the reply end at the first empty line
    pub const fn until_blank_line(mut self) -> Self {
        self.blank_line_significant = true;
        self
    }
}

impl Command for TextCommand {
    type Output = String;

    fn template(&self) -> &str {
        self.template
    }

    fn blank_line_significant(&self) -> bool {
        self.blank_line_significant
    }

    fn parse_reply(&self, text: String) -> Outcome<String> {
        Outcome::Success(text)
    }
}

/// Checks a configuration file without activating it
pub const VALIDATE_CONFIG: TextCommand = TextCommand::new("configure check \"{config_filename}\"");

/// Activates a configuration file
pub const APPLY_CONFIG: TextCommand = TextCommand::new("configure \"{config_filename}\"");

/// Route lookup, `selector` is rendered by [RouteQuery::selector]
pub const SHOW_ROUTE: TextCommand = TextCommand::new("show route{selector}");

/// `show protocols all`, optionally filtered by a `wildcard`, parsed into
/// the BGP peer sessions it lists
#[derive(Debug, Clone, Copy, Default)]
pub struct ShowProtocolsAll;

impl Command for ShowProtocolsAll {
    type Output = Vec<PeerSession>;

    fn template(&self) -> &str {
        "show protocols all {wildcard}"
    }

    fn blank_line_significant(&self) -> bool {
        true
    }

    fn parse_reply(&self, text: String) -> Outcome<Vec<PeerSession>> {
        match parse_sessions(&text) {
            Ok(sessions) => Outcome::Success(sessions),
            Err(err) => {
                log::error!("cmd: failed to parse sessions: {}", err);
                Outcome::Failure(err.to_string())
            }
        }
    }
}

/// Which side of a protocol's export filter `show route` looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Routes exported after the filter
    Export,
    /// Routes offered to the filter
    Preexport,
    /// Routes rejected by the filter
    Noexport,
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportMode::Export => "export",
            ExportMode::Preexport => "preexport",
            ExportMode::Noexport => "noexport",
        })
    }
}

impl FromStr for ExportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "export" => Ok(ExportMode::Export),
            "preexport" => Ok(ExportMode::Preexport),
            "noexport" => Ok(ExportMode::Noexport),
            _ => Err(Error::InvalidArgument(format!("unknown export mode {}", s))),
        }
    }
}

/// Parameters of a `show route` lookup. Every field is optional, an empty
/// query lists the whole default table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouteQuery {
    /// Look the prefix up in the forwarding table (`for <prefix>`)
    pub forwarding_table: bool,
    pub prefix: Option<String>,
    pub table: Option<String>,
    pub filter: Option<String>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    /// Show all route attributes (`all`)
    pub detail: bool,
    pub export_mode: Option<ExportMode>,
    pub export_protocol: Option<String>,
    pub protocol: Option<String>,
}

impl RouteQuery {
    /// Renders the part of the command line after `show route`, with a
    /// leading space unless empty
    pub fn selector(&self) -> Result<String> {
        let mut parts: Vec<String> = vec![];
        if let Some(prefix) = &self.prefix {
            if self.forwarding_table {
                parts.push(format!("for {}", prefix));
            } else {
                parts.push(prefix.clone());
            }
        }
        if let Some(table) = &self.table {
            parts.push(format!("table {}", table));
        }
        match (&self.filter, &self.where_clause) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidArgument(
                    "filter and where are mutually exclusive".into(),
                ))
            }
            (Some(filter), None) => parts.push(format!("filter {}", filter)),
            (None, Some(condition)) => parts.push(format!("where {}", condition)),
            (None, None) => {}
        }
        match (self.export_mode, &self.export_protocol) {
            (Some(mode), Some(protocol)) => parts.push(format!("{} {}", mode, protocol)),
            (Some(mode), None) => {
                return Err(Error::InvalidArgument(format!(
                    "{} needs a protocol",
                    mode
                )))
            }
            (None, _) => {}
        }
        if let Some(protocol) = &self.protocol {
            parts.push(format!("protocol {}", protocol));
        }
        if self.detail {
            parts.push("all".into());
        }

        if parts.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" {}", parts.join(" ")))
        }
    }
}
