//! Classification of reply lines and accumulation of a [Reply].
//!
//! Every line the daemon sends is one of:
//! 1. `xxxx<space><content>` - a coded line, last one of the reply
//! 2. `xxxx<minus><content>` - a coded line, more lines follow
//! 3. `<space><content>` - continuation of the previous line
//! 4. `+<content>` - continuation glued to the previous text without a newline
//!
//! More details about the protocol can be found [here](https://gitlab.nic.cz/labs/bird/-/blob/master/nest/cli.c)

/// Description of a success code, or `None` if `code` isn't one
pub fn success_description(code: u32) -> Option<&'static str> {
    Some(match code {
        0 => "OK",
        1 => "Welcome",
        2 => "Reading configuration",
        3 => "Reconfigured",
        4 => "Reconfiguration in progress",
        5 => "Reconfiguration already in progress, queueing",
        6 => "Reconfiguration ignored, shutting down",
        7 => "Shutdown ordered",
        8 => "Already disabled",
        9 => "Disabled",
        10 => "Already enabled",
        11 => "Enabled",
        12 => "Restarted",
        13 => "Status report",
        14 => "Route count",
        15 => "Reloading",
        16 => "Access restricted",
        17 => "Reconfiguration already in progress, removing queued config",
        18 => "Reconfiguration confirmed",
        19 => "Nothing to do (configure undo/confirm)",
        20 => "Configuration OK",
        21 => "Undo requested",
        22 => "Undo scheduled",
        23 => "Evaluation of expression",
        24 => "Graceful restart status report",
        _ => return None,
    })
}

/// Description of an error code, or `None` if `code` isn't one
pub fn error_description(code: u32) -> Option<&'static str> {
    Some(match code {
        8000 => "Reply too long",
        8001 => "Route not found",
        8002 => "Configuration file error",
        8003 => "No protocols match",
        8004 => "Stopped due to reconfiguration",
        8005 => "Protocol is down => cannot dump",
        8006 => "Reload failed",
        8007 => "Access denied",
        8008 => "Evaluation runtime error",
        9000 => "Command too long",
        9001 => "Parse error",
        9002 => "Invalid symbol type",
        _ => return None,
    })
}

/// How a continuation line joins the text before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// `<space><content>`, appended as a line of its own
    Newline,
    /// `+<content>`, appended verbatim
    Joined,
}

/// A single reply line, classified by its leading code or marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// A success code. `last` is false when the code was followed by `-`,
    /// i.e. the daemon has more to say before the reply ends.
    Success {
        code: u32,
        last: bool,
        payload: &'a str,
    },
    /// An error code, which always ends the reply
    Error {
        code: u32,
        description: &'static str,
        payload: &'a str,
    },
    /// A data or table line (codes `1xxx` and `2xxx`)
    Data { payload: &'a str },
    Continuation {
        kind: Continuation,
        payload: &'a str,
    },
    /// Anything we couldn't make sense of
    Unparsable(&'a str),
}

impl<'a> Line<'a> {
    pub fn classify(line: &'a str) -> Line<'a> {
        let payload = line.get(5..).unwrap_or("");
        if let Some(code) = parse_code(line) {
            if success_description(code).is_some() {
                // `-` means more lines of this reply follow, as after
                // `0002-Reading configuration`, so only a space ends it
                return Line::Success {
                    code,
                    last: line.as_bytes().get(4) != Some(&b'-'),
                    payload,
                };
            }
            if let Some(description) = error_description(code) {
                return Line::Error {
                    code,
                    description,
                    payload,
                };
            }
        }
        match line.as_bytes().first() {
            Some(b'1') | Some(b'2') => Line::Data { payload },
            Some(b' ') => Line::Continuation {
                kind: Continuation::Newline,
                payload: &line[1..],
            },
            Some(b'+') => Line::Continuation {
                kind: Continuation::Joined,
                payload: &line[1..],
            },
            _ => Line::Unparsable(line),
        }
    }

    /// Whether reading of the reply stops at this line
    pub fn is_terminal(&self) -> bool {
        match self {
            Line::Success { last, .. } => *last,
            Line::Error { .. } => true,
            _ => false,
        }
    }
}

/// Parse the 4 digit code at the front of a bird response line
#[inline]
fn parse_code(line: &str) -> Option<u32> {
    let code = line.get(0..4)?;
    if code.bytes().all(|b| b.is_ascii_digit()) {
        code.parse().ok()
    } else {
        None
    }
}

/// The outcome of a request together with the text the daemon sent back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub success: bool,
    pub text: String,
}

impl Reply {
    /// A failed reply carrying `text`
    pub fn failure(text: impl Into<String>) -> Self {
        Reply {
            success: false,
            text: text.into(),
        }
    }
}

/// Returned by [ReplyBuilder::push] to tell the reader whether to go on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Incomplete,
    Complete,
}

/// Accumulates classified lines into a [Reply].
///
/// In blank-line-significant mode an empty line completes the reply on its
/// own. Some commands (`show protocols all`) emit self-contained listings
/// and the daemon only sends a terminal code once everything is out.
#[derive(Debug)]
pub struct ReplyBuilder {
    blank_line_significant: bool,
    ended_on_blank_line: bool,
    success: bool,
    text: String,
}

impl ReplyBuilder {
    pub fn new(blank_line_significant: bool) -> Self {
        ReplyBuilder {
            blank_line_significant,
            ended_on_blank_line: false,
            success: true,
            text: String::new(),
        }
    }

    /// Processes one raw line
    pub fn push(&mut self, line: &str) -> Progress {
        if line.trim().is_empty() {
            if !self.blank_line_significant {
                return Progress::Incomplete;
            }
            // single spaces separate sections, only a truly empty line ends
            if line.is_empty() {
                log::trace!("reply: empty line ends reply");
                self.ended_on_blank_line = true;
                return Progress::Complete;
            }
        }

        let classified = Line::classify(line);
        match &classified {
            Line::Success { code, payload, .. } => {
                self.success = true;
                if *code != 0 {
                    self.text.push_str(payload);
                    self.text.push('\n');
                }
            }
            Line::Error {
                code,
                description,
                payload,
            } => {
                log::debug!("reply: error code {:04}: {}", code, payload);
                self.success = false;
                self.text.push_str(description);
                self.text.push_str(": ");
                self.text.push_str(payload);
                self.text.push('\n');
            }
            Line::Data { payload }
            | Line::Continuation {
                kind: Continuation::Newline,
                payload,
            } => {
                self.text.push_str(payload);
                self.text.push('\n');
            }
            Line::Continuation {
                kind: Continuation::Joined,
                payload,
            } => self.text.push_str(payload),
            Line::Unparsable(raw) => {
                log::warn!("reply: unparsable line {:?}", raw);
                self.text.push_str("<<<unparsable_string(");
                self.text.push_str(raw);
                self.text.push_str(")>>>\n");
            }
        }

        if classified.is_terminal() {
            Progress::Complete
        } else {
            Progress::Incomplete
        }
    }

    /// Whether the reply was completed by an empty line, in which case the
    /// daemon still has the rest of its output and a terminal code to send
    pub fn ended_on_blank_line(&self) -> bool {
        self.ended_on_blank_line
    }

    pub fn finish(self) -> Reply {
        Reply {
            success: self.success,
            text: self.text,
        }
    }
}
