//! Module for BGP peer sessions, as listed by `show protocols all`

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::net::IpAddr;

use crate::{Error, Result};

/// Route counters of a session's channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Prefixes {
    pub imported: u64,
    pub exported: u64,
    pub preferred: u64,
}

/// One BGP peering session. Only protocols named `peer_*` are considered
/// peer sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSession {
    /// Name of the protocol instance, e.g. `peer_as64496`
    pub session_name: String,
    pub description: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub as_number: Option<u32>,
    /// BGP state, e.g. `Established`, `Active`
    pub bgp_state: Option<String>,
    pub prefixes: Prefixes,
}

/// Collects the fields of a [PeerSession] while its lines are read
#[derive(Debug)]
pub(crate) struct PeerSessionBuilder {
    session_name: String,
    description: Option<String>,
    ip_address: Option<IpAddr>,
    as_number: Option<u32>,
    bgp_state: Option<String>,
    prefixes: Prefixes,
}

impl PeerSessionBuilder {
    fn new(session_name: impl Into<String>) -> Self {
        PeerSessionBuilder {
            session_name: session_name.into(),
            description: None,
            ip_address: None,
            as_number: None,
            bgp_state: None,
            prefixes: Prefixes::default(),
        }
    }

    fn build(self) -> PeerSession {
        PeerSession {
            session_name: self.session_name,
            description: self.description,
            ip_address: self.ip_address,
            as_number: self.as_number,
            bgp_state: self.bgp_state,
            prefixes: self.prefixes,
        }
    }
}

static PEER_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<session_name>peer_\S+)").expect("peer regex should be valid")
});

type FieldSetter = fn(&mut PeerSessionBuilder, &Captures) -> Result<()>;

/// A labelled pattern and what to do with its captures
struct FieldRule {
    field: &'static str,
    pattern: Regex,
    apply: FieldSetter,
}

impl FieldRule {
    fn new(field: &'static str, pattern: &str, apply: FieldSetter) -> Self {
        FieldRule {
            field,
            pattern: Regex::new(pattern).expect("field regex should be valid"),
            apply,
        }
    }
}

// tried in order, the first match wins
static FIELD_RULES: Lazy<Vec<FieldRule>> = Lazy::new(|| {
    vec![
        FieldRule::new(
            "description",
            r"^\s*Description:\s+(?P<description>.*)$",
            |b: &mut PeerSessionBuilder, c: &Captures| {
                b.description = Some(c["description"].to_owned());
                Ok(())
            },
        ),
        // bird 1.x adds a filtered count, bird 2 labels the exported one
        FieldRule::new(
            "prefixes",
            r"^\s*Routes:\s+(?P<imported>[0-9]+) imported, (?:[0-9]+ filtered, )?(?P<exported>[0-9]+)(?: exported)?, (?P<preferred>[0-9]+) preferred$",
            |b: &mut PeerSessionBuilder, c: &Captures| {
                b.prefixes = Prefixes {
                    imported: c["imported"].parse()?,
                    exported: c["exported"].parse()?,
                    preferred: c["preferred"].parse()?,
                };
                Ok(())
            },
        ),
        FieldRule::new(
            "bgp_state",
            r"^\s*BGP state:\s+(?P<bgp_state>\w+)$",
            |b: &mut PeerSessionBuilder, c: &Captures| {
                b.bgp_state = Some(c["bgp_state"].to_owned());
                Ok(())
            },
        ),
        FieldRule::new(
            "ip_address",
            r"^\s*Neighbor address:\s+(?P<ip_address>[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+|[0-9A-Fa-f:]*:[0-9A-Fa-f:.]*)(?:%\S+)?$",
            |b: &mut PeerSessionBuilder, c: &Captures| {
                let address = &c["ip_address"];
                b.ip_address = Some(address.parse().map_err(|_| {
                    Error::InvalidToken(format!("invalid neighbor address {}", address))
                })?);
                Ok(())
            },
        ),
        FieldRule::new(
            "as_number",
            r"^\s*Neighbor AS:\s+(?P<as_number>[0-9]+)$",
            |b: &mut PeerSessionBuilder, c: &Captures| {
                b.as_number = Some(c["as_number"].parse()?);
                Ok(())
            },
        ),
    ]
});

/// Parses the text of a `show protocols all` reply into the peer sessions
/// it lists.
///
/// A line whose first token starts with `peer_` opens a session, and the
/// lines up to the next blank line fill it in. Lines outside a session are
/// ignored, so non-peer protocols are skipped. An open session is also
/// closed by the start of the next one and by the end of the text.
///
/// Fails only if a matched number or address doesn't fit its type.
pub fn parse_sessions(text: &str) -> Result<Vec<PeerSession>> {
    let mut sessions = vec![];
    let mut current: Option<PeerSessionBuilder> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            if let Some(builder) = current.take() {
                sessions.push(builder.build());
            }
            continue;
        }

        if let Some(caps) = PEER_START.captures(line) {
            if let Some(builder) = current.take() {
                log::debug!(
                    "session: {} closed by the start of another session",
                    builder.session_name
                );
                sessions.push(builder.build());
            }
            current = Some(PeerSessionBuilder::new(&caps["session_name"]));
            continue;
        }

        let builder = match current.as_mut() {
            Some(builder) => builder,
            None => continue,
        };
        let matched = FIELD_RULES
            .iter()
            .find_map(|rule| rule.pattern.captures(line).map(|caps| (rule, caps)));
        if let Some((rule, caps)) = matched {
            log::trace!("session: {} matched {}", builder.session_name, rule.field);
            (rule.apply)(builder, &caps)?;
        }
    }

    if let Some(builder) = current.take() {
        sessions.push(builder.build());
    }
    Ok(sessions)
}
