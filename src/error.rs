use std::{fmt, num::ParseIntError};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised before or around the protocol exchange.
///
/// Transport failures and error codes sent by the daemon are not part of
/// this type: they come back as a failed [crate::Reply] or
/// [crate::Outcome::Failure], so that the caller always gets the daemon's
/// own message.
#[derive(Debug)]
pub enum Error {
    /// The address family selector was neither `ipv4` nor `ipv6`
    InvalidAddressFamily(String),
    /// A command template references a placeholder for which no argument
    /// was supplied
    MissingArgument(String),
    /// An argument can't be placed on the command line, e.g. because it
    /// contains a newline
    InvalidArgument(String),
    /// If we received a token which was not what we were
    /// supposed to get
    InvalidToken(String),
    /// A file or alias operation in the config folder failed
    StorageError {
        context: String,
        source: std::io::Error,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidAddressFamily(family) => write!(f, "invalid IP version: {}", family),
            Error::MissingArgument(name) => write!(f, "argument {} not specified", name),
            Error::InvalidArgument(reason) => write!(f, "invalid argument: {}", reason),
            Error::InvalidToken(token) => write!(f, "received invalid token: {}", token),
            Error::StorageError { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StorageError { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Error {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageError {
            context: context.into(),
            source,
        }
    }
}

impl From<ParseIntError> for Error {
    fn from(err: ParseIntError) -> Self {
        Error::InvalidToken(format!("failed to parse as integer: {}", err))
    }
}
