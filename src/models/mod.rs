//! All structured models of the Bird client protocol

mod session;
pub use session::*;
