use std::io;

use thiserror::Error;

/// Why a connection never made it past the handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("nickname is empty or whitespace")]
    InvalidNickname,
    #[error("handshake i/o failed")]
    Io(#[from] io::Error),
}

/// A client line that could not be turned into a [`Message`](crate::message::Message).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line has no ':' separating recipient from text")]
    MissingSeparator,
}
