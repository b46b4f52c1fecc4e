use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ParseError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Prompt written as soon as a connection is accepted. No trailing newline.
pub const AUTH_PROMPT: &str = "auth";

/// Written before closing a connection that supplied a blank nickname.
pub const INVALID_USERNAME: &str = "Invalid Username\n";

/// Greeting written once a session has been registered.
pub fn welcome(nickname: &str) -> String {
    format!("Welcome, {nickname}!\n\n")
}

/// A routed chat line in transit between a receive loop, the broker and an
/// outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub content: String,
}

impl Message {
    /// Parses a raw client line of the form `<recipient>:<text>`.
    ///
    /// Only the first colon separates; everything after it, including the
    /// line terminator, is kept verbatim in the delivered content.
    pub fn parse(from: &str, line: &str) -> Result<Self, ParseError> {
        let (to, text) = line.split_once(':').ok_or(ParseError::MissingSeparator)?;
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            content: format!("{from}: {text}"),
        })
    }
}

/// Reads one `\n`-terminated line, keeping the terminator.
///
/// Invalid UTF-8 is replaced rather than treated as a fatal error. Returns
/// `None` at end of stream.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(LINE_ENDINGS)
}

pub async fn write_text<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}
