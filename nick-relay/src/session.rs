use std::io;

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::mpsc,
};
use tracing::debug;

use crate::{
    broker::{BrokerHandle, SessionHandle, SessionId},
    message::{Message, read_line, write_text},
};

/// Lifecycle of one connection.
///
/// `Authenticating` moves straight to `Closed` when the nickname is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// One authenticated client: its connection halves, nickname and private
/// outbound queue.
pub struct Session<R, W> {
    pub id: SessionId,
    pub nickname: String,
    pub reader: R,
    pub writer: W,
    pub outbox: mpsc::Receiver<Message>,
}

impl<R, W> Session<R, W> {
    /// Builds a session with a fresh bounded outbox, returning the handle the
    /// broker should hold for it.
    pub fn open(
        id: SessionId,
        nickname: String,
        reader: R,
        writer: W,
        outbox_capacity: usize,
    ) -> (Self, SessionHandle) {
        let (outbox_tx, outbox) = mpsc::channel(outbox_capacity.max(1));
        let handle = SessionHandle::new(id, nickname.clone(), outbox_tx);
        let session = Self {
            id,
            nickname,
            reader,
            writer,
            outbox,
        };
        (session, handle)
    }
}

/// Turns inbound lines into routed messages until the peer goes away.
///
/// Lines without a recipient separator are dropped; they never end the loop.
pub async fn receive_loop<R>(mut reader: R, nickname: String, broker: BrokerHandle) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = read_line(&mut reader).await? {
        let message = match Message::parse(&nickname, &line) {
            Ok(message) => message,
            Err(err) => {
                debug!(%nickname, error = %err, "dropping malformed line");
                continue;
            }
        };

        if !broker.route(message) {
            break;
        }
    }

    debug!(%nickname, "receive loop finished");
    Ok(())
}

/// Drains the outbox onto the wire.
///
/// Returns `Ok` once the outbox is closed and `Err` on the first failed write.
pub async fn send_loop<W>(writer: &mut W, outbox: &mut mpsc::Receiver<Message>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbox.recv().await {
        write_text(writer, &message.content).await?;
    }
    Ok(())
}
