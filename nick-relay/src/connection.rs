use std::net::SocketAddr;

use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    task::AbortHandle,
};
use tracing::{debug, info};

use crate::{
    broker::{BrokerHandle, SessionHandle},
    error::AuthError,
    message::{AUTH_PROMPT, INVALID_USERNAME, read_line, strip_line_ending, welcome, write_text},
    session::{Session, SessionState, receive_loop, send_loop},
};

/// Outbound messages a session may have queued before new ones are dropped.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Onboards accepted connections into broker-registered sessions.
#[derive(Clone)]
pub struct ConnectionHandler {
    broker: BrokerHandle,
    outbox_capacity: usize,
}

impl ConnectionHandler {
    pub fn new(broker: BrokerHandle, outbox_capacity: usize) -> Self {
        Self {
            broker,
            outbox_capacity,
        }
    }

    /// Runs one connection from handshake to close.
    ///
    /// Returns once the session is over. Only a failed handshake is an error;
    /// I/O failures after registration are how sessions normally end.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> Result<(), AuthError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        transition(peer, SessionState::Connecting);
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        transition(peer, SessionState::Authenticating);
        let nickname = match authenticate(&mut reader, &mut writer).await {
            Ok(nickname) => nickname,
            Err(err) => {
                let _ = writer.shutdown().await;
                transition(peer, SessionState::Closed);
                return Err(err);
            }
        };

        let id = self.broker.next_session_id();
        let (session, handle) = Session::open(id, nickname, reader, writer, self.outbox_capacity);
        let mut guard = SessionGuard::new(self.broker.clone(), handle.clone(), peer);
        self.broker.register(handle);

        let Session {
            id,
            nickname,
            reader,
            mut writer,
            mut outbox,
        } = session;

        match write_text(&mut writer, &welcome(&nickname)).await {
            Ok(()) => {
                info!(%peer, %nickname, session = id, "client joined");
                transition(peer, SessionState::Active);

                // The receive loop ending does not end the session; only a
                // failed write does. The guard reaps the task either way.
                let receiver = tokio::spawn(receive_loop(reader, nickname.clone(), self.broker.clone()));
                guard.watch(receiver.abort_handle());

                if let Err(err) = send_loop(&mut writer, &mut outbox).await {
                    debug!(%nickname, session = id, error = %err, "send loop failed");
                }
            }
            Err(err) => debug!(%peer, %nickname, error = %err, "failed to write welcome"),
        }

        transition(peer, SessionState::Closing);
        let _ = writer.shutdown().await;
        drop(guard);
        Ok(())
    }
}

/// Sends the prompt and reads back a nickname line.
///
/// End of stream counts as an empty nickname. A blank nickname is answered
/// with the rejection notice before the error is returned.
async fn authenticate<R, W>(reader: &mut R, writer: &mut W) -> Result<String, AuthError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_text(writer, AUTH_PROMPT).await?;

    let line = read_line(reader).await?.unwrap_or_default();
    let nickname = strip_line_ending(&line);
    if nickname.trim().is_empty() {
        let _ = write_text(writer, INVALID_USERNAME).await;
        return Err(AuthError::InvalidNickname);
    }

    Ok(nickname.to_string())
}

fn transition(peer: SocketAddr, state: SessionState) {
    debug!(%peer, ?state, "session state");
}

/// Deregisters the session and stops its receive task when dropped, however
/// the handler exits.
///
/// Holding a clone of the session's handle keeps its outbox open, so a session
/// displaced from the registry stays connected and can still send.
struct SessionGuard {
    broker: BrokerHandle,
    session: SessionHandle,
    peer: SocketAddr,
    receiver: Option<AbortHandle>,
}

impl SessionGuard {
    fn new(broker: BrokerHandle, session: SessionHandle, peer: SocketAddr) -> Self {
        Self {
            broker,
            session,
            peer,
            receiver: None,
        }
    }

    fn watch(&mut self, receiver: AbortHandle) {
        self.receiver = Some(receiver);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let SessionHandle { id, nickname, .. } = &self.session;
        self.broker.deregister(*id, nickname);
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
        info!(peer = %self.peer, %nickname, session = *id, "connection closed");
        transition(self.peer, SessionState::Closed);
    }
}
