use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    broker::{Broker, BrokerHandle},
    connection::ConnectionHandler,
    error::AuthError,
};

/// TCP front door of the relay: accepts connections and hands each one to a
/// [`ConnectionHandler`] task.
pub struct Server {
    listener: TcpListener,
    handler: ConnectionHandler,
    broker: BrokerHandle,
}

impl Server {
    /// Starts the broker task. Must be called from within a Tokio runtime.
    pub fn new(listener: TcpListener, outbox_capacity: usize) -> Self {
        let broker = Broker::spawn();
        Self {
            listener,
            handler: ConnectionHandler::new(broker.clone(), outbox_capacity),
            broker,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn broker(&self) -> BrokerHandle {
        self.broker.clone()
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Sessions already running are left to end on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener, handler, ..
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &handler);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    handler: &ConnectionHandler,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, handler),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, handler: &ConnectionHandler) {
    let handler = handler.clone();
    tokio::spawn(async move {
        match handler.handle(stream, peer).await {
            Ok(()) => {}
            Err(AuthError::InvalidNickname) => info!(%peer, "rejected invalid nickname"),
            Err(err) => warn!(%peer, error = ?err, "handshake failed"),
        }
    });
}
