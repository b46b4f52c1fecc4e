use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use nick_relay::{
    broker::BrokerHandle,
    connection::DEFAULT_OUTBOX_CAPACITY,
    message::{Message, read_line, write_text},
    server::Server,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

struct TestRelay {
    addr: SocketAddr,
    broker: BrokerHandle,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl TestRelay {
    async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = Server::new(listener, DEFAULT_OUTBOX_CAPACITY);
        let broker = server.broker();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = server.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            broker,
            shutdown,
            server,
        })
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.server.await;
    }

    async fn nicknames(&self) -> Vec<String> {
        self.broker
            .snapshot()
            .await
            .expect("broker running")
            .into_iter()
            .map(|(nickname, _)| nickname)
            .collect()
    }
}

async fn connect(addr: SocketAddr) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut prompt = [0u8; 4];
    timeout(READ_TIMEOUT, reader.read_exact(&mut prompt)).await??;
    assert_eq!(&prompt, b"auth");

    Ok((reader, writer))
}

async fn join(addr: SocketAddr, nickname: &str) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let (mut reader, mut writer) = connect(addr).await?;
    write_text(&mut writer, &format!("{nickname}\n")).await?;

    assert_eq!(next_line(&mut reader).await?, format!("Welcome, {nickname}!\n"));
    assert_eq!(next_line(&mut reader).await?, "\n");

    Ok((reader, writer))
}

async fn next_line(reader: &mut BufReader<OwnedReadHalf>) -> Result<String> {
    let line = timeout(READ_TIMEOUT, read_line(reader))
        .await??
        .ok_or_else(|| anyhow::anyhow!("connection closed while waiting for a line"))?;
    Ok(line)
}

#[tokio::test]
async fn message_is_delivered_with_sender_prefix() -> Result<()> {
    let relay = TestRelay::start().await?;
    let (_a_reader, mut a_writer) = join(relay.addr, "A").await?;
    let (mut b_reader, _b_writer) = join(relay.addr, "B").await?;

    write_text(&mut a_writer, "B:hello\n").await?;
    assert_eq!(next_line(&mut b_reader).await?, "A: hello\n");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn malformed_line_does_not_end_session() -> Result<()> {
    let relay = TestRelay::start().await?;
    let (_alice_reader, mut alice_writer) = join(relay.addr, "alice").await?;
    let (mut bob_reader, mut bob_writer) = join(relay.addr, "bob").await?;

    write_text(&mut alice_writer, "garbage\n").await?;
    write_text(&mut alice_writer, "bob:after garbage\n").await?;
    assert_eq!(next_line(&mut bob_reader).await?, "alice: after garbage\n");

    // Bob is unaffected and can still send.
    let (mut carol_reader, _carol_writer) = join(relay.addr, "carol").await?;
    write_text(&mut bob_writer, "carol:still here\n").await?;
    assert_eq!(next_line(&mut carol_reader).await?, "bob: still here\n");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn blank_nickname_is_rejected_without_registration() -> Result<()> {
    let relay = TestRelay::start().await?;
    let (mut reader, mut writer) = connect(relay.addr).await?;

    write_text(&mut writer, "   \n").await?;
    assert_eq!(next_line(&mut reader).await?, "Invalid Username\n");
    assert_eq!(timeout(READ_TIMEOUT, read_line(&mut reader)).await??, None);
    assert!(relay.nicknames().await.is_empty());

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn half_closed_client_still_receives_replies() -> Result<()> {
    let relay = TestRelay::start().await?;
    let (mut a_reader, mut a_writer) = join(relay.addr, "A").await?;
    let (mut b_reader, mut b_writer) = join(relay.addr, "B").await?;

    write_text(&mut a_writer, "B:bye\n").await?;
    a_writer.shutdown().await?;
    assert_eq!(next_line(&mut b_reader).await?, "A: bye\n");

    write_text(&mut b_writer, "A:reply\n").await?;
    assert_eq!(next_line(&mut a_reader).await?, "B: reply\n");
    assert_eq!(relay.nicknames().await, vec!["A".to_string(), "B".to_string()]);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn disconnect_removes_registration_after_failed_delivery() -> Result<()> {
    let relay = TestRelay::start().await?;
    let (reader, writer) = join(relay.addr, "ghost").await?;
    assert_eq!(relay.nicknames().await, vec!["ghost".to_string()]);

    drop(writer);
    drop(reader);

    // End of stream alone does not end the session; deliveries to the closed
    // socket eventually fail and trigger cleanup.
    let mut deregistered = false;
    for _ in 0..50 {
        relay.broker.route(Message {
            from: "relay".into(),
            to: "ghost".into(),
            content: "relay: ping\n".into(),
        });
        if relay.nicknames().await.is_empty() {
            deregistered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(deregistered, "ghost should be deregistered once writes fail");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn displaced_nickname_holder_stays_connected() -> Result<()> {
    let relay = TestRelay::start().await?;
    let (mut old_reader, mut old_writer) = join(relay.addr, "bob").await?;
    let (mut new_reader, _new_writer) = join(relay.addr, "bob").await?;
    let (mut carol_reader, mut carol_writer) = join(relay.addr, "carol").await?;

    // The old bob is unreachable but not disconnected.
    assert!(
        timeout(Duration::from_millis(200), read_line(&mut old_reader))
            .await
            .is_err()
    );

    write_text(&mut old_writer, "carol:from old bob\n").await?;
    assert_eq!(next_line(&mut carol_reader).await?, "bob: from old bob\n");

    write_text(&mut carol_writer, "bob:for the new bob\n").await?;
    assert_eq!(next_line(&mut new_reader).await?, "carol: for the new bob\n");
    assert!(
        timeout(Duration::from_millis(200), read_line(&mut old_reader))
            .await
            .is_err()
    );
    assert_eq!(relay.nicknames().await, vec!["bob".to_string(), "carol".to_string()]);

    relay.stop().await;
    Ok(())
}
