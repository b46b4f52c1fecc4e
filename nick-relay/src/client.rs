use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{AUTH_PROMPT, strip_line_ending, write_text},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    await_prompt(&mut reader).await?;
    send_handshake(&mut writer, &args.nickname).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());

    run_client_loop(&mut reader, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn await_prompt(reader: &mut BufReader<OwnedReadHalf>) -> Result<()> {
    let mut prompt = [0u8; AUTH_PROMPT.len()];
    reader
        .read_exact(&mut prompt)
        .await
        .context("relay closed before sending the auth prompt")?;
    if &prompt[..] != AUTH_PROMPT.as_bytes() {
        bail!(
            "unexpected auth prompt '{}'",
            String::from_utf8_lossy(&prompt)
        );
    }
    Ok(())
}

async fn send_handshake(writer: &mut OwnedWriteHalf, nickname: &str) -> Result<()> {
    write_text(writer, &format!("{nickname}\n"))
        .await
        .context("failed to send nickname")?;
    Ok(())
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
) -> Result<()> {
    // Both buffers outlive each select! so a losing branch keeps its partial line.
    let mut server_line = Vec::new();
    let mut input = String::new();

    loop {
        select! {
            bytes_read = reader.read_until(b'\n', &mut server_line) => {
                if !handle_server_line(bytes_read, &server_line).await? {
                    break;
                }
                server_line.clear();
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, writer).await? {
                    break;
                }
                input.clear();
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(bytes_read: io::Result<usize>, line: &[u8]) -> Result<bool> {
    if bytes_read? == 0 {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    }

    let line = String::from_utf8_lossy(line);
    write_stdout(strip_line_ending(&line)).await?;
    Ok(true)
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = strip_line_ending(input);
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    write_text(writer, &format!("{text}\n")).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
