//! Entry point for `rtp-over-udp`.
//!
//! Parses CLI arguments and dispatches into one of four modes.  All protocol
//! work is delegated to library modules; `main.rs` owns only process setup
//! (logging, argument parsing, stdin/stdout).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use rtp_over_udp::packet::MAX_PAYLOAD;
use rtp_over_udp::timer::TimerConfig;
use rtp_over_udp::{client, server, Config, StreamReceiver, StreamSender};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Read stdin and send it as one stream to a receiver.
    Send {
        ip: IpAddr,
        port: u16,
        window_size: u32,
    },
    /// Receive one stream and write it to stdout.
    Recv {
        ip: IpAddr,
        port: u16,
        window_size: u32,
    },
    /// Run the upper-casing echo server.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        #[arg(short, long, default_value_t = 128)]
        window: u32,
    },
    /// Send a message to the echo server and print the reply.
    Client {
        /// Remote server address.
        #[arg(short, long)]
        server: SocketAddr,
        #[arg(short, long, default_value_t = 128)]
        window: u32,
        /// Message to send; stdin is read when omitted.
        message: Option<String>,
    },
}

#[derive(Args)]
struct Tuning {
    /// Receive timeout and retransmission interval, in milliseconds.
    #[arg(long, global = true, default_value_t = 500)]
    poll_ms: u64,
    /// How long to retry END before force-closing, in milliseconds.
    #[arg(long, global = true, default_value_t = 500)]
    close_ms: u64,
    /// Largest DATA payload in bytes.
    #[arg(long, global = true, default_value_t = MAX_PAYLOAD)]
    max_payload: usize,
    /// Give up the handshake after this many STARTs.
    #[arg(long, global = true)]
    max_handshake_attempts: Option<u32>,
}

impl Tuning {
    fn config(&self, window_size: u32) -> Config {
        Config {
            window_size,
            max_payload: self.max_payload,
            timers: TimerConfig {
                poll_interval: Duration::from_millis(self.poll_ms),
                close_deadline: Duration::from_millis(self.close_ms),
                max_handshake_attempts: self.max_handshake_attempts,
                ..TimerConfig::default()
            },
        }
    }
}

async fn read_stdin() -> Result<Vec<u8>> {
    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .context("reading stdin")?;
    Ok(input)
}

async fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await.context("writing stdout")?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send { ip, port, window_size } => {
            let peer = SocketAddr::new(ip, port);
            let input = read_stdin().await?;
            let local = server::ephemeral_for(peer);
            let mut tx = StreamSender::bind(local, cli.tuning.config(window_size)).await?;
            tx.connect(peer).await.with_context(|| format!("connecting to {peer}"))?;
            tx.send(&input).await?;
            tx.close().await?;
            log::info!("sent {} bytes to {peer}", input.len());
        }
        Mode::Recv { ip, port, window_size } => {
            let local = SocketAddr::new(ip, port);
            let mut rx = StreamReceiver::bind(local, cli.tuning.config(window_size))
                .await
                .with_context(|| format!("binding {local}"))?;
            let (bytes, from) = rx.recv().await?;
            log::info!("received {} bytes from {from}", bytes.len());
            write_stdout(&bytes).await?;
        }
        Mode::Server { bind, window } => {
            log::info!("Starting server on {bind}");
            server::run(bind, cli.tuning.config(window)).await?;
        }
        Mode::Client { server, window, message } => {
            let message = match message {
                Some(text) => text.into_bytes(),
                None => read_stdin().await?,
            };
            let reply = client::run(server, &message, cli.tuning.config(window)).await?;
            write_stdout(&reply).await?;
        }
    }

    Ok(())
}
