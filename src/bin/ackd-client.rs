//! Demo client: sends one message and prints the server's acknowledgment.

use clap::Parser;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const ACK_LEN: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "ackd-client")]
#[command(about = "Send a message to an ackd server and wait for ACCEPTED", long_about = None)]
struct Args {
    /// Server port
    #[arg(default_value_t = 1337)]
    port: u16,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Message to send
    #[arg(short, long, default_value = "Ehal greka cherez reku")]
    message: String,

    /// Give up waiting for the acknowledgment after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match exchange(&args) {
        Ok(Some(reply)) => {
            info!(reply = %String::from_utf8_lossy(&reply), "Acknowledged");
            ExitCode::SUCCESS
        }
        Ok(None) => {
            error!("Server dropped the connection");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Exchange failed");
            ExitCode::FAILURE
        }
    }
}

/// Send the message and read the acknowledgment.
///
/// Returns `None` if the server closed the connection before replying.
fn exchange(args: &Args) -> io::Result<Option<Vec<u8>>> {
    let mut stream = TcpStream::connect((args.host.as_str(), args.port))?;
    stream.set_read_timeout(Some(Duration::from_secs(args.timeout_secs)))?;

    stream.write_all(args.message.as_bytes())?;
    info!(len = args.message.len(), "Message sent");

    let mut reply = vec![0u8; ACK_LEN];
    let mut filled = 0;
    while filled < reply.len() {
        match stream.read(&mut reply[filled..])? {
            0 => break,
            n => filled += n,
        }
    }

    if filled == 0 {
        return Ok(None);
    }
    reply.truncate(filled);
    Ok(Some(reply))
}
