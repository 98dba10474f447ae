//! Buzzer Client Demo
//!
//! Drives a running buzzd server over TCP and prints each reply.
//! Start the server first (e.g. `buzzd --mock`), then run this demo.

use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8765".to_string());

    println!("Connecting to buzzd at {}...", addr);
    let stream = TcpStream::connect(&addr).await?;
    let mut stream = BufReader::new(stream);
    println!("Connected");

    // A valid activation replies twice: once on start, once after the hold
    send_command(&mut stream, "on_0", 2).await?;

    // Offset 2 is free-form; the server only reads the prefix and the id
    send_command(&mut stream, "on:1", 2).await?;

    // Anything else gets a single rejection
    send_command(&mut stream, "off_0", 1).await?;
    send_command(&mut stream, "on_x", 1).await?;

    println!("Done");
    Ok(())
}

async fn send_command(
    stream: &mut BufReader<TcpStream>,
    command: &str,
    expected_replies: usize,
) -> anyhow::Result<()> {
    println!("\n> {}", command);
    let start = Instant::now();
    stream.write_all(format!("{}\n", command).as_bytes()).await?;

    for _ in 0..expected_replies {
        let mut reply = String::new();
        if stream.read_line(&mut reply).await? == 0 {
            anyhow::bail!("Server closed the connection");
        }
        println!("< {} ({:.1}s)", reply.trim_end(), start.elapsed().as_secs_f64());
    }
    Ok(())
}
