//! CLI for running and poking a bulb endpoint.
//!
//! `serve` runs the endpoint against an in-memory bulb, `send` and the power,
//! intensity and color shortcuts act as a command client, and `watch` prints
//! the telemetry datagrams.
//!
//! Run with: cargo run --example bulb_cli -- --help

use std::net::SocketAddr;
use std::time::Duration;

use bulb_endpoint::{
    Color, CommandRecord, Endpoint, EndpointConfig, SharedBulb, TelemetryRecord,
};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

#[derive(Parser)]
#[command(name = "bulb-cli")]
#[command(about = "Run a smart-bulb endpoint or talk to one", long_about = None)]
struct Cli {
    /// Command address of the endpoint (used by serve to bind, by clients to connect)
    #[arg(short, long, global = true, default_value = "127.0.0.1:54321")]
    commands: SocketAddr,

    /// Telemetry address (serve sends here, watch listens here)
    #[arg(short, long, global = true, default_value = "127.0.0.1:12345")]
    telemetry: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the endpoint
    Serve {
        /// Initial device id
        #[arg(long, default_value = "1")]
        id: i64,

        /// Stop after this many seconds and print diagnostics (default: run forever)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Send a raw command record
    Send {
        /// Command selector (0 id, 1 power, 2 intensity, 3 color)
        command: i64,
        /// Command value
        value: i64,
    },

    /// Turn the bulb on
    On,

    /// Turn the bulb off
    Off,

    /// Set intensity (0-100)
    Intensity {
        #[arg(value_parser = clap::value_parser!(i64).range(0..=100))]
        level: i64,
    },

    /// Set color by name (White, Red, Green, Blue, Yellow)
    Color { name: String },

    /// Print telemetry datagrams as they arrive
    Watch,
}

async fn send(addr: SocketAddr, records: &[CommandRecord]) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    for record in records {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        stream.write_all(&line).await?;
        println!("Sent {}", String::from_utf8_lossy(&line).trim_end());
    }
    stream.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { id, duration } => {
            let config = EndpointConfig::new()
                .command_addr(cli.commands)
                .telemetry_addr(cli.telemetry);
            let bulb = SharedBulb::with_id(id);
            let endpoint = Endpoint::start(config, bulb.clone());
            println!(
                "Bulb {} serving commands on {}, telemetry to {}",
                id, cli.commands, cli.telemetry
            );

            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => futures::future::pending::<()>().await,
            }

            let diag = endpoint.diagnostics().await;
            endpoint.stop().await?;
            println!("\nFinal state: {:?}", bulb.state());
            println!("\nDiagnostics:\n{}", serde_json::to_string_pretty(&diag)?);
        }

        Commands::Send { command, value } => {
            send(cli.commands, &[CommandRecord::new(command, value)]).await?;
        }

        Commands::On => send(cli.commands, &[CommandRecord::new(1, 1)]).await?,

        Commands::Off => send(cli.commands, &[CommandRecord::new(1, 0)]).await?,

        Commands::Intensity { level } => {
            send(cli.commands, &[CommandRecord::new(2, level)]).await?
        }

        Commands::Color { name } => {
            let color = match name.to_lowercase().as_str() {
                "white" => Some(Color::White),
                "red" => Some(Color::Red),
                "green" => Some(Color::Green),
                "blue" => Some(Color::Blue),
                "yellow" => Some(Color::Yellow),
                _ => None,
            };

            match color {
                Some(color) => {
                    send(cli.commands, &[CommandRecord::new(3, i64::from(color.code()))]).await?
                }
                None => eprintln!("Unknown color name. Use --help to see available colors."),
            }
        }

        Commands::Watch => {
            let socket = UdpSocket::bind(cli.telemetry).await?;
            println!("Listening for telemetry on {}... (Press Ctrl+C to stop)\n", cli.telemetry);
            let mut buffer = [0u8; 1024];
            loop {
                let (len, from) = socket.recv_from(&mut buffer).await?;
                match TelemetryRecord::from_json(&buffer[..len]) {
                    Ok(record) => println!(
                        "[{}] id={} on={} intensity={} color={}",
                        from,
                        record.id,
                        record.on,
                        record.intensity,
                        Color::from_code(i64::from(record.color))
                            .map_or_else(|| record.color.to_string(), |c| c.to_string())
                    ),
                    Err(e) => eprintln!("[{}] unreadable datagram: {}", from, e),
                }
            }
        }
    }

    Ok(())
}
