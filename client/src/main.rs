//! Client application entry point: a line-oriented player console

use clap::Parser;
use client::network::GameClient;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command-line arguments for client configuration
#[derive(Parser, Debug)]
#[command(author, version, about = "Packet-defense training game client")]
struct Args {
    /// Player id to join as (must be unique on the server)
    player_id: String,

    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("connecting to {}:{} as {}", args.host, args.port, args.player_id);

    let client = GameClient::connect(&args.player_id, &args.host, args.port).await?;

    println!("Commands: attack <player> | defend <ip> [ip ...] | status | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("attack") => match words.next() {
                Some(target) => {
                    if !client.request_attack(target).await {
                        println!("server connection lost");
                        break;
                    }
                }
                None => println!("usage: attack <player>"),
            },
            Some("defend") => {
                let ips: Vec<String> = words.map(str::to_string).collect();
                if ips.is_empty() {
                    println!("usage: defend <ip> [ip ...]");
                } else if !client.submit_defense(ips).await {
                    println!("server connection lost");
                    break;
                }
            }
            Some("status") => {
                let state = client.snapshot().await;
                println!(
                    "{} ({}) | round {} [{}] | score {} | hp {}",
                    state.player_id, state.my_ip, state.round, state.phase, state.score, state.hp
                );
                for player in &state.players {
                    println!(
                        "  - {} ({}) | score {} | hp {}",
                        player.player_id, player.ip, player.score, player.hp
                    );
                }
            }
            Some("quit") => break,
            None => {}
            Some(other) => println!("unknown command: {:?}", other),
        }
    }

    Ok(())
}
