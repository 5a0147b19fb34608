//! Coordinator entry point and operator console

use clap::Parser;
use log::info;
use server::network::GameServer;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Packet-defense training game coordinator")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = shared::DEFAULT_HOST)]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let server = GameServer::bind(&args.host, args.port).await?;
    info!("coordinator ready on {}", server.local_addr());

    println!("Commands: start | stop | status | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim().to_lowercase().as_str() {
            "start" => match server.ctx().game.start_match().await {
                Ok(()) => println!("match started"),
                Err(reason) => println!("cannot start match: {}", reason),
            },
            "stop" => {
                server.ctx().game.stop_match().await;
                println!("match stopped");
            }
            "status" => print_status(&server).await,
            "quit" => break,
            "" => {}
            other => println!("unknown command: {:?} (start | stop | status | quit)", other),
        }
    }

    server.shutdown().await;
    Ok(())
}

async fn print_status(server: &GameServer) {
    let report = server.ctx().game.status_report().await;
    println!("========== server status ==========");
    println!("match state : {}", report.match_state);
    println!("round       : {}/{}", report.round, report.total);
    if let Some(difficulty) = report.difficulty {
        println!("difficulty  : {}", difficulty);
    }
    println!("players     : {}", report.player_count);
    for player in &report.players {
        println!(
            "  - {} ({}) | score: {} | hp: {}",
            player.player_id, player.ip, player.score, player.hp
        );
    }
    println!("===================================");
}
