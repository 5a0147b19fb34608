//! Client-side connection to the coordinator
//!
//! Handles the CONNECT/WELCOME handshake, keeps a background reader that
//! reacts to server messages (including driving the attacker side of the
//! two-phase attack exchange), and exposes the two actions a player UI
//! needs: request an attack and submit a defense.

use crate::p2p::{self, AttackListener};
use log::{debug, info, warn};
use shared::messages::{ConfirmType, Message};
use shared::protocol::{read_frame, write_frame, FrameError};
use shared::{PlayerInfo, BASE_PORT};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

/// Everything the UI layer may want to display.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub player_id: String,
    pub my_ip: String,
    pub my_index: usize,
    pub score: i32,
    pub hp: i32,
    pub round: u32,
    pub phase: String,
    pub players: Vec<PlayerInfo>,
}

/// A connected player client.
pub struct GameClient {
    state: Arc<Mutex<ClientState>>,
    to_server: mpsc::Sender<Message>,
}

impl GameClient {
    /// Connects, performs the handshake, starts the P2P listener on
    /// `BASE_PORT + player_index`, and spawns the reader/writer tasks.
    pub async fn connect(
        player_id: &str,
        host: &str,
        port: u16,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut stream = TcpStream::connect((host, port)).await?;
        write_frame(
            &mut stream,
            &Message::Connect {
                player_id: player_id.to_string(),
                player_ip: String::new(),
            },
        )
        .await?;

        let (my_ip, my_index) = match read_frame(&mut stream).await? {
            Message::Info {
                info_type,
                player_ip,
                player_index,
                message,
                ..
            } if info_type == "WELCOME" => {
                info!("{}", message);
                (
                    player_ip.unwrap_or_default(),
                    player_index.ok_or("welcome carried no player_index")?,
                )
            }
            Message::Info { message, .. } => {
                return Err(format!("join refused: {}", message).into());
            }
            other => {
                return Err(format!("expected WELCOME, got {}", other.type_name()).into());
            }
        };
        info!("connected as {} ({}), index {}", player_id, my_ip, my_index);

        let state = Arc::new(Mutex::new(ClientState {
            player_id: player_id.to_string(),
            my_ip: my_ip.clone(),
            my_index,
            hp: shared::INITIAL_HP,
            ..ClientState::default()
        }));

        let (to_server, outbox) = mpsc::channel::<Message>(32);

        // The P2P listener confirms received attacks through the same
        // server connection
        let listener = AttackListener::bind(BASE_PORT + my_index as u16).await?;
        tokio::spawn(listener.serve(to_server.clone()));

        let (mut reader, mut writer) = stream.into_split();
        tokio::spawn(async move {
            let mut outbox = outbox;
            while let Some(msg) = outbox.recv().await {
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    warn!("send to server failed: {}", e);
                    break;
                }
            }
        });

        let reader_state = state.clone();
        let reader_tx = to_server.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(msg) => handle_message(&reader_state, &reader_tx, msg).await,
                    Err(e @ FrameError::BadMessage(_)) => {
                        debug!("dropping malformed message: {}", e);
                    }
                    Err(e) => {
                        warn!("server connection lost: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { state, to_server })
    }

    /// Asks the server for permission to attack `target_id`.
    pub async fn request_attack(&self, target_id: &str) -> bool {
        let attacker_id = self.state.lock().await.player_id.clone();
        self.to_server
            .send(Message::AttackRequest {
                attacker_id,
                target_id: target_id.to_string(),
            })
            .await
            .is_ok()
    }

    /// Submits the set of source addresses believed to have attacked us.
    pub async fn submit_defense(&self, attacker_ips: Vec<String>) -> bool {
        let player_id = self.state.lock().await.player_id.clone();
        self.to_server
            .send(Message::Defense {
                player_id,
                attacker_ips,
            })
            .await
            .is_ok()
    }

    pub async fn snapshot(&self) -> ClientState {
        self.state.lock().await.clone()
    }
}

async fn handle_message(
    state: &Arc<Mutex<ClientState>>,
    to_server: &mpsc::Sender<Message>,
    msg: Message,
) {
    match msg {
        Message::Info {
            info_type, message, ..
        } => {
            // INFO notices (ATTACK_DENIED, ERROR, TIME_UPDATE, ...) surface
            // verbatim as toasts
            println!("[{}] {}", info_type, message);
        }
        Message::PlayerList { players } => {
            let mut state = state.lock().await;
            state.players = players;
        }
        Message::GameStart { message, .. } => {
            state.lock().await.phase = "PREPARATION".to_string();
            println!("{}", message);
        }
        Message::RoundStart {
            round_num,
            difficulty,
            message,
            ..
        } => {
            {
                let mut state = state.lock().await;
                state.round = round_num;
                state.phase = "PREPARATION".to_string();
            }
            println!("{}", message);
            println!("  hint: {}", difficulty.hint);
            if let Some(warning) = difficulty.warning {
                println!("  {}", warning);
            }
            println!("  attack limit: {}", difficulty.attack_limit);
        }
        Message::Playing {
            round_num, message, ..
        } => {
            {
                let mut state = state.lock().await;
                state.round = round_num;
                state.phase = "PLAYING".to_string();
            }
            println!("{}", message);
        }
        Message::DefensePhase {
            time_remaining,
            message,
            ..
        } => {
            state.lock().await.phase = "DEFENSE".to_string();
            println!("{} ({}s)", message, time_remaining);
        }
        Message::RoundEnd { message, players, .. } => {
            {
                let mut state = state.lock().await;
                state.phase = "ROUND_END".to_string();
                state.players = players;
            }
            println!("{}", message);
        }
        Message::GameEnd {
            message, rankings, ..
        } => {
            state.lock().await.phase = "GAME_END".to_string();
            println!("{}", message);
            for entry in rankings {
                println!(
                    "  #{} {} | score {}, hp {}",
                    entry.rank, entry.player_id, entry.score, entry.hp
                );
            }
        }
        Message::AttackApproved {
            attack_id,
            target_ip,
            target_port,
            target_id,
        } => {
            // Deliver peer-to-peer, then confirm SENT; on failure stay
            // silent and let the server expire the attack
            let (my_id, my_ip) = {
                let state = state.lock().await;
                (state.player_id.clone(), state.my_ip.clone())
            };
            let to_server = to_server.clone();
            tokio::spawn(async move {
                if p2p::deliver_attack(&attack_id, &target_ip, target_port, &target_id, &my_id, &my_ip)
                    .await
                {
                    let confirm = Message::AttackConfirm {
                        attack_id,
                        confirm_type: ConfirmType::Sent,
                        from_player: my_id,
                        to_player: target_id,
                    };
                    if to_server.send(confirm).await.is_err() {
                        warn!("server connection gone, SENT confirm dropped");
                    }
                }
            });
        }
        Message::IncomingAttackWarning {
            attacker_id,
            attacker_ip,
            ..
        } => {
            println!("!! incoming attack from {} ({})", attacker_id, attacker_ip);
        }
        Message::Score {
            score, hp, reason, ..
        } => {
            {
                let mut state = state.lock().await;
                state.score = score;
                state.hp = hp;
            }
            println!("round result: score {}, hp {} ({})", score, hp, reason);
        }
        Message::Dummy { .. } | Message::Noise { .. } | Message::DecoyAttack { .. } => {
            // Channel filler; players inspect it with capture tools, the
            // console stays quiet
            debug!("traffic: {}", msg.type_name());
        }
        other => {
            debug!("ignoring {} from server", other.type_name());
        }
    }
}
