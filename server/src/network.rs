//! # Server Session Layer
//!
//! This module owns every TCP connection to the coordinator. It accepts
//! connections, performs the CONNECT handshake, pumps inbound frames to the
//! dispatcher, and gives the rest of the server a socket-free way to emit
//! messages.
//!
//! ## Architecture Overview
//!
//! Each accepted connection becomes two tasks:
//! - **Session reader**: enforces the 5-second CONNECT deadline, registers
//!   the player, then routes inbound frames until the peer closes, a fatal
//!   framing error occurs, or the session is killed.
//! - **Session writer**: the only task allowed to touch the write half.
//!   It drains a bounded per-player queue, preserving per-recipient order.
//!
//! ## Concurrency Model
//!
//! Producers (round engine, traffic generators, dispatcher replies) never
//! write to sockets and never block on a slow peer: they push into the
//! recipient's queue via [`Outbound`] and move on. The queue is small; a
//! recipient that falls [`shared::OUTBOUND_QUEUE`] messages behind is
//! disconnected via its session kill switch. Senders collect queue handles
//! under the registry read lock and release it before pushing, so no lock is
//! ever held while sending.

use crate::attack::AttackCoordinator;
use crate::game::{GameManager, SharedStatus};
use crate::player_registry::{PlayerRegistry, RegistryError};
use log::{debug, error, info, warn};
use shared::messages::Message;
use shared::protocol::{read_frame, write_frame, FrameError};
use shared::{CONNECT_DEADLINE, OUTBOUND_QUEUE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub type SharedRegistry = Arc<RwLock<PlayerRegistry>>;

/// Socket-free emission primitives handed to the round engine, the traffic
/// generators and the attack coordinator.
#[derive(Clone)]
pub struct Outbound {
    registry: SharedRegistry,
}

impl Outbound {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Queues a message for one player. Returns false if the player is gone
    /// or was disconnected for falling behind.
    pub async fn send_to(&self, player_id: &str, msg: Message) -> bool {
        let handle = {
            let registry = self.registry.read().await;
            registry.outbound_of(player_id)
        };
        match handle {
            Some((tx, kill)) => Self::push(player_id, &tx, &kill, msg),
            None => false,
        }
    }

    /// Queues a message for every connected player. Best effort per
    /// recipient; no cross-recipient ordering is implied.
    pub async fn broadcast(&self, msg: Message) {
        let handles = {
            let registry = self.registry.read().await;
            registry.outbound_all()
        };
        for (player_id, tx, kill) in handles {
            Self::push(&player_id, &tx, &kill, msg.clone());
        }
    }

    /// Broadcasts the current roster snapshot.
    pub async fn broadcast_player_list(&self) {
        let players = {
            let registry = self.registry.read().await;
            registry.list_infos()
        };
        self.broadcast(Message::PlayerList { players }).await;
    }

    fn push(player_id: &str, tx: &mpsc::Sender<Message>, kill: &Notify, msg: Message) -> bool {
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("player {} outbound queue overflow, disconnecting", player_id);
                kill.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Shared handles every session needs.
#[derive(Clone)]
pub struct ServerCtx {
    pub registry: SharedRegistry,
    pub outbound: Outbound,
    pub status: SharedStatus,
    pub coordinator: Arc<AttackCoordinator>,
    pub game: Arc<GameManager>,
}

/// The listening coordinator: owns the accept loop and the shutdown signal.
pub struct GameServer {
    ctx: ServerCtx,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl GameServer {
    /// Binds the listener, wires the component graph together and spawns the
    /// accept loop.
    pub async fn bind(host: &str, port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        info!("server listening on {}", local_addr);

        let registry: SharedRegistry =
            Arc::new(RwLock::new(PlayerRegistry::new(shared::MAX_PLAYERS)));
        let outbound = Outbound::new(registry.clone());
        let status = crate::game::new_shared_status();
        let coordinator = Arc::new(AttackCoordinator::new(
            registry.clone(),
            outbound.clone(),
            status.clone(),
        ));
        let game = GameManager::new(
            registry.clone(),
            outbound.clone(),
            coordinator.clone(),
            status.clone(),
        );

        let ctx = ServerCtx {
            registry,
            outbound,
            status,
            coordinator,
            game,
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, ctx.clone(), shutdown_rx));

        Ok(Self {
            ctx,
            local_addr,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn ctx(&self) -> &ServerCtx {
        &self.ctx
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the match, the accept loop and every session.
    pub async fn shutdown(&self) {
        info!("server shutting down");
        self.ctx.game.stop_match().await;
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

async fn accept_loop(listener: TcpListener, ctx: ServerCtx, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("new connection from {}", addr);
                    let ctx = ctx.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(handle_session(stream, addr, ctx, shutdown));
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            },
            _ = shutdown.changed() => {
                info!("accept loop stopped");
                break;
            }
        }
    }
}

/// Runs one client session from handshake to cleanup.
async fn handle_session(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ServerCtx,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();

    // The peer gets one CONNECT frame within the deadline, or the socket is
    // closed without ceremony.
    let player_id = match timeout(CONNECT_DEADLINE, read_frame(&mut reader)).await {
        Ok(Ok(Message::Connect { player_id, .. })) if !player_id.is_empty() => player_id,
        Ok(Ok(other)) => {
            warn!("{}: expected CONNECT, got {}", addr, other.type_name());
            return;
        }
        Ok(Err(e)) => {
            debug!("{}: handshake failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("{}: no CONNECT within {:?}", addr, CONNECT_DEADLINE);
            return;
        }
    };

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let kill = Arc::new(Notify::new());

    let registered = {
        let mut registry = ctx.registry.write().await;
        registry.add(&player_id, addr, tx, kill.clone())
    };
    let player_index = match registered {
        Ok(index) => index,
        Err(e @ RegistryError::DuplicateId(_)) | Err(e @ RegistryError::ServerFull(_)) => {
            warn!("{}: join refused: {}", addr, e);
            let _ = write_frame(&mut writer, &Message::error(&e.to_string())).await;
            return;
        }
    };

    let writer_task = tokio::spawn(write_loop(writer, rx, player_id.clone()));

    ctx.outbound
        .send_to(
            &player_id,
            Message::welcome(&player_id, &addr.ip().to_string(), player_index),
        )
        .await;
    ctx.outbound.broadcast_player_list().await;

    read_loop(&mut reader, &player_id, &ctx, &kill, &mut shutdown).await;

    // Cleanup: evict, tell the others, let the writer drain and finish.
    {
        let mut registry = ctx.registry.write().await;
        registry.remove(&player_id);
    }
    ctx.outbound.broadcast_player_list().await;
    let _ = writer_task.await;
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    player_id: &str,
    ctx: &ServerCtx,
    kill: &Notify,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = read_frame(reader) => match frame {
                Ok(msg) => dispatch(ctx, player_id, msg).await,
                Err(e @ FrameError::BadMessage(_)) => {
                    // Schema-level breakage drops the message, not the player
                    warn!("player {}: {}", player_id, e);
                    ctx.outbound
                        .send_to(player_id, Message::error("message dropped: schema mismatch"))
                        .await;
                }
                Err(FrameError::PeerGone) => {
                    info!("player {} disconnected", player_id);
                    break;
                }
                Err(e) => {
                    warn!("player {} session error: {}", player_id, e);
                    break;
                }
            },
            _ = kill.notified() => {
                info!("player {} session killed", player_id);
                break;
            }
            _ = shutdown.changed() => {
                debug!("player {} session closing on shutdown", player_id);
                break;
            }
        }
    }
}

/// Single writer per connection: drains the queue in FIFO order and is the
/// only task that touches the write half.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Message>, player_id: String) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!("player {} write failed: {}", player_id, e);
            break;
        }
    }
}

/// Routes one inbound message by type. Anything outside the client
/// vocabulary is logged and ignored.
async fn dispatch(ctx: &ServerCtx, session_player: &str, msg: Message) {
    match msg {
        Message::AttackRequest {
            attacker_id,
            target_id,
        } => {
            ctx.coordinator
                .handle_request(&attacker_id, &target_id)
                .await;
        }
        Message::AttackConfirm {
            attack_id,
            confirm_type,
            ..
        } => {
            ctx.coordinator.handle_confirm(&attack_id, confirm_type).await;
        }
        Message::Defense {
            player_id,
            attacker_ips,
        } => {
            ctx.game.submit_defense(&player_id, attacker_ips).await;
        }
        other => {
            debug!(
                "player {}: ignoring {} message",
                session_player,
                other.type_name()
            );
        }
    }
}
