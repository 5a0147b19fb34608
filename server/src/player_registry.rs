//! Connected-player registry: network identity, score, health, round facts

use log::info;
use shared::messages::Message;
use shared::{PlayerInfo, INITIAL_HP};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Notify;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("player id {0:?} is already connected")]
    DuplicateId(String),
    #[error("server is full ({0} players max)")]
    ServerFull(usize),
}

/// One connected player and everything the server tracks about them.
#[derive(Debug)]
pub struct Player {
    pub player_id: String,
    pub addr: SocketAddr,
    /// Observed peer host, as seen on the accepted TCP connection
    pub ip: String,
    /// Stable per-session index, assigned in insertion order; the player's
    /// P2P listen port is `BASE_PORT + index`
    pub index: usize,
    pub score: i32,
    pub hp: i32,
    pub is_connected: bool,
    /// Attacker addresses of attacks confirmed delivered this round
    pub attacks_received: Vec<String>,
    /// Handle onto the session's outbound writer queue
    outbound: mpsc::Sender<Message>,
    /// Kill switch for the session's reader loop (overflow, forced eviction)
    kill: Arc<Notify>,
}

impl Player {
    pub fn to_info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.player_id.clone(),
            ip: self.ip.clone(),
            score: self.score,
            hp: self.hp,
            is_connected: self.is_connected,
        }
    }
}

/// Authoritative table of connected players.
///
/// All operations are serialisable with respect to each other: the registry
/// lives behind one `RwLock` and never calls out while holding internal
/// state, so callers compose operations without deadlock risk.
pub struct PlayerRegistry {
    players: HashMap<String, Player>,
    next_index: usize,
    max_players: usize,
}

impl PlayerRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: HashMap::new(),
            next_index: 0,
            max_players,
        }
    }

    /// Registers a new player and assigns the next insertion-order index.
    ///
    /// Re-use of a currently connected id is refused; after a `remove` the
    /// same id may join again (with a fresh index).
    pub fn add(
        &mut self,
        player_id: &str,
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
        kill: Arc<Notify>,
    ) -> Result<usize, RegistryError> {
        if self.players.contains_key(player_id) {
            return Err(RegistryError::DuplicateId(player_id.to_string()));
        }
        if self.players.len() >= self.max_players {
            return Err(RegistryError::ServerFull(self.max_players));
        }

        let index = self.next_index;
        self.next_index += 1;

        let player = Player {
            player_id: player_id.to_string(),
            addr,
            ip: addr.ip().to_string(),
            index,
            score: 0,
            hp: INITIAL_HP,
            is_connected: true,
            attacks_received: Vec::new(),
            outbound,
            kill,
        };
        info!("player {} joined from {} (index {})", player_id, addr, index);
        self.players.insert(player_id.to_string(), player);
        Ok(index)
    }

    /// Marks the player disconnected and evicts them.
    pub fn remove(&mut self, player_id: &str) -> bool {
        if let Some(mut player) = self.players.remove(player_id) {
            player.is_connected = false;
            info!("player {} left", player_id);
            true
        } else {
            false
        }
    }

    pub fn lookup(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub fn by_address(&self, host: &str) -> Option<&Player> {
        self.players.values().find(|p| p.ip == host)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Applies a score delta; scores have no floor and may go negative.
    pub fn update_score(&mut self, player_id: &str, delta: i32) -> i32 {
        if let Some(player) = self.players.get_mut(player_id) {
            player.score += delta;
            player.score
        } else {
            0
        }
    }

    /// Applies an HP delta, clamping the result to `[0, INITIAL_HP]`.
    pub fn update_hp(&mut self, player_id: &str, delta: i32) -> i32 {
        if let Some(player) = self.players.get_mut(player_id) {
            player.hp = (player.hp + delta).clamp(0, INITIAL_HP);
            player.hp
        } else {
            0
        }
    }

    /// Appends an attacker address to the target's per-round record.
    pub fn record_attack_received(&mut self, target_id: &str, attacker_addr: &str) {
        if let Some(player) = self.players.get_mut(target_id) {
            player.attacks_received.push(attacker_addr.to_string());
            info!("attack recorded: {} -> {}", attacker_addr, target_id);
        }
    }

    /// Clears every player's per-round data at round start.
    pub fn reset_all_round_data(&mut self) {
        for player in self.players.values_mut() {
            player.attacks_received.clear();
        }
    }

    /// Roster projection for broadcasts.
    pub fn list_infos(&self) -> Vec<PlayerInfo> {
        let mut infos: Vec<_> = self.players.values().collect();
        infos.sort_by_key(|p| p.index);
        infos.iter().map(|p| p.to_info()).collect()
    }

    /// Player ids in index order.
    pub fn player_ids(&self) -> Vec<String> {
        let mut players: Vec<_> = self.players.values().collect();
        players.sort_by_key(|p| p.index);
        players.iter().map(|p| p.player_id.clone()).collect()
    }

    /// `(id, ip)` pairs of connected players, for the traffic generators.
    pub fn connected_peers(&self) -> Vec<(String, String)> {
        let mut players: Vec<_> = self.players.values().filter(|p| p.is_connected).collect();
        players.sort_by_key(|p| p.index);
        players
            .iter()
            .map(|p| (p.player_id.clone(), p.ip.clone()))
            .collect()
    }

    /// Outbound handle of one player, if connected.
    pub fn outbound_of(&self, player_id: &str) -> Option<(mpsc::Sender<Message>, Arc<Notify>)> {
        self.players
            .get(player_id)
            .map(|p| (p.outbound.clone(), p.kill.clone()))
    }

    /// Outbound handles of every connected player.
    pub fn outbound_all(&self) -> Vec<(String, mpsc::Sender<Message>, Arc<Notify>)> {
        self.players
            .values()
            .filter(|p| p.is_connected)
            .map(|p| (p.player_id.clone(), p.outbound.clone(), p.kill.clone()))
            .collect()
    }

    /// Final standings, best first: score descending, HP as tiebreaker.
    pub fn rankings(&self) -> Vec<PlayerInfo> {
        let mut infos = self.list_infos();
        infos.sort_by(|a, b| b.score.cmp(&a.score).then(b.hp.cmp(&a.hp)));
        infos
    }
}
