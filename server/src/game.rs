//! Round engine: the state machine driving a match
//!
//! A single driver task walks the match through
//! preparation → playing → defense → round end for each of the five rounds,
//! toggling the traffic generators per difficulty profile, collecting
//! defense submissions, and invoking the scorer at every round boundary.
//!
//! The engine holds no persistent lock of its own. On phase transitions it
//! calls component operations under their own locks; the shared
//! [`MatchStatus`] is the one place phase and round are published for the
//! attack coordinator and the admin surface to read.

use crate::attack::AttackCoordinator;
use crate::network::{Outbound, SharedRegistry};
use crate::scoring::score_round;
use crate::traffic::{DecoyGenerator, DummyGenerator, NoiseGenerator};
use log::{debug, error, info};
use shared::messages::{DifficultySummary, Message, RankingEntry};
use shared::{
    difficulty_for_round, DifficultyProfile, PlayerInfo, MIN_PLAYERS, PREPARATION_TIME,
    ROUND_TIME, TOTAL_ROUNDS,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where the match currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPhase {
    #[default]
    Waiting,
    Preparation,
    Playing,
    Defense,
    RoundEnd,
    GameEnd,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::Waiting => "WAITING",
            MatchPhase::Preparation => "PREPARATION",
            MatchPhase::Playing => "PLAYING",
            MatchPhase::Defense => "DEFENSE",
            MatchPhase::RoundEnd => "ROUND_END",
            MatchPhase::GameEnd => "GAME_END",
        }
    }
}

/// Published match state: phase, round (0 when not started), the loaded
/// difficulty, and when the current playing phase began.
#[derive(Debug, Default)]
pub struct MatchStatus {
    pub phase: MatchPhase,
    pub round: u32,
    pub difficulty: Option<&'static DifficultyProfile>,
    pub play_started_at: Option<Instant>,
}

pub type SharedStatus = Arc<Mutex<MatchStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(MatchStatus::default()))
}

/// Admin-facing projection of the running server.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub match_state: &'static str,
    pub round: u32,
    pub total: u32,
    pub player_count: usize,
    pub players: Vec<PlayerInfo>,
    pub difficulty: Option<&'static str>,
}

pub struct GameManager {
    /// Self-handle for spawning the driver task from `&self`
    me: Weak<GameManager>,
    registry: SharedRegistry,
    outbound: Outbound,
    coordinator: Arc<AttackCoordinator>,
    status: SharedStatus,
    /// Defense submissions accumulate as a union across the round
    defense: Mutex<HashMap<String, HashSet<String>>>,
    dummy: DummyGenerator,
    noise: NoiseGenerator,
    decoy: DecoyGenerator,
    driver: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl GameManager {
    pub fn new(
        registry: SharedRegistry,
        outbound: Outbound,
        coordinator: Arc<AttackCoordinator>,
        status: SharedStatus,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            dummy: DummyGenerator::new(outbound.clone()),
            noise: NoiseGenerator::new(registry.clone(), outbound.clone()),
            decoy: DecoyGenerator::new(registry.clone(), outbound.clone()),
            registry,
            outbound,
            coordinator,
            status,
            defense: Mutex::new(HashMap::new()),
            driver: Mutex::new(None),
        })
    }

    /// Starts the match driver. Refuses when a match is already running or
    /// when fewer than [`MIN_PLAYERS`] players are connected.
    pub async fn start_match(&self) -> Result<(), String> {
        let mut driver = self.driver.lock().await;
        if let Some((handle, _)) = driver.as_ref() {
            if !handle.is_finished() {
                return Err("match already running".to_string());
            }
        }

        let player_count = {
            let registry = self.registry.read().await;
            registry.player_count()
        };
        if player_count < MIN_PLAYERS {
            return Err(format!(
                "need at least {} players ({} connected)",
                MIN_PLAYERS, player_count
            ));
        }

        let manager = match self.me.upgrade() {
            Some(manager) => manager,
            None => return Err("server shutting down".to_string()),
        };
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            manager.run_match(cancel_rx).await;
        });
        *driver = Some((handle, cancel_tx));
        info!("match started with {} players", player_count);
        Ok(())
    }

    /// Cancels a running match: back to WAITING, per-round data reset, and a
    /// synthetic GAME_END so clients leave their round screens.
    pub async fn stop_match(&self) {
        let taken = self.driver.lock().await.take();
        let Some((handle, cancel)) = taken else {
            debug!("stop requested with no match running");
            return;
        };
        let _ = cancel.send(true);
        let _ = handle.await;

        self.noise.stop().await;
        self.decoy.stop().await;
        self.dummy.stop().await;
        self.coordinator.reset_round().await;
        {
            let mut registry = self.registry.write().await;
            registry.reset_all_round_data();
        }
        self.defense.lock().await.clear();
        {
            let mut status = self.status.lock().await;
            *status = MatchStatus::default();
        }
        self.outbound
            .broadcast(Message::GameEnd {
                message: "match stopped".to_string(),
                rankings: Vec::new(),
                winner: None,
            })
            .await;
        info!("match stopped");
    }

    /// Accepts a defense submission while a round is live. Submissions merge
    /// into the round's accumulated set, so resubmitting is idempotent and
    /// an address can never be retracted.
    pub async fn submit_defense(&self, player_id: &str, attacker_ips: Vec<String>) {
        let phase = {
            let status = self.status.lock().await;
            status.phase
        };
        if !matches!(phase, MatchPhase::Playing | MatchPhase::Defense) {
            debug!(
                "defense from {} ignored in phase {}",
                player_id,
                phase.as_str()
            );
            return;
        }

        let mut defense = self.defense.lock().await;
        let entry = defense.entry(player_id.to_string()).or_default();
        for ip in attacker_ips {
            entry.insert(ip);
        }
        info!("defense submitted by {} ({} addresses)", player_id, entry.len());
    }

    pub async fn status_report(&self) -> StatusReport {
        let (phase, round, difficulty) = {
            let status = self.status.lock().await;
            (
                status.phase,
                status.round,
                status.difficulty.map(|d| d.name),
            )
        };
        let (player_count, players) = {
            let registry = self.registry.read().await;
            (registry.player_count(), registry.list_infos())
        };
        StatusReport {
            match_state: phase.as_str(),
            round,
            total: TOTAL_ROUNDS,
            player_count,
            players,
            difficulty,
        }
    }

    async fn run_match(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        match self.drive(&mut cancel).await {
            Ok(true) => info!("match complete"),
            Ok(false) => debug!("match driver cancelled"),
            Err(e) => {
                // Internal failure aborts the match but keeps the server up
                error!("round engine failed: {}", e);
                self.finish_match("match aborted").await;
            }
        }
    }

    async fn drive(&self, cancel: &mut watch::Receiver<bool>) -> Result<bool, String> {
        self.dummy.start().await;
        {
            let mut status = self.status.lock().await;
            status.phase = MatchPhase::Preparation;
            status.round = 0;
            status.difficulty = None;
        }

        let players = {
            let registry = self.registry.read().await;
            registry.list_infos()
        };
        self.outbound
            .broadcast(Message::GameStart {
                round_num: 0,
                total_rounds: TOTAL_ROUNDS,
                message: format!("Match starting: {} rounds", TOTAL_ROUNDS),
                players,
            })
            .await;
        if !phase_sleep(Duration::from_secs(3), cancel).await {
            return Ok(false);
        }

        for round in 1..=TOTAL_ROUNDS {
            if !self.run_round(round, cancel).await? {
                return Ok(false);
            }
        }

        self.finish_match("match complete").await;
        Ok(true)
    }

    async fn run_round(&self, round: u32, cancel: &mut watch::Receiver<bool>) -> Result<bool, String> {
        let profile = difficulty_for_round(round)
            .ok_or_else(|| format!("no difficulty profile for round {}", round))?;
        info!("round {} starting: {}", round, profile.name);

        self.dummy.set_interval(profile.dummy_interval);
        {
            let mut registry = self.registry.write().await;
            registry.reset_all_round_data();
        }
        self.defense.lock().await.clear();
        self.coordinator.reset_round().await;

        // Preparation
        {
            let mut status = self.status.lock().await;
            status.phase = MatchPhase::Preparation;
            status.round = round;
            status.difficulty = Some(profile);
            status.play_started_at = None;
        }
        self.outbound
            .broadcast(Message::RoundStart {
                round_num: round,
                total_rounds: TOTAL_ROUNDS,
                time_remaining: PREPARATION_TIME,
                difficulty: DifficultySummary::from(profile),
                message: format!("Round {} ({}) starting soon", round, profile.name),
            })
            .await;
        if !phase_sleep(Duration::from_secs(PREPARATION_TIME), cancel).await {
            return Ok(false);
        }

        // Playing
        {
            let mut status = self.status.lock().await;
            status.phase = MatchPhase::Playing;
            status.play_started_at = Some(Instant::now());
        }
        self.outbound
            .broadcast(Message::Playing {
                round_num: round,
                time_remaining: ROUND_TIME,
                message: "Round live! Attack, and watch the channel for attackers".to_string(),
            })
            .await;
        if profile.noise_traffic {
            self.noise.start().await;
        }
        if profile.decoy_attacks {
            self.decoy.start(ROUND_TIME, profile.decoy_count).await;
        }

        for elapsed in 1..=ROUND_TIME {
            if !phase_sleep(Duration::from_secs(1), cancel).await {
                self.noise.stop().await;
                self.decoy.stop().await;
                return Ok(false);
            }
            let remaining = ROUND_TIME - elapsed;
            if remaining > 0 && remaining % 10 == 0 {
                self.outbound.broadcast(Message::time_update(remaining)).await;
            }
        }
        self.noise.stop().await;
        self.decoy.stop().await;

        // Defense input window
        {
            let mut status = self.status.lock().await;
            status.phase = MatchPhase::Defense;
        }
        self.outbound
            .broadcast(Message::DefensePhase {
                round_num: round,
                time_remaining: profile.defense_time,
                message: "Defense phase! Submit the addresses that attacked you".to_string(),
            })
            .await;
        if !phase_sleep(Duration::from_secs(profile.defense_time), cancel).await {
            return Ok(false);
        }

        // Round end: score, report, summarise
        {
            let mut status = self.status.lock().await;
            status.phase = MatchPhase::RoundEnd;
        }
        self.score_and_report(round).await;

        let players = {
            let registry = self.registry.read().await;
            registry.list_infos()
        };
        self.outbound
            .broadcast(Message::RoundEnd {
                round_num: round,
                message: format!("Round {} complete", round),
                players,
            })
            .await;
        if !phase_sleep(Duration::from_secs(5), cancel).await {
            return Ok(false);
        }
        Ok(true)
    }

    /// Runs the scorer and applies its outcome: registry deltas, one SCORE
    /// per player, then a roster broadcast since HP changed.
    async fn score_and_report(&self, round: u32) {
        let committed = self.coordinator.committed_snapshot().await;
        let submissions = self.defense.lock().await.clone();
        let player_ids = {
            let registry = self.registry.read().await;
            registry.player_ids()
        };

        let outcomes = score_round(&player_ids, &committed, &submissions, round);
        for (player_id, outcome) in &outcomes {
            let (score, hp) = {
                let mut registry = self.registry.write().await;
                let score = registry.update_score(player_id, outcome.score_delta);
                let hp = registry.update_hp(player_id, outcome.hp_delta);
                (score, hp)
            };
            debug!(
                "round {} score for {}: {:+} pts, {:+} hp ({})",
                round, player_id, outcome.score_delta, outcome.hp_delta, outcome.reason
            );
            self.outbound
                .send_to(
                    player_id,
                    Message::Score {
                        player_id: player_id.clone(),
                        score,
                        hp,
                        correct: outcome.all_clear,
                        reason: outcome.reason.clone(),
                    },
                )
                .await;
        }
        self.outbound.broadcast_player_list().await;
    }

    /// Final rankings and GAME_END; also used to abort on internal error.
    async fn finish_match(&self, note: &str) {
        self.noise.stop().await;
        self.decoy.stop().await;
        self.dummy.stop().await;
        {
            let mut status = self.status.lock().await;
            status.phase = MatchPhase::GameEnd;
        }

        let standings = {
            let registry = self.registry.read().await;
            registry.rankings()
        };
        let winner = standings.first().map(|p| p.player_id.clone());
        let rankings: Vec<RankingEntry> = standings
            .iter()
            .enumerate()
            .map(|(i, p)| RankingEntry {
                rank: i + 1,
                player_id: p.player_id.clone(),
                score: p.score,
                hp: p.hp,
            })
            .collect();

        let message = match &winner {
            Some(w) => format!("{} - winner: {}", note, w),
            None => note.to_string(),
        };
        info!("{}", message);
        self.outbound
            .broadcast(Message::GameEnd {
                message,
                rankings,
                winner,
            })
            .await;
    }
}

async fn phase_sleep(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player_registry::PlayerRegistry;
    use shared::{OUTBOUND_QUEUE, INITIAL_HP};
    use std::net::SocketAddr;
    use tokio::sync::{mpsc, Notify, RwLock};

    struct Rig {
        manager: Arc<GameManager>,
        registry: SharedRegistry,
        status: SharedStatus,
        rx: HashMap<String, mpsc::Receiver<Message>>,
    }

    async fn rig(player_ids: &[&str]) -> Rig {
        let registry: SharedRegistry = Arc::new(RwLock::new(PlayerRegistry::new(4)));
        let mut rx = HashMap::new();
        {
            let mut reg = registry.write().await;
            for (n, id) in player_ids.iter().enumerate() {
                let (tx, receiver) = mpsc::channel(OUTBOUND_QUEUE);
                let addr: SocketAddr = format!("127.0.0.{}:3000{}", n + 1, n).parse().unwrap();
                reg.add(id, addr, tx, Arc::new(Notify::new())).unwrap();
                rx.insert(id.to_string(), receiver);
            }
        }
        let status = new_shared_status();
        let outbound = Outbound::new(registry.clone());
        let coordinator = Arc::new(AttackCoordinator::new(
            registry.clone(),
            outbound.clone(),
            status.clone(),
        ));
        let manager = GameManager::new(registry.clone(), outbound, coordinator, status.clone());
        Rig {
            manager,
            registry,
            status,
            rx,
        }
    }

    async fn force_phase(status: &SharedStatus, phase: MatchPhase, round: u32) {
        let mut guard = status.lock().await;
        guard.phase = phase;
        guard.round = round;
        guard.difficulty = difficulty_for_round(round);
    }

    #[tokio::test]
    async fn test_start_refused_below_min_players() {
        let rig = rig(&["A"]).await;
        let err = rig.manager.start_match().await.unwrap_err();
        assert!(err.contains("need at least 2 players"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_two_players_and_double_start_refused() {
        let rig = rig(&["A", "B"]).await;
        rig.manager.start_match().await.unwrap();
        assert_eq!(
            rig.manager.start_match().await.unwrap_err(),
            "match already running"
        );
        rig.manager.stop_match().await;
    }

    #[tokio::test]
    async fn test_defense_ignored_outside_round() {
        let rig = rig(&["A", "B"]).await;
        rig.manager
            .submit_defense("B", vec!["10.0.0.1".to_string()])
            .await;
        assert!(rig.manager.defense.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_defense_accumulates_as_union() {
        let rig = rig(&["A", "B"]).await;
        force_phase(&rig.status, MatchPhase::Playing, 1).await;

        rig.manager
            .submit_defense("B", vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
            .await;
        rig.manager
            .submit_defense("B", vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()])
            .await;
        // Resubmitting the same set is idempotent
        rig.manager
            .submit_defense("B", vec!["10.0.0.3".to_string()])
            .await;

        let defense = rig.manager.defense.lock().await;
        let set = defense.get("B").unwrap();
        assert_eq!(set.len(), 3);
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            assert!(set.contains(ip));
        }
    }

    #[tokio::test]
    async fn test_defense_accepted_in_defense_phase() {
        let rig = rig(&["A", "B"]).await;
        force_phase(&rig.status, MatchPhase::Defense, 2).await;
        rig.manager
            .submit_defense("A", vec!["10.0.0.9".to_string()])
            .await;
        assert_eq!(rig.manager.defense.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_match_resets_and_broadcasts_synthetic_game_end() {
        let mut rig = rig(&["A", "B"]).await;
        rig.manager.start_match().await.unwrap();
        // Let the driver get into the match
        tokio::time::sleep(Duration::from_secs(20)).await;
        rig.manager.stop_match().await;

        {
            let status = rig.status.lock().await;
            assert_eq!(status.phase, MatchPhase::Waiting);
            assert_eq!(status.round, 0);
            assert!(status.difficulty.is_none());
        }

        // The synthetic GAME_END is the last thing on the wire
        let mut saw_game_end = false;
        while let Ok(msg) = rig.rx.get_mut("A").unwrap().try_recv() {
            if let Message::GameEnd { winner, rankings, .. } = msg {
                assert!(winner.is_none());
                assert!(rankings.is_empty());
                saw_game_end = true;
            }
        }
        assert!(saw_game_end);

        // A fresh match may start afterwards
        rig.manager.start_match().await.unwrap();
        rig.manager.stop_match().await;
    }

    #[tokio::test]
    async fn test_status_report_shape() {
        let rig = rig(&["A", "B"]).await;
        let report = rig.manager.status_report().await;
        assert_eq!(report.match_state, "WAITING");
        assert_eq!(report.round, 0);
        assert_eq!(report.total, TOTAL_ROUNDS);
        assert_eq!(report.player_count, 2);
        assert_eq!(report.players.len(), 2);
        assert!(report.difficulty.is_none());

        force_phase(&rig.status, MatchPhase::Playing, 3).await;
        let report = rig.manager.status_report().await;
        assert_eq!(report.match_state, "PLAYING");
        assert_eq!(report.round, 3);
        assert_eq!(report.difficulty, Some("Intermediate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_match_walks_all_phases() {
        let mut rig = rig(&["A", "B"]).await;

        // Drain each player's stream concurrently; classify as we go
        let mut collectors = Vec::new();
        for id in ["A", "B"] {
            let mut receiver = rig.rx.remove(id).unwrap();
            collectors.push(tokio::spawn(async move {
                let mut counts: HashMap<&'static str, usize> = HashMap::new();
                let mut final_msg = None;
                while let Some(msg) = receiver.recv().await {
                    let done = matches!(msg, Message::GameEnd { .. });
                    *counts.entry(msg.type_name()).or_insert(0) += 1;
                    if done {
                        final_msg = Some(msg);
                        break;
                    }
                }
                (counts, final_msg)
            }));
        }

        rig.manager.start_match().await.unwrap();

        for collector in collectors {
            let (counts, final_msg) = collector.await.unwrap();
            assert_eq!(counts.get("GAME_START"), Some(&1));
            assert_eq!(counts.get("ROUND_START"), Some(&5));
            assert_eq!(counts.get("PLAYING"), Some(&5));
            assert_eq!(counts.get("DEFENSE_PHASE"), Some(&5));
            assert_eq!(counts.get("ROUND_END"), Some(&5));
            assert_eq!(counts.get("SCORE"), Some(&5));
            assert_eq!(counts.get("GAME_END"), Some(&1));
            // Dummy traffic ran throughout
            assert!(counts.get("DUMMY").copied().unwrap_or(0) > 0);

            match final_msg.unwrap() {
                Message::GameEnd { rankings, winner, .. } => {
                    assert_eq!(rankings.len(), 2);
                    assert_eq!(rankings[0].rank, 1);
                    assert!(winner.is_some());
                }
                other => panic!("expected GAME_END, got {:?}", other),
            }
        }

        // Nobody attacked: scores and HP untouched
        {
            let registry = rig.registry.read().await;
            for id in ["A", "B"] {
                let player = registry.lookup(id).unwrap();
                assert_eq!(player.score, 0);
                assert_eq!(player.hp, INITIAL_HP);
            }
            assert_eq!(rig.status.lock().await.phase, MatchPhase::GameEnd);
        }
    }
}
