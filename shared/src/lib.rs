//! # Shared Protocol Library
//!
//! This crate contains everything the game server and the player client must
//! agree on: tunable game constants, the per-round difficulty table, the JSON
//! message vocabulary, and the length-prefixed frame codec used on every TCP
//! connection (server sessions and peer-to-peer attack deliveries alike).
//!
//! ## Core Components
//!
//! ### Game Constants
//! Match parameters shared by both sides: round counts and phase durations,
//! player limits, HP rules, the attack-approval timeout, and the base port
//! from which per-player P2P listen ports are derived.
//!
//! ### Difficulty Table
//! One [`DifficultyProfile`] per round (1–5). Profiles control dummy-packet
//! rates, the per-round attack cap, the defense input window, and which
//! obfuscation layers (noise traffic, decoy attacks) are active.
//!
//! ### Message Vocabulary
//! The [`messages`] module defines the complete client/server protocol as a
//! tagged sum over message types, plus the base64 payload helpers that keep
//! packet-capture observers from reading payloads in plaintext.
//!
//! ### Frame Codec
//! The [`protocol`] module implements the wire framing: a 4-byte big-endian
//! length prefix followed by that many UTF-8 bytes of JSON.

pub mod messages;
pub mod protocol;

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default server bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server TCP port
pub const DEFAULT_PORT: u16 = 9999;

/// Minimum players required before a match may start
pub const MIN_PLAYERS: usize = 2;

/// Simple admission cap: connections beyond this are refused
pub const MAX_PLAYERS: usize = 4;

/// Rounds per match
pub const TOTAL_ROUNDS: u32 = 5;

/// Duration of the playing phase, seconds
pub const ROUND_TIME: u64 = 90;

/// Duration of the preparation phase before each round, seconds
pub const PREPARATION_TIME: u64 = 10;

/// Default defense input window, seconds (profiles may override)
pub const DEFENSE_INPUT_TIME: u64 = 20;

/// Starting (and maximum) player HP
pub const INITIAL_HP: i32 = 100;

/// HP lost per attack hit that slips through the defense
pub const HP_DAMAGE_PER_ATTACK: i32 = 10;

/// How long the server waits for both SENT and RECEIVED confirmations
/// before silently discarding a pending attack
pub const ATTACK_APPROVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a fresh TCP connection gets to present its CONNECT frame
pub const CONNECT_DEADLINE: Duration = Duration::from_secs(5);

/// How long the attacker waits when dialing a target's P2P port
pub const P2P_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// First P2P listen port; player `n` listens on `BASE_PORT + n`
pub const BASE_PORT: u16 = 10001;

/// Per-connection outbound queue depth; overflow disconnects the recipient
pub const OUTBOUND_QUEUE: usize = 64;

/// Score weights `(correct, wrong, missed)` for rounds 1–4
pub const SCORE_WEIGHTS_NORMAL: (i32, i32, i32) = (10, -5, -3);

/// Score weights `(correct, wrong, missed)` for the final round
pub const SCORE_WEIGHTS_FINAL: (i32, i32, i32) = (15, -10, -5);

/// Per-round parameter bundle controlling traffic rates, attack caps and
/// which obfuscation layers are active.
///
/// The table is fixed for the five rounds of a match; profiles are looked up
/// by round number via [`difficulty_for_round`]. The serializable projection
/// that rides inside `ROUND_START` is [`messages::DifficultySummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyProfile {
    pub round: u32,
    pub name: &'static str,
    /// Mean dummy-packet interval in seconds; actual intervals are drawn
    /// uniformly from `[interval, 2 * interval]`
    pub dummy_interval: f64,
    /// Attacks each player may commit this round
    pub attack_limit: u32,
    /// Defense input window in seconds
    pub defense_time: u64,
    pub noise_traffic: bool,
    pub decoy_attacks: bool,
    pub decoy_count: u32,
    pub hint: &'static str,
    pub warning: Option<&'static str>,
}

static DIFFICULTY_BY_ROUND: [DifficultyProfile; 5] = [
    DifficultyProfile {
        round: 1,
        name: "Introduction",
        dummy_interval: 2.0,
        attack_limit: 3,
        defense_time: 20,
        noise_traffic: false,
        decoy_attacks: false,
        decoy_count: 0,
        hint: "Learn basic IP-based attack detection",
        warning: None,
    },
    DifficultyProfile {
        round: 2,
        name: "Beginner",
        dummy_interval: 1.5,
        attack_limit: 3,
        defense_time: 20,
        noise_traffic: false,
        decoy_attacks: false,
        decoy_count: 0,
        hint: "Dummy packets arrive more frequently",
        warning: None,
    },
    DifficultyProfile {
        round: 3,
        name: "Intermediate",
        dummy_interval: 1.0,
        attack_limit: 4,
        defense_time: 20,
        noise_traffic: true,
        decoy_attacks: false,
        decoy_count: 0,
        hint: "Noise traffic between players is added",
        warning: Some("Caution: non-attack traffic may also be observed"),
    },
    DifficultyProfile {
        round: 4,
        name: "Advanced",
        dummy_interval: 0.8,
        attack_limit: 4,
        defense_time: 20,
        noise_traffic: true,
        decoy_attacks: false,
        decoy_count: 0,
        hint: "Dummy packets and noise traffic intensify",
        warning: Some("Caution: packet analysis becomes harder"),
    },
    DifficultyProfile {
        round: 5,
        name: "Final Round",
        dummy_interval: 0.5,
        attack_limit: 5,
        defense_time: 20,
        noise_traffic: true,
        decoy_attacks: true,
        decoy_count: 10,
        hint: "Every obfuscation layer is active",
        warning: Some("Warning: decoy attacks are in play!"),
    },
];

/// Looks up the difficulty profile for a round (1-based).
///
/// Returns `None` for round 0 and anything past [`TOTAL_ROUNDS`].
pub fn difficulty_for_round(round: u32) -> Option<&'static DifficultyProfile> {
    if round == 0 {
        return None;
    }
    DIFFICULTY_BY_ROUND.get(round as usize - 1)
}

/// Score weights `(correct, wrong, missed)` for a given round.
pub fn score_weights(round: u32) -> (i32, i32, i32) {
    if round >= TOTAL_ROUNDS {
        SCORE_WEIGHTS_FINAL
    } else {
        SCORE_WEIGHTS_NORMAL
    }
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
///
/// Used for the informational `timestamp` field on every frame and for
/// attack-id generation.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}

/// Projection of one player shared in `PLAYER_LIST`, `GAME_START` and
/// `ROUND_END` broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: String,
    pub ip: String,
    pub score: i32,
    pub hp: i32,
    pub is_connected: bool,
}
