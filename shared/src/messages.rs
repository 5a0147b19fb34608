//! Message vocabulary for client/server and peer-to-peer communication
//!
//! Every frame on the wire is a JSON object with a `"type"` tag, an
//! informational `"timestamp"` field (added by the codec), and per-type
//! fields. The vocabulary is modeled as one internally tagged enum so the
//! parser maps `"type"` straight to a variant; unknown types land in the
//! [`Message::Unknown`] catch-all, which dispatchers log and ignore.
//!
//! Payload fields of `ATTACK`/`DUMMY`/`NOISE`/`DECOY_ATTACK` carry base64 of
//! the semantic string so on-wire bytes do not plainly reveal it to players
//! watching the channel with capture tools.

use crate::{DifficultyProfile, PlayerInfo};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Encodes a payload string as base64 for transmission.
pub fn encode_payload(payload: &str) -> String {
    BASE64.encode(payload.as_bytes())
}

/// Decodes a base64 payload back to the original string.
///
/// Falls back to returning the input unchanged when it is not valid base64
/// UTF-8, so captured traffic can always be displayed.
pub fn decode_payload(encoded: &str) -> String {
    BASE64
        .decode(encoded.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| encoded.to_string())
}

/// Which half of the two-phase attack exchange a confirmation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmType {
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "RECEIVED")]
    Received,
}

/// Serializable difficulty projection carried inside `ROUND_START`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultySummary {
    pub name: String,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub attack_limit: u32,
    pub noise_traffic: bool,
    pub decoy_attacks: bool,
}

impl From<&DifficultyProfile> for DifficultySummary {
    fn from(profile: &DifficultyProfile) -> Self {
        Self {
            name: profile.name.to_string(),
            hint: profile.hint.to_string(),
            warning: profile.warning.map(str::to_string),
            attack_limit: profile.attack_limit,
            noise_traffic: profile.noise_traffic,
            decoy_attacks: profile.decoy_attacks,
        }
    }
}

/// One row of the final `GAME_END` ranking table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub player_id: String,
    pub score: i32,
    pub hp: i32,
}

/// The complete message vocabulary.
///
/// Client → server: `Connect`, `AttackRequest`, `AttackConfirm`, `Defense`.
/// Server → client: everything else except `Attack`, which travels directly
/// between players over the P2P port after approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// First frame a client must send after the TCP accept.
    #[serde(rename = "CONNECT")]
    Connect {
        player_id: String,
        /// Ignored by the server, which trusts only the observed peer
        /// address.
        #[serde(default)]
        player_ip: String,
    },

    /// Player asks to attack another player; answered with
    /// `ATTACK_APPROVED` or an `INFO` denial.
    #[serde(rename = "ATTACK_REQUEST")]
    AttackRequest {
        attacker_id: String,
        target_id: String,
    },

    /// One side of a two-phase attack exchange reporting completion.
    #[serde(rename = "ATTACK_CONFIRM")]
    AttackConfirm {
        attack_id: String,
        confirm_type: ConfirmType,
        #[serde(default)]
        from_player: String,
        #[serde(default)]
        to_player: String,
    },

    /// Defense submission; sets union across a round.
    #[serde(rename = "DEFENSE")]
    Defense {
        player_id: String,
        attacker_ips: Vec<String>,
    },

    /// General notices: WELCOME, TIME_UPDATE, ATTACK_DENIED, ERROR.
    #[serde(rename = "INFO")]
    Info {
        info_type: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_ip: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_remaining: Option<u64>,
    },

    /// Roster snapshot, broadcast on every join/leave and on HP change.
    #[serde(rename = "PLAYER_LIST")]
    PlayerList { players: Vec<PlayerInfo> },

    #[serde(rename = "GAME_START")]
    GameStart {
        round_num: u32,
        total_rounds: u32,
        message: String,
        players: Vec<PlayerInfo>,
    },

    #[serde(rename = "ROUND_START")]
    RoundStart {
        round_num: u32,
        total_rounds: u32,
        time_remaining: u64,
        difficulty: DifficultySummary,
        message: String,
    },

    #[serde(rename = "PLAYING")]
    Playing {
        round_num: u32,
        time_remaining: u64,
        message: String,
    },

    #[serde(rename = "DEFENSE_PHASE")]
    DefensePhase {
        round_num: u32,
        time_remaining: u64,
        message: String,
    },

    #[serde(rename = "ROUND_END")]
    RoundEnd {
        round_num: u32,
        message: String,
        players: Vec<PlayerInfo>,
    },

    #[serde(rename = "GAME_END")]
    GameEnd {
        message: String,
        rankings: Vec<RankingEntry>,
        winner: Option<String>,
    },

    /// Server grants an attack and tells the attacker where to deliver it.
    #[serde(rename = "ATTACK_APPROVED")]
    AttackApproved {
        attack_id: String,
        target_ip: String,
        target_port: u16,
        target_id: String,
    },

    /// Heads-up to the target that an approved attack is inbound.
    #[serde(rename = "INCOMING_ATTACK_WARNING")]
    IncomingAttackWarning {
        attack_id: String,
        attacker_ip: String,
        attacker_id: String,
    },

    /// Per-player round result.
    #[serde(rename = "SCORE")]
    Score {
        player_id: String,
        score: i32,
        hp: i32,
        correct: bool,
        reason: String,
    },

    /// Benign broadcast filler traffic.
    #[serde(rename = "DUMMY")]
    Dummy { payload: String },

    /// Benign player-to-player traffic, delivered to the receiver only.
    #[serde(rename = "NOISE")]
    Noise {
        from_ip: String,
        to_ip: String,
        from_player: String,
        to_player: String,
        payload: String,
    },

    /// Server-synthesised pseudo-attack attributed to an innocent player.
    /// Indistinguishable from `ATTACK` except for the type tag and the
    /// `is_decoy` marker; never recorded as a received attack.
    #[serde(rename = "DECOY_ATTACK")]
    DecoyAttack {
        from_ip: String,
        to_ip: String,
        from_player: String,
        to_player: String,
        payload: String,
        is_decoy: bool,
    },

    /// The real attack packet, written once to the target's P2P port.
    #[serde(rename = "ATTACK")]
    Attack {
        attack_id: String,
        from_ip: String,
        to_ip: String,
        from_player: String,
        to_player: String,
        payload: String,
    },

    /// Catch-all for message types this build does not know; dispatchers
    /// log and ignore it.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// WELCOME reply to a successful CONNECT.
    pub fn welcome(player_id: &str, player_ip: &str, player_index: usize) -> Self {
        Message::Info {
            info_type: "WELCOME".to_string(),
            message: format!("Welcome, {}!", player_id),
            player_id: Some(player_id.to_string()),
            player_ip: Some(player_ip.to_string()),
            player_index: Some(player_index),
            time_remaining: None,
        }
    }

    /// Denial notice for a refused attack request.
    pub fn attack_denied(reason: &str) -> Self {
        Message::Info {
            info_type: "ATTACK_DENIED".to_string(),
            message: reason.to_string(),
            player_id: None,
            player_ip: None,
            player_index: None,
            time_remaining: None,
        }
    }

    /// Remaining-time notice broadcast during the playing phase.
    pub fn time_update(time_remaining: u64) -> Self {
        Message::Info {
            info_type: "TIME_UPDATE".to_string(),
            message: format!("{} seconds remaining", time_remaining),
            player_id: None,
            player_ip: None,
            player_index: None,
            time_remaining: Some(time_remaining),
        }
    }

    /// Generic error notice; the session that caused it stays open.
    pub fn error(message: &str) -> Self {
        Message::Info {
            info_type: "ERROR".to_string(),
            message: message.to_string(),
            player_id: None,
            player_ip: None,
            player_index: None,
            time_remaining: None,
        }
    }

    /// Wire tag for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "CONNECT",
            Message::AttackRequest { .. } => "ATTACK_REQUEST",
            Message::AttackConfirm { .. } => "ATTACK_CONFIRM",
            Message::Defense { .. } => "DEFENSE",
            Message::Info { .. } => "INFO",
            Message::PlayerList { .. } => "PLAYER_LIST",
            Message::GameStart { .. } => "GAME_START",
            Message::RoundStart { .. } => "ROUND_START",
            Message::Playing { .. } => "PLAYING",
            Message::DefensePhase { .. } => "DEFENSE_PHASE",
            Message::RoundEnd { .. } => "ROUND_END",
            Message::GameEnd { .. } => "GAME_END",
            Message::AttackApproved { .. } => "ATTACK_APPROVED",
            Message::IncomingAttackWarning { .. } => "INCOMING_ATTACK_WARNING",
            Message::Score { .. } => "SCORE",
            Message::Dummy { .. } => "DUMMY",
            Message::Noise { .. } => "NOISE",
            Message::DecoyAttack { .. } => "DECOY_ATTACK",
            Message::Attack { .. } => "ATTACK",
            Message::Unknown => "UNKNOWN",
        }
    }
}
