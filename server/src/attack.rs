//! Two-phase P2P attack approval and confirmation
//!
//! A player never fires at another player until the coordinator authorises
//! it, and an authorised attack only counts once both endpoints have
//! confirmed the exchange. That makes a network-dropped attack worthless to
//! both sides: it is neither charged against the attacker's cap nor scored
//! against the target, and neither party can unilaterally claim or deny
//! delivery.
//!
//! Per-attack lifecycle: `NEW → PENDING → COMMITTED`, or `NEW → REJECTED`,
//! or `PENDING → TIMEOUT`. A pending record exists exactly as long as its
//! one-shot expiry timer is live: commit aborts the timer and removes the
//! record; expiry removes the record under the same lock, so the two paths
//! can never both fire.

use crate::game::{MatchPhase, SharedStatus};
use crate::network::{Outbound, SharedRegistry};
use log::{debug, info};
use shared::messages::{ConfirmType, Message};
use shared::{unix_timestamp, ATTACK_APPROVAL_TIMEOUT, BASE_PORT};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// An attack whose two-phase exchange completed; input to the scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedAttack {
    pub attacker_id: String,
    pub target_id: String,
    pub attacker_ip: String,
    pub timestamp: f64,
}

/// Everything the attacker needs to deliver an approved attack.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedAttack {
    pub attack_id: String,
    pub attacker_ip: String,
    pub target_ip: String,
    pub target_port: u16,
}

struct PendingAttack {
    attacker_id: String,
    target_id: String,
    attacker_ip: String,
    attacker_sent: bool,
    target_received: bool,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct CoordinatorState {
    pending: HashMap<String, PendingAttack>,
    /// Append-only within a round, in order of two-phase completion
    committed: Vec<CommittedAttack>,
    /// Committed attacks per attacker this round, for cap enforcement
    counts: HashMap<String, u32>,
    seq: u64,
}

pub struct AttackCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
    registry: SharedRegistry,
    outbound: Outbound,
    status: SharedStatus,
}

impl AttackCoordinator {
    pub fn new(registry: SharedRegistry, outbound: Outbound, status: SharedStatus) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            registry,
            outbound,
            status,
        }
    }

    /// Handles an `ATTACK_REQUEST`: either arms a pending attack and tells
    /// both endpoints, or sends the attacker a denial notice.
    pub async fn handle_request(&self, attacker_id: &str, target_id: &str) {
        match self.request_approval(attacker_id, target_id).await {
            Ok(approved) => {
                info!(
                    "attack approved: {} -> {} ({})",
                    attacker_id, target_id, approved.attack_id
                );
                self.outbound
                    .send_to(
                        attacker_id,
                        Message::AttackApproved {
                            attack_id: approved.attack_id.clone(),
                            target_ip: approved.target_ip,
                            target_port: approved.target_port,
                            target_id: target_id.to_string(),
                        },
                    )
                    .await;
                self.outbound
                    .send_to(
                        target_id,
                        Message::IncomingAttackWarning {
                            attack_id: approved.attack_id,
                            attacker_ip: approved.attacker_ip,
                            attacker_id: attacker_id.to_string(),
                        },
                    )
                    .await;
            }
            Err(reason) => {
                info!("attack denied: {} -> {}: {}", attacker_id, target_id, reason);
                self.outbound
                    .send_to(attacker_id, Message::attack_denied(&reason))
                    .await;
            }
        }
    }

    /// Validates a request and, on success, creates the pending record and
    /// arms its expiry timer. Denial reasons are checked in a fixed order.
    pub async fn request_approval(
        &self,
        attacker_id: &str,
        target_id: &str,
    ) -> Result<ApprovedAttack, String> {
        let mut state = self.state.lock().await;

        if attacker_id == target_id {
            return Err("self-attack forbidden".to_string());
        }

        let (playing, cap) = {
            let status = self.status.lock().await;
            (
                status.phase == MatchPhase::Playing,
                status.difficulty.map(|d| d.attack_limit),
            )
        };
        if !playing {
            return Err("not in play phase".to_string());
        }
        let cap = match cap {
            Some(cap) => cap,
            None => return Err("no difficulty".to_string()),
        };

        let used = state.counts.get(attacker_id).copied().unwrap_or(0);
        if used >= cap {
            return Err(format!("cap reached ({}/{})", used, cap));
        }

        // Lock order is coordinator -> registry, never the reverse
        let (attacker_ip, target_ip, target_port) = {
            let registry = self.registry.read().await;
            let target = match registry.lookup(target_id) {
                Some(target) => target,
                None => return Err("no such target".to_string()),
            };
            let attacker = match registry.lookup(attacker_id) {
                Some(attacker) => attacker,
                None => return Err("attacker gone".to_string()),
            };
            (
                attacker.ip.clone(),
                target.ip.clone(),
                BASE_PORT + target.index as u16,
            )
        };

        state.seq += 1;
        let attack_id = format!(
            "{}→{}_{}_{}",
            attacker_id,
            target_id,
            unix_timestamp() as u64,
            state.seq
        );

        // The expiry task and the commit path race for the same record; both
        // resolve under the state lock, so exactly one of them removes it.
        let timer = {
            let state = Arc::clone(&self.state);
            let attack_id = attack_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ATTACK_APPROVAL_TIMEOUT).await;
                if state.lock().await.pending.remove(&attack_id).is_some() {
                    debug!("attack {} expired unconfirmed", attack_id);
                }
            })
        };

        state.pending.insert(
            attack_id.clone(),
            PendingAttack {
                attacker_id: attacker_id.to_string(),
                target_id: target_id.to_string(),
                attacker_ip: attacker_ip.clone(),
                attacker_sent: false,
                target_received: false,
                timer,
            },
        );

        Ok(ApprovedAttack {
            attack_id,
            attacker_ip,
            target_ip,
            target_port,
        })
    }

    /// Records one side's confirmation. Unknown ids are ignored; they are
    /// usually confirms arriving after the expiry timer fired.
    pub async fn handle_confirm(&self, attack_id: &str, confirm: ConfirmType) {
        let committed = {
            let mut state = self.state.lock().await;
            let both = match state.pending.get_mut(attack_id) {
                Some(pending) => {
                    match confirm {
                        ConfirmType::Sent => pending.attacker_sent = true,
                        ConfirmType::Received => pending.target_received = true,
                    }
                    pending.attacker_sent && pending.target_received
                }
                None => {
                    debug!("confirm for unknown attack {} ignored", attack_id);
                    return;
                }
            };
            if !both {
                return;
            }

            let pending = match state.pending.remove(attack_id) {
                Some(pending) => pending,
                None => return,
            };
            pending.timer.abort();

            let record = CommittedAttack {
                attacker_id: pending.attacker_id.clone(),
                target_id: pending.target_id.clone(),
                attacker_ip: pending.attacker_ip.clone(),
                timestamp: unix_timestamp(),
            };
            info!(
                "attack {} committed ({} -> {})",
                attack_id, record.attacker_id, record.target_id
            );
            state.committed.push(record.clone());
            *state.counts.entry(pending.attacker_id).or_insert(0) += 1;
            record
        };

        let mut registry = self.registry.write().await;
        registry.record_attack_received(&committed.target_id, &committed.attacker_ip);
    }

    /// Clears per-round bookkeeping and cancels anything still pending.
    pub async fn reset_round(&self) {
        let mut state = self.state.lock().await;
        for (_, pending) in state.pending.drain() {
            pending.timer.abort();
        }
        state.committed.clear();
        state.counts.clear();
    }

    /// Committed attacks so far this round, in completion order.
    pub async fn committed_snapshot(&self) -> Vec<CommittedAttack> {
        self.state.lock().await.committed.clone()
    }

    /// Committed attacks by one attacker this round.
    pub async fn attack_count(&self, attacker_id: &str) -> u32 {
        self.state
            .lock()
            .await
            .counts
            .get(attacker_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
