//! Background traffic generators: dummy, noise and decoy emitters
//!
//! Each generator owns one periodic task that emits through the session
//! layer's [`Outbound`] primitives, never by touching sockets. The round
//! engine starts and stops them as profiles dictate; the dummy generator
//! additionally has its mean interval retuned at every round start.

use crate::network::{Outbound, SharedRegistry};
use log::{debug, info};
use rand::Rng;
use shared::messages::{encode_payload, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Eight random uppercase alphanumerics, the tail of every generated
/// payload.
pub fn random_suffix() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

async fn swap_in_task(slot: &Mutex<Option<JoinHandle<()>>>, task: JoinHandle<()>) -> bool {
    let mut handle = slot.lock().await;
    if let Some(existing) = handle.as_ref() {
        if !existing.is_finished() {
            task.abort();
            return false;
        }
    }
    *handle = Some(task);
    true
}

async fn abort_task(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = slot.lock().await.take() {
        handle.abort();
    }
}

/// Broadcast filler traffic, active for the whole match.
///
/// Emission intervals are drawn uniformly from `[mean, 2 * mean]` seconds
/// around the current round's configured mean.
pub struct DummyGenerator {
    outbound: Outbound,
    mean_millis: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DummyGenerator {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            mean_millis: Arc::new(AtomicU64::new(1000)),
            handle: Mutex::new(None),
        }
    }

    /// Retunes the mean interval; takes effect from the next tick.
    pub fn set_interval(&self, mean_secs: f64) {
        let millis = (mean_secs.max(0.05) * 1000.0) as u64;
        self.mean_millis.store(millis, Ordering::Relaxed);
        debug!("dummy interval set to {:.2}s", mean_secs);
    }

    pub async fn start(&self) {
        let outbound = self.outbound.clone();
        let mean_millis = Arc::clone(&self.mean_millis);
        let task = tokio::spawn(async move {
            loop {
                let wait = {
                    let mean = mean_millis.load(Ordering::Relaxed) as f64 / 1000.0;
                    let mut rng = rand::thread_rng();
                    rng.gen_range(mean..mean * 2.0)
                };
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;

                let payload = encode_payload(&format!("DUMMY_{}", random_suffix()));
                outbound.broadcast(Message::Dummy { payload }).await;
            }
        });
        if swap_in_task(&self.handle, task).await {
            info!("dummy generator started");
        }
    }

    pub async fn stop(&self) {
        abort_task(&self.handle).await;
        info!("dummy generator stopped");
    }
}

/// Benign player-to-player traffic, active while a round with
/// `noise_traffic` plays. Each tick picks a random ordered pair of distinct
/// connected players and delivers a NOISE packet to the receiver only.
pub struct NoiseGenerator {
    registry: SharedRegistry,
    outbound: Outbound,
    handle: Mutex<Option<JoinHandle<()>>>,
}

const NOISE_INTERVAL_MIN: f64 = 3.0;
const NOISE_INTERVAL_MAX: f64 = 8.0;

impl NoiseGenerator {
    pub fn new(registry: SharedRegistry, outbound: Outbound) -> Self {
        Self {
            registry,
            outbound,
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();
        let task = tokio::spawn(async move {
            loop {
                let wait = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(NOISE_INTERVAL_MIN..NOISE_INTERVAL_MAX)
                };
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;

                let peers = {
                    let registry = registry.read().await;
                    registry.connected_peers()
                };
                if peers.len() < 2 {
                    continue;
                }

                let (sender, receiver) = {
                    let mut rng = rand::thread_rng();
                    let si = rng.gen_range(0..peers.len());
                    let mut ri = rng.gen_range(0..peers.len() - 1);
                    if ri >= si {
                        ri += 1;
                    }
                    (peers[si].clone(), peers[ri].clone())
                };

                let payload = encode_payload(&format!("NOISE_{}", random_suffix()));
                debug!("noise: {} -> {}", sender.0, receiver.0);
                outbound
                    .send_to(
                        &receiver.0,
                        Message::Noise {
                            from_ip: sender.1,
                            to_ip: receiver.1.clone(),
                            from_player: sender.0,
                            to_player: receiver.0.clone(),
                            payload,
                        },
                    )
                    .await;
            }
        });
        if swap_in_task(&self.handle, task).await {
            info!("noise generator started");
        }
    }

    pub async fn stop(&self) {
        abort_task(&self.handle).await;
        info!("noise generator stopped");
    }
}

/// Fake attacks attributed to innocent players, active only in rounds with
/// `decoy_attacks`. Spaces its quota evenly across the fixed round duration
/// with ±20 % jitter and a 1-second floor, then goes quiet.
///
/// Decoys are never recorded as received attacks; the only honest tell on
/// the wire is the type tag and the `is_decoy` marker.
pub struct DecoyGenerator {
    registry: SharedRegistry,
    outbound: Outbound,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DecoyGenerator {
    pub fn new(registry: SharedRegistry, outbound: Outbound) -> Self {
        Self {
            registry,
            outbound,
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self, round_duration_secs: u64, decoy_count: u32) {
        if decoy_count == 0 {
            return;
        }
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();
        let task = tokio::spawn(async move {
            let interval = round_duration_secs as f64 / decoy_count as f64;
            for _ in 0..decoy_count {
                let wait = {
                    let mut rng = rand::thread_rng();
                    let jitter = rng.gen_range(-0.2..0.2) * interval;
                    (interval + jitter).max(1.0)
                };
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;

                let peers = {
                    let registry = registry.read().await;
                    registry.connected_peers()
                };
                if peers.len() < 2 {
                    continue;
                }

                let (fake_sender, target) = {
                    let mut rng = rand::thread_rng();
                    let si = rng.gen_range(0..peers.len());
                    let mut ti = rng.gen_range(0..peers.len() - 1);
                    if ti >= si {
                        ti += 1;
                    }
                    (peers[si].clone(), peers[ti].clone())
                };

                // Same payload shape as a real attack
                let payload =
                    encode_payload(&format!("ATTACK_TARGET_{}_{}", target.0, random_suffix()));
                debug!("decoy: {} -> {} [fake]", fake_sender.0, target.0);
                outbound
                    .send_to(
                        &target.0,
                        Message::DecoyAttack {
                            from_ip: fake_sender.1,
                            to_ip: target.1.clone(),
                            from_player: fake_sender.0,
                            to_player: target.0.clone(),
                            payload,
                            is_decoy: true,
                        },
                    )
                    .await;
            }
            debug!("decoy generator finished its quota");
        });
        if swap_in_task(&self.handle, task).await {
            info!(
                "decoy generator started ({} decoys over {}s)",
                decoy_count, round_duration_secs
            );
        }
    }

    pub async fn stop(&self) {
        abort_task(&self.handle).await;
        info!("decoy generator stopped");
    }
}
