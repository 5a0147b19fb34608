//! Peer-to-peer attack delivery and the attack listener
//!
//! After `ATTACK_APPROVED`, the attacker opens a plain TCP connection to the
//! target's listen port, writes exactly one ATTACK frame and closes. The
//! receiving side reports `RECEIVED` to the server; the attacker reports
//! `SENT` once the write succeeded. If the dial fails or times out, no
//! `SENT` confirm is sent and the attack dies server-side.

use log::{debug, info, warn};
use rand::Rng;
use shared::messages::{encode_payload, ConfirmType, Message};
use shared::protocol::{read_frame, write_frame};
use shared::P2P_CONNECT_TIMEOUT;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Listener for inbound attack packets from other players.
pub struct AttackListener {
    listener: TcpListener,
}

impl AttackListener {
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("p2p attack listener on port {}", port);
        Ok(Self { listener })
    }

    pub fn local_port(&self) -> std::io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accepts attack connections forever, confirming each delivery to the
    /// server as `RECEIVED`.
    pub async fn serve(self, to_server: mpsc::Sender<Message>) {
        loop {
            let (mut stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("p2p accept failed: {}", e);
                    continue;
                }
            };
            let to_server = to_server.clone();
            tokio::spawn(async move {
                match read_frame(&mut stream).await {
                    Ok(Message::Attack {
                        attack_id,
                        from_player,
                        to_player,
                        ..
                    }) => {
                        info!("attack packet from {} ({})", from_player, addr);
                        let confirm = Message::AttackConfirm {
                            attack_id,
                            confirm_type: ConfirmType::Received,
                            from_player,
                            to_player,
                        };
                        if to_server.send(confirm).await.is_err() {
                            warn!("server connection gone, RECEIVED confirm dropped");
                        }
                    }
                    Ok(other) => {
                        debug!("p2p peer {} sent {}, ignoring", addr, other.type_name());
                    }
                    Err(e) => {
                        debug!("p2p read from {} failed: {}", addr, e);
                    }
                }
            });
        }
    }
}

/// Dials the target and writes the single ATTACK frame.
///
/// Returns true when the frame was written; the caller then sends the
/// `SENT` confirm. A connect failure or timeout returns false and the
/// pending attack is left to expire server-side.
pub async fn deliver_attack(
    attack_id: &str,
    target_ip: &str,
    target_port: u16,
    target_id: &str,
    my_id: &str,
    my_ip: &str,
) -> bool {
    let dial = timeout(
        P2P_CONNECT_TIMEOUT,
        TcpStream::connect((target_ip, target_port)),
    )
    .await;
    let mut stream = match dial {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("p2p connect to {}:{} failed: {}", target_ip, target_port, e);
            return false;
        }
        Err(_) => {
            warn!("p2p connect to {}:{} timed out", target_ip, target_port);
            return false;
        }
    };

    let payload = encode_payload(&format!("ATTACK_TARGET_{}_{}", target_id, random_suffix()));
    let attack = Message::Attack {
        attack_id: attack_id.to_string(),
        from_ip: my_ip.to_string(),
        to_ip: target_ip.to_string(),
        from_player: my_id.to_string(),
        to_player: target_id.to_string(),
        payload,
    };

    match write_frame(&mut stream, &attack).await {
        Ok(()) => {
            info!("attack {} delivered to {}", attack_id, target_id);
            true
        }
        Err(e) => {
            warn!("attack {} delivery failed: {}", attack_id, e);
            false
        }
    }
}

fn random_suffix() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::messages::decode_payload;

    #[tokio::test]
    async fn test_delivery_round_trip_confirms_received() {
        let listener = AttackListener::bind(0).await.unwrap();
        let port = listener.local_port().unwrap();
        let (to_server, mut from_listener) = mpsc::channel(8);
        tokio::spawn(listener.serve(to_server));

        let delivered =
            deliver_attack("A→B_1700000000_1", "127.0.0.1", port, "B", "A", "127.0.0.1").await;
        assert!(delivered);

        match from_listener.recv().await.unwrap() {
            Message::AttackConfirm {
                attack_id,
                confirm_type,
                from_player,
                to_player,
            } => {
                assert_eq!(attack_id, "A→B_1700000000_1");
                assert_eq!(confirm_type, ConfirmType::Received);
                assert_eq!(from_player, "A");
                assert_eq!(to_player, "B");
            }
            other => panic!("expected ATTACK_CONFIRM, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delivery_to_closed_port_fails() {
        // Bind then drop to get a port nobody is listening on
        let listener = AttackListener::bind(0).await.unwrap();
        let port = listener.local_port().unwrap();
        drop(listener);

        let delivered = deliver_attack("x", "127.0.0.1", port, "B", "A", "127.0.0.1").await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_attack_payload_shape() {
        let listener = AttackListener::bind(0).await.unwrap();
        let port = listener.local_port().unwrap();

        let probe = tokio::spawn(async move {
            let (mut stream, _) = listener.listener.accept().await.unwrap();
            read_frame(&mut stream).await.unwrap()
        });

        assert!(deliver_attack("id1", "127.0.0.1", port, "B", "A", "10.0.0.1").await);
        match probe.await.unwrap() {
            Message::Attack {
                payload,
                from_ip,
                to_player,
                ..
            } => {
                assert!(decode_payload(&payload).starts_with("ATTACK_TARGET_B_"));
                assert!(!payload.contains("ATTACK_TARGET"));
                assert_eq!(from_ip, "10.0.0.1");
                assert_eq!(to_player, "B");
            }
            other => panic!("expected ATTACK, got {:?}", other),
        }
    }
}
