//! # Integration Test Suite
//!
//! End-to-end tests that boot a real coordinator on an ephemeral port and
//! speak the wire protocol to it through plain TCP sockets, exactly as a
//! player client would: length-prefixed JSON frames, CONNECT handshake
//! first. They cover the connection lifecycle and the server contracts that
//! do not depend on waiting out real round timers; the timer-driven round
//! flow is exercised in the server crate's paused-clock unit tests.

use server::network::GameServer;
use shared::messages::Message;
use shared::protocol::{read_frame, write_frame, FrameError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const READ_DEADLINE: Duration = Duration::from_secs(5);

async fn start_server() -> GameServer {
    GameServer::bind("127.0.0.1", 0)
        .await
        .expect("failed to bind test server")
}

async fn connect_player(server: &GameServer, player_id: &str) -> TcpStream {
    let mut stream = TcpStream::connect(server.local_addr())
        .await
        .expect("failed to connect");
    write_frame(
        &mut stream,
        &Message::Connect {
            player_id: player_id.to_string(),
            player_ip: String::new(),
        },
    )
    .await
    .expect("failed to send CONNECT");
    stream
}

/// Reads frames until one satisfies the predicate, skipping broadcast
/// chatter (player lists, dummy traffic) in between.
async fn read_until<F>(stream: &mut TcpStream, mut pred: F) -> Message
where
    F: FnMut(&Message) -> bool,
{
    loop {
        let msg = timeout(READ_DEADLINE, read_frame(stream))
            .await
            .expect("timed out waiting for frame")
            .expect("read failed");
        if pred(&msg) {
            return msg;
        }
    }
}

#[tokio::test]
async fn test_welcome_flow() {
    let server = start_server().await;
    let mut a = connect_player(&server, "A").await;

    // WELCOME is the very first frame
    let welcome = timeout(READ_DEADLINE, read_frame(&mut a))
        .await
        .unwrap()
        .unwrap();
    match welcome {
        Message::Info {
            info_type,
            player_id,
            player_ip,
            player_index,
            ..
        } => {
            assert_eq!(info_type, "WELCOME");
            assert_eq!(player_id.as_deref(), Some("A"));
            assert_eq!(player_ip.as_deref(), Some("127.0.0.1"));
            assert_eq!(player_index, Some(0));
        }
        other => panic!("expected WELCOME, got {:?}", other),
    }

    // Followed by the roster broadcast
    let roster = read_until(&mut a, |m| matches!(m, Message::PlayerList { .. })).await;
    match roster {
        Message::PlayerList { players } => {
            assert_eq!(players.len(), 1);
            assert_eq!(players[0].player_id, "A");
            assert_eq!(players[0].hp, shared::INITIAL_HP);
        }
        other => panic!("expected PLAYER_LIST, got {:?}", other),
    }

    // A second player gets the next index, and A sees the refreshed roster
    let mut b = connect_player(&server, "B").await;
    let welcome_b = timeout(READ_DEADLINE, read_frame(&mut b))
        .await
        .unwrap()
        .unwrap();
    match welcome_b {
        Message::Info { player_index, .. } => assert_eq!(player_index, Some(1)),
        other => panic!("expected WELCOME, got {:?}", other),
    }

    let refreshed = read_until(&mut a, |m| {
        matches!(m, Message::PlayerList { players } if players.len() == 2)
    })
    .await;
    match refreshed {
        Message::PlayerList { players } => {
            assert_eq!(players[0].player_id, "A");
            assert_eq!(players[1].player_id, "B");
        }
        other => panic!("expected PLAYER_LIST, got {:?}", other),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_id_refused() {
    let server = start_server().await;
    let mut first = connect_player(&server, "A").await;
    read_until(&mut first, |m| matches!(m, Message::PlayerList { .. })).await;

    let mut second = connect_player(&server, "A").await;
    let refusal = timeout(READ_DEADLINE, read_frame(&mut second))
        .await
        .unwrap()
        .unwrap();
    match refusal {
        Message::Info {
            info_type, message, ..
        } => {
            assert_eq!(info_type, "ERROR");
            assert!(message.contains("already connected"));
        }
        other => panic!("expected ERROR, got {:?}", other),
    }

    // The refused socket is closed afterwards
    match timeout(READ_DEADLINE, read_frame(&mut second)).await.unwrap() {
        Err(FrameError::PeerGone) => {}
        other => panic!("expected closed connection, got {:?}", other),
    }

    // The original session is untouched
    write_frame(
        &mut first,
        &Message::AttackRequest {
            attacker_id: "A".to_string(),
            target_id: "A".to_string(),
        },
    )
    .await
    .unwrap();
    read_until(&mut first, |m| {
        matches!(m, Message::Info { info_type, .. } if info_type == "ATTACK_DENIED")
    })
    .await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_attack_denied_outside_play_phase() {
    let server = start_server().await;
    let mut a = connect_player(&server, "A").await;
    let mut b = connect_player(&server, "B").await;
    read_until(&mut b, |m| matches!(m, Message::PlayerList { .. })).await;

    // Self-attack is refused ahead of the phase check
    write_frame(
        &mut a,
        &Message::AttackRequest {
            attacker_id: "A".to_string(),
            target_id: "A".to_string(),
        },
    )
    .await
    .unwrap();
    let denial = read_until(&mut a, |m| {
        matches!(m, Message::Info { info_type, .. } if info_type == "ATTACK_DENIED")
    })
    .await;
    match denial {
        Message::Info { message, .. } => assert_eq!(message, "self-attack forbidden"),
        other => panic!("expected denial, got {:?}", other),
    }

    // A real target outside PLAYING is refused for the phase
    write_frame(
        &mut a,
        &Message::AttackRequest {
            attacker_id: "A".to_string(),
            target_id: "B".to_string(),
        },
    )
    .await
    .unwrap();
    let denial = read_until(&mut a, |m| {
        matches!(m, Message::Info { info_type, .. } if info_type == "ATTACK_DENIED")
    })
    .await;
    match denial {
        Message::Info { message, .. } => assert_eq!(message, "not in play phase"),
        other => panic!("expected denial, got {:?}", other),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_match_start_requires_two_players() {
    let server = start_server().await;
    let mut a = connect_player(&server, "A").await;
    read_until(&mut a, |m| matches!(m, Message::PlayerList { .. })).await;

    let refused = server.ctx().game.start_match().await;
    assert!(refused.unwrap_err().contains("need at least 2 players"));

    let mut b = connect_player(&server, "B").await;
    read_until(&mut b, |m| matches!(m, Message::PlayerList { .. })).await;

    server.ctx().game.start_match().await.unwrap();
    read_until(&mut a, |m| matches!(m, Message::GameStart { .. })).await;
    read_until(&mut b, |m| matches!(m, Message::GameStart { .. })).await;

    // Stopping mid-match returns to WAITING and emits a synthetic GAME_END
    server.ctx().game.stop_match().await;
    let end = read_until(&mut a, |m| matches!(m, Message::GameEnd { .. })).await;
    match end {
        Message::GameEnd { winner, rankings, .. } => {
            assert!(winner.is_none());
            assert!(rankings.is_empty());
        }
        other => panic!("expected GAME_END, got {:?}", other),
    }
    let report = server.ctx().game.status_report().await;
    assert_eq!(report.match_state, "WAITING");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_message_is_ignored_and_session_survives() {
    let server = start_server().await;
    let mut a = connect_player(&server, "A").await;
    read_until(&mut a, |m| matches!(m, Message::PlayerList { .. })).await;

    // Hand-rolled frame with a type outside the vocabulary
    let body = br#"{"type":"PING","timestamp":0.0,"nonce":7}"#;
    let mut raw = (body.len() as u32).to_be_bytes().to_vec();
    raw.extend_from_slice(body);
    tokio::io::AsyncWriteExt::write_all(&mut a, &raw).await.unwrap();

    // The session still answers a real request afterwards
    write_frame(
        &mut a,
        &Message::AttackRequest {
            attacker_id: "A".to_string(),
            target_id: "A".to_string(),
        },
    )
    .await
    .unwrap();
    read_until(&mut a, |m| {
        matches!(m, Message::Info { info_type, .. } if info_type == "ATTACK_DENIED")
    })
    .await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_updates_roster() {
    let server = start_server().await;
    let mut a = connect_player(&server, "A").await;
    let b = connect_player(&server, "B").await;
    read_until(&mut a, |m| {
        matches!(m, Message::PlayerList { players } if players.len() == 2)
    })
    .await;

    drop(b);
    read_until(&mut a, |m| {
        matches!(m, Message::PlayerList { players } if players.len() == 1)
    })
    .await;

    // The freed id may join again
    let mut b2 = connect_player(&server, "B").await;
    let welcome = timeout(READ_DEADLINE, read_frame(&mut b2))
        .await
        .unwrap()
        .unwrap();
    match welcome {
        Message::Info {
            info_type,
            player_index,
            ..
        } => {
            assert_eq!(info_type, "WELCOME");
            // Indices are never reused within a server lifetime
            assert_eq!(player_index, Some(2));
        }
        other => panic!("expected WELCOME, got {:?}", other),
    }

    server.shutdown().await;
}
