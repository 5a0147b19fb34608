//! # Player Client Library
//!
//! Reference client for the packet-defense training game. It speaks the
//! server contracts end to end: the CONNECT/WELCOME handshake, the P2P
//! attack listener on `BASE_PORT + player_index`, approved-attack delivery
//! with both two-phase confirmations, and defense submission. Presentation
//! is a thin line-oriented console; richer UIs sit on top of
//! [`network::GameClient`].

pub mod network;
pub mod p2p;
