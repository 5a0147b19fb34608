//! # Game Coordinator Library
//!
//! This library implements the central coordinator for the packet-defense
//! training game. The server is the single authority for the match: it
//! arbitrates rounds, approves and tracks peer-to-peer attacks, floods the
//! channel with dummy/noise/decoy traffic, and scores every player's
//! defense at round boundaries.
//!
//! ## Module Organization
//!
//! ### Player Registry (`player_registry`)
//! Authoritative table of connected players: network identity, session
//! index (which fixes the P2P listen port), score, HP, and the per-round
//! record of delivered attacks.
//!
//! ### Session Layer (`network`)
//! Accepts TCP connections, runs the CONNECT handshake, routes inbound
//! frames to the dispatcher, and owns per-player outbound queues so no
//! producer ever blocks on a slow peer.
//!
//! ### Attack Coordinator (`attack`)
//! The two-phase attack protocol: approval with a fixed denial checklist,
//! pending records with cancellable 5-second timers, and commit
//! bookkeeping consumed by the scorer.
//!
//! ### Traffic Generators (`traffic`)
//! Three independent periodic emitters (broadcast dummies, player-to-player
//! noise, and decoy attacks) that make real attacks hard to spot on the
//! wire.
//!
//! ### Round Engine (`game`)
//! The match state machine: five rounds of
//! preparation → playing → defense → scoring, difficulty loading, generator
//! toggling, and final rankings.
//!
//! ### Scorer (`scoring`)
//! Pure round scoring from the committed attack list and the accumulated
//! defense submissions.

pub mod attack;
pub mod game;
pub mod network;
pub mod player_registry;
pub mod scoring;
pub mod traffic;
