//! # Arena Simulation Server
//!
//! Authoritative real-time simulation for a top-down multiplayer arena. The
//! server owns all entity state, resolves movement and collisions every
//! tick, and streams incremental state to connected viewers over the fixed
//! binary protocol defined in the `shared` crate.
//!
//! ## Architecture
//!
//! The whole simulation runs on a single task. Connection tasks only decode
//! websocket frames and forward them over a channel; the main loop in
//! [`network::Server::run`] interleaves those session events with the
//! fixed-period tick, so no work inside a tick ever suspends and no locks
//! are needed.
//!
//! Each tick, [`game::Simulation::tick`]:
//! 1. integrates movement intent into velocity and position,
//! 2. rebuilds the [`quadtree`] spatial index from active, alive bodies,
//! 3. resolves pairwise collisions over the index,
//! 4. advances per-entity state (serialization, item use, controller
//!    hooks) and flushes despawns as one batched remove packet,
//! 5. diffs each player's visible set against their seen set and emits
//!    meet/update packets.
//!
//! Inbound player messages mutate entity and controller state immediately
//! on receipt, outside the tick boundary; each connection only ever mutates
//! its own entity.

pub mod controller;
pub mod entity;
pub mod game;
pub mod items;
pub mod network;
pub mod physics;
pub mod quadtree;
