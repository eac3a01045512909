//! Signal Relay Service Library
//!
//! A WebRTC signaling relay. Clients connect over WebSocket, join named
//! rooms, and exchange SDP offers/answers and ICE candidates with other
//! members. Payloads are opaque: the relay routes them by type and target
//! and never looks inside.
//!
//! Instances scale horizontally over a shared Redis pub/sub bus. A message
//! whose target is not hosted locally is published as a relay envelope;
//! every instance receives it and the one hosting the target delivers it.
//!
//! # Architecture
//!
//! ```text
//! WebSocket ─▶ session (inbound task) ─▶ RoomManager ─┬─▶ target mailbox ─▶ session (outbound task) ─▶ WebSocket
//!                                            │         └─▶ RelayPublisher ─▶ bus
//!                                        RoomRegistry
//! bus ─▶ ClusterBridge ─▶ RoomManager::find_client ─▶ target mailbox
//! ```
//!
//! # Key Design Decisions
//!
//! - **Bounded mailboxes**: writers never wait; overflow drops the newest message
//! - **One room per client**: joining another room leaves the current one
//! - **Broadcast + filter**: every instance sees every envelope and keeps only
//!   the ones for clients it hosts
//! - **Standalone fallback**: without a reachable bus, non-local targets are dropped
//!
//! # Modules
//!
//! - [`registry`] - Rooms, clients and the concurrent room table
//! - [`manager`] - Join/leave and the routing decision
//! - [`session`] - Per-connection inbound/outbound tasks
//! - [`cluster`] - Bus receive side
//! - [`bus`] - Bus publish side and the Redis implementation
//! - [`protocol`] - Client messages and relay envelopes

pub mod bus;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod mailbox;
pub mod manager;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod session;
