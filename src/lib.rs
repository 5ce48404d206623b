//! beegramd - the BeeGramm realtime messaging backend.
//!
//! A tokio-based event server: clients connect over TCP, authenticate with
//! a session token, and exchange newline-delimited JSON events. Messages
//! run through an ordered guard chain and a delivery pipeline before they
//! are persisted and fanned out to chat rooms.

pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gateway;
pub mod moderation;
pub mod pipeline;
pub mod rooms;
pub mod security;
pub mod telemetry;

pub use config::Config;
pub use db::Database;
pub use error::{EventError, EventResult};
pub use gateway::Gateway;
pub use moderation::{AuditSink, ModerationEngine, ResolutionActions};
pub use pipeline::Pipeline;
pub use rooms::{RoomId, RoomRegistry};
pub use security::{IpAbuseTracker, RateLimiter};
