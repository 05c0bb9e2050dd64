//! GridPulse Bridge
//!
//! Ingests energy telemetry from an MQTT broker, persists every record to
//! an embedded primary store and an optional document secondary store, and
//! fans records out live over WebSocket. A small HTTP API serves recent
//! reads, range queries, window statistics, and exports.
//!
//! - [`broker`] - MQTT session, subscriptions, reconnect loop
//! - [`pipeline`] - Normalization and distribution of inbound records
//! - [`hub`] - Live fan-out to push listeners
//! - [`api`] - HTTP query API
//! - [`push`] - WebSocket push channel
//! - [`state`] - Shared runtime state

pub mod api;
pub mod broker;
pub mod hub;
pub mod pipeline;
pub mod push;
pub mod state;
