//! OpenCode Backend Integration
//!
//! Manages the locally-spawned opencode server process and provides
//! session CRUD, health probing, and overflow cleanup over its localhost
//! HTTP API.

pub mod binary;
pub mod client;
pub mod cleanup;
pub mod health;
pub mod server;
