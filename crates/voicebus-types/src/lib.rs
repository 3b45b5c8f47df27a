//! Shared domain types for VoiceBus.
//!
//! This crate contains the types used across the workspace: the bus message
//! envelope and priorities, the voice request/response protocol payloads,
//! configuration, and error enums.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod bus;
pub mod config;
pub mod error;
pub mod voice;
