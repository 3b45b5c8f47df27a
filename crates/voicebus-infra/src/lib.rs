//! Infrastructure layer for VoiceBus.
//!
//! Concrete audio processors for the voice protocol defined in
//! `voicebus-core` (local file stub, remote inference endpoint) and
//! configuration file loading.

pub mod config;
pub mod processor;
