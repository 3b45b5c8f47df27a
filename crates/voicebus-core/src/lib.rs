//! Message bus and voice protocol for VoiceBus.
//!
//! Depends only on `voicebus-types`. Concrete audio processors and config
//! loading live in `voicebus-infra`.

pub mod bus;
pub mod voice;
