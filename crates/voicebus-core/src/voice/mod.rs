//! Voice request/response protocol.

pub mod box_processor;
pub mod chain;
pub mod correlator;
pub mod processor;
pub mod registry;
pub mod service;

pub use box_processor::{processor_fn, BoxAudioProcessor};
pub use chain::ProcessorChain;
pub use processor::AudioProcessor;
pub use registry::ProcessorRegistry;
pub use service::VoiceProcessor;
