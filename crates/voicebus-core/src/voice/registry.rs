//! Name-indexed registry of audio processors.
//!
//! Keeps registration order, which the chain uses as its fallback order.

use std::sync::Arc;

use super::box_processor::BoxAudioProcessor;

/// A registered processor paired with its name.
pub type ProcessorEntry = (String, Arc<BoxAudioProcessor>);

#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    entries: Vec<ProcessorEntry>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under the given name.
    ///
    /// If the name is taken, the processor is replaced but keeps its position.
    pub fn register(&mut self, name: impl Into<String>, processor: BoxAudioProcessor) {
        let name = name.into();
        let processor = Arc::new(processor);
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = processor,
            None => self.entries.push((name, processor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxAudioProcessor>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| Arc::clone(p))
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Cheap copy of the entries, so callers can run processors without
    /// holding the registry lock.
    pub fn snapshot(&self) -> Vec<ProcessorEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::box_processor::processor_fn;
    use voicebus_types::voice::{AudioRequest, AudioResponse};

    fn tagged(tag: &'static str) -> BoxAudioProcessor {
        processor_fn(move |req| Ok(AudioResponse::success(req.request_id).with_audio_path(tag)))
    }

    #[tokio::test]
    async fn reregistering_replaces_in_place() {
        let mut registry = ProcessorRegistry::new();
        registry.register("a", tagged("a1"));
        registry.register("b", tagged("b"));
        registry.register("a", tagged("a2"));

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);

        let a = registry.get("a").unwrap();
        let response = a.process(&AudioRequest::new("x")).await.unwrap();
        assert_eq!(response.audio_path.as_deref(), Some("a2"));
    }

    #[test]
    fn missing_name_is_none() {
        let registry = ProcessorRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.is_empty());
    }
}
