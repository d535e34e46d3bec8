// src/behavior/manager.rs
//! Named registry over behavior streams
//!
//! Creates, looks up, and destroys streams by name. The manager always owns a
//! `default` stream; destroying it (directly or via `destroy_all`) provisions
//! a fresh one so facade callers never observe a missing default.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::stream::{BehaviorStream, StreamConfig, StreamStats};
use crate::utils::Clock;

/// Name of the stream the manager always provisions.
pub const DEFAULT_STREAM: &str = "default";

/// Registry of named behavior streams.
pub struct StreamManager {
    default_config: StreamConfig,
    clock: Arc<dyn Clock>,
    page_url: Arc<RwLock<String>>,
    streams: DashMap<String, Arc<BehaviorStream>>,
}

impl StreamManager {
    /// Create a manager and provision the `default` stream.
    pub fn new(
        default_config: StreamConfig,
        clock: Arc<dyn Clock>,
        page_url: Arc<RwLock<String>>,
    ) -> Self {
        let manager = Self {
            default_config,
            clock,
            page_url,
            streams: DashMap::new(),
        };
        manager.provision(DEFAULT_STREAM, None);
        manager
    }

    fn provision(&self, name: &str, config: Option<StreamConfig>) -> Arc<BehaviorStream> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let stream = BehaviorStream::new(
            name,
            config,
            Arc::clone(&self.clock),
            Arc::clone(&self.page_url),
        );
        self.streams.insert(name.to_string(), Arc::clone(&stream));
        stream
    }

    /// Create a stream under `name`. An existing stream with that name is
    /// destroyed and replaced; there are no silent duplicates.
    pub fn create_stream(
        &self,
        name: &str,
        config: Option<StreamConfig>,
    ) -> Arc<BehaviorStream> {
        if let Some((_, old)) = self.streams.remove(name) {
            debug!(stream = name, "replacing existing stream");
            old.destroy();
        }
        self.provision(name, config)
    }

    /// Look up a stream; `None` name means the default stream.
    pub fn get_stream(&self, name: Option<&str>) -> Option<Arc<BehaviorStream>> {
        self.streams
            .get(name.unwrap_or(DEFAULT_STREAM))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_create(&self, name: &str, config: Option<StreamConfig>) -> Arc<BehaviorStream> {
        match self.get_stream(Some(name)) {
            Some(stream) => stream,
            None => self.provision(name, config),
        }
    }

    /// Destroy the named stream. The default stream is re-provisioned
    /// immediately so it exists for the facade's whole lifetime.
    pub fn destroy(&self, name: &str) -> bool {
        let removed = match self.streams.remove(name) {
            Some((_, stream)) => {
                stream.destroy();
                true
            }
            None => false,
        };
        if removed && name == DEFAULT_STREAM {
            self.provision(DEFAULT_STREAM, None);
        }
        removed
    }

    /// Destroy every stream, then re-provision the default.
    pub fn destroy_all(&self) {
        for entry in self.streams.iter() {
            entry.value().destroy();
        }
        self.streams.clear();
        self.provision(DEFAULT_STREAM, None);
    }

    /// Clear the contents of every stream without destroying the instances.
    pub fn clear_all(&self) {
        for entry in self.streams.iter() {
            entry.value().clear();
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.streams.iter().map(|e| e.key().clone()).collect()
    }

    pub fn all_stats(&self) -> HashMap<String, StreamStats> {
        self.streams
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{EventContext, NewBehaviorEvent};
    use crate::utils::MockClock;

    fn make_manager() -> StreamManager {
        StreamManager::new(
            StreamConfig::default(),
            Arc::new(MockClock::new(0)),
            Arc::new(RwLock::new("https://app.example.com/".to_string())),
        )
    }

    fn event() -> NewBehaviorEvent {
        NewBehaviorEvent::new("step", EventContext::custom())
    }

    #[test]
    fn test_default_stream_exists() {
        let manager = make_manager();
        assert!(manager.contains(DEFAULT_STREAM));
        assert!(manager.get_stream(None).is_some());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_create_replaces_existing() {
        let manager = make_manager();
        let first = manager.create_stream("clicks", None);
        first.add_event(event());

        let second = manager.create_stream("clicks", None);
        assert!(first.is_destroyed());
        assert!(!second.is_destroyed());
        assert_eq!(second.len(), 0);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_get_or_create() {
        let manager = make_manager();
        let a = manager.get_or_create("routes", None);
        let b = manager.get_or_create("routes", None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_destroy_default_reprovisions() {
        let manager = make_manager();
        let old = manager.get_stream(None).unwrap();
        assert!(manager.destroy(DEFAULT_STREAM));
        assert!(old.is_destroyed());

        let fresh = manager.get_stream(None).unwrap();
        assert!(!fresh.is_destroyed());
        assert!(!Arc::ptr_eq(&old, &fresh));
    }

    #[test]
    fn test_destroy_all_keeps_default_alive() {
        let manager = make_manager();
        manager.create_stream("a", None);
        manager.create_stream("b", None);
        manager.destroy_all();

        assert_eq!(manager.len(), 1);
        assert!(manager.contains(DEFAULT_STREAM));
    }

    #[test]
    fn test_clear_all_preserves_instances() {
        let manager = make_manager();
        let clicks = manager.create_stream("clicks", None);
        clicks.add_event(event());
        manager.get_stream(None).unwrap().add_event(event());

        manager.clear_all();

        assert!(manager.contains("clicks"));
        assert!(!clicks.is_destroyed());
        assert_eq!(clicks.len(), 0);
        assert_eq!(manager.get_stream(None).unwrap().len(), 0);
    }

    #[test]
    fn test_all_stats() {
        let manager = make_manager();
        manager.create_stream("clicks", None);
        manager.get_stream(Some("clicks")).unwrap().add_event(event());

        let stats = manager.all_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["clicks"].current_events, 1);
        assert_eq!(stats[DEFAULT_STREAM].current_events, 0);
    }

    #[test]
    fn test_destroy_unknown_returns_false() {
        let manager = make_manager();
        assert!(!manager.destroy("missing"));
    }
}
