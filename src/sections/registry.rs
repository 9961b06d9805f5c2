//! Label to section mapping with dense, stable ids.

use std::collections::HashMap;

use super::watch::Watch;
use super::{SectionId, SectionKind};
use crate::error::{resource_exhausted, MonitorError, Result};

/// Owns every section record of a monitor.
///
/// Ids are handed out in registration order starting at 0 and never change.
/// Storage grows by a fixed increment when full.
#[derive(Debug)]
pub struct Registry {
    watches: Vec<Watch>,
    index: HashMap<String, SectionId>,
    increment: usize,
}

impl Registry {
    /// Creates a registry with room for `increment` sections.
    pub fn new(increment: usize) -> Self {
        let increment = increment.max(1);
        let mut watches = Vec::new();
        if let Err(err) = watches.try_reserve_exact(increment) {
            resource_exhausted("section registry", err);
        }
        Registry {
            watches,
            index: HashMap::with_capacity(increment),
            increment,
        }
    }

    /// Registers a new section and returns its id.
    ///
    /// Blank and already registered labels are rejected and leave the
    /// registry untouched.
    pub fn register(
        &mut self,
        label: &str,
        kind: SectionKind,
        exclusive: bool,
    ) -> Result<SectionId> {
        if label.is_empty() {
            return Err(MonitorError::EmptyLabel);
        }
        if self.index.contains_key(label) {
            return Err(MonitorError::DuplicateLabel(label.to_string()));
        }

        if self.watches.len() == self.watches.capacity() {
            if let Err(err) = self.watches.try_reserve_exact(self.increment) {
                resource_exhausted("section registry", err);
            }
        }

        let id = self.watches.len();
        self.watches.push(Watch::new(id, label, kind, exclusive));
        self.index.insert(label.to_string(), id);
        Ok(id)
    }

    pub fn resolve(&self, label: &str) -> Option<SectionId> {
        self.index.get(label).copied()
    }

    pub fn get(&self, id: SectionId) -> Option<&Watch> {
        self.watches.get(id)
    }

    pub fn get_mut(&mut self, id: SectionId) -> Option<&mut Watch> {
        self.watches.get_mut(id)
    }

    /// Looks a section up by label.
    pub fn find(&self, label: &str) -> Option<&Watch> {
        self.resolve(label).and_then(|id| self.get(id))
    }

    /// Sections in registration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Watch> {
        self.watches.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Watch> {
        self.watches.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Number of sections that fit before the next growth step.
    pub fn capacity(&self) -> usize {
        self.watches.capacity()
    }

    /// Resets every section, the root included.
    pub fn reset_all(&mut self) {
        for watch in &mut self.watches {
            watch.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ids_are_dense_in_registration_order() {
        let mut registry = Registry::new(4);
        for (i, label) in ["a", "b", "c"].iter().enumerate() {
            let id = registry
                .register(label, SectionKind::Computation, true)
                .unwrap();
            assert_eq!(id, i);
        }
        assert_eq!(registry.resolve("b"), Some(1));
        assert_eq!(registry.get(2).unwrap().label(), "c");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_blank_label_rejected() {
        let mut registry = Registry::new(4);
        let err = registry
            .register("", SectionKind::Computation, true)
            .unwrap_err();
        assert!(matches!(err, MonitorError::EmptyLabel));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut registry = Registry::new(4);
        registry
            .register("io", SectionKind::Communication, true)
            .unwrap();
        let err = registry
            .register("io", SectionKind::Computation, false)
            .unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateLabel(ref l) if l == "io"));
        assert_eq!(registry.len(), 1);
        // The first declaration wins.
        assert_eq!(registry.find("io").unwrap().kind(), SectionKind::Communication);
    }

    #[test]
    fn test_growth_preserves_records() {
        let mut registry = Registry::new(2);
        assert!(registry.capacity() >= 2);

        let first = registry
            .register("first", SectionKind::Computation, true)
            .unwrap();
        {
            let watch = registry.get(first).unwrap();
            watch.start(0, Duration::ZERO, None).unwrap();
            watch.stop(0, Duration::from_millis(4), 3.0, 1, None).unwrap();
        }

        for i in 0..9 {
            registry
                .register(&format!("s{i}"), SectionKind::Computation, true)
                .unwrap();
        }
        assert_eq!(registry.len(), 10);
        assert!(registry.capacity() >= 10);

        let watch = registry.get_mut(first).unwrap();
        watch.merge_threads();
        assert_eq!(watch.merged().count, 1);
        assert_eq!(watch.merged().work, 3.0);
        assert_eq!(registry.resolve("s8"), Some(9));
    }

    #[test]
    fn test_reset_all() {
        let mut registry = Registry::new(4);
        for label in ["x", "y"] {
            let id = registry
                .register(label, SectionKind::Computation, true)
                .unwrap();
            let watch = registry.get(id).unwrap();
            watch.start(1, Duration::ZERO, None).unwrap();
            watch.stop(1, Duration::from_millis(1), 0.0, 1, None).unwrap();
        }
        registry.reset_all();
        for watch in registry.iter_mut() {
            watch.merge_threads();
            assert_eq!(watch.merged().count, 0);
        }
        assert_eq!(registry.resolve("y"), Some(1));
    }
}
