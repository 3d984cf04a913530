//! Admission control for page contexts.
//!
//! Every open connection is a context. It is attached when accepted and
//! detached when the connection closes. Pages ask [`ContextRegistry::should_inject`]
//! before injecting the widget, which bounds how many widget instances
//! compete for notifications and the receiver window.

use std::collections::HashMap;

use gbridge_protocol::ContextKind;

#[derive(Debug, Clone)]
pub struct ContextRegistry {
    cap: usize,
    /// Kind is known once the context registers.
    contexts: HashMap<u64, Option<ContextKind>>,
}

impl ContextRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            contexts: HashMap::new(),
        }
    }

    pub fn attach(&mut self, id: u64) {
        self.contexts.entry(id).or_insert(None);
    }

    /// Records what kind of context `id` is. Attaches it if needed.
    pub fn register(&mut self, id: u64, kind: ContextKind) {
        self.contexts.insert(id, Some(kind));
    }

    /// Removes `id`, returning the kind it registered as.
    pub fn detach(&mut self, id: u64) -> Option<ContextKind> {
        self.contexts.remove(&id).flatten()
    }

    pub fn kind(&self, id: u64) -> Option<ContextKind> {
        self.contexts.get(&id).copied().flatten()
    }

    /// Attached contexts that may host the widget. The receiver window
    /// does not count.
    pub fn len(&self) -> usize {
        self.contexts
            .values()
            .filter(|kind| **kind != Some(ContextKind::Popup))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False once more than the cap are attached.
    pub fn should_inject(&self) -> bool {
        self.len() <= self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_cap() {
        let mut registry = ContextRegistry::new(3);
        for id in 1..=3 {
            registry.attach(id);
            assert!(registry.should_inject(), "context {id} should be admitted");
        }
        registry.attach(4);
        assert!(!registry.should_inject());

        registry.detach(2);
        assert!(registry.should_inject());
    }

    #[test]
    fn attach_is_idempotent() {
        let mut registry = ContextRegistry::new(3);
        registry.attach(1);
        registry.attach(1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn receiver_window_is_not_counted() {
        let mut registry = ContextRegistry::new(1);
        registry.attach(1);
        registry.register(2, ContextKind::Popup);
        assert_eq!(registry.len(), 1);
        assert!(registry.should_inject());
        assert_eq!(registry.kind(2), Some(ContextKind::Popup));
    }

    #[test]
    fn detach_reports_kind() {
        let mut registry = ContextRegistry::new(3);
        registry.attach(1);
        registry.register(2, ContextKind::Popup);
        assert_eq!(registry.detach(1), None);
        assert_eq!(registry.detach(2), Some(ContextKind::Popup));
        assert_eq!(registry.detach(3), None);
        assert!(registry.is_empty());
    }
}
