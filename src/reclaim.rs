use crossbeam_epoch::{default_collector, Collector, Guard, LocalHandle};

/// Epoch-based reclamation context of a tree.
///
/// Nodes replaced by a mutation are retired into this context and freed
/// once every guard pinned before the retirement has been dropped. Guards
/// handed to a tree must be pinned through its own reclaimer.
#[derive(Debug, Clone)]
pub struct Reclaimer {
    collector: Collector,
}

impl Reclaimer {
    /// A reclaimer with its own collector, independent of every other tree.
    pub fn new() -> Self {
        Self::from_collector(Collector::new())
    }

    /// A reclaimer sharing the process-wide default collector, so that
    /// `crossbeam_epoch::pin()` produces usable guards.
    pub fn global() -> Self {
        Self::from_collector(default_collector().clone())
    }

    pub fn from_collector(collector: Collector) -> Self {
        Self { collector }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Registers the calling thread. Pinning through a kept handle is
    /// cheaper than [`Reclaimer::pin`] in loops.
    pub fn register(&self) -> LocalHandle {
        self.collector.register()
    }

    /// Pins the calling thread.
    pub fn pin(&self) -> Guard {
        self.collector.register().pin()
    }

    pub(crate) fn owns(&self, guard: &Guard) -> bool {
        guard.collector() == Some(&self.collector)
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Reclaimer;

    #[test]
    fn guard_ownership() {
        let a = Reclaimer::new();
        let b = Reclaimer::new();

        assert!(a.owns(&a.pin()));
        assert!(!a.owns(&b.pin()));
        assert!(a.clone().owns(&a.pin()));
        assert!(Reclaimer::global().owns(&crossbeam_epoch::pin()));
    }
}
