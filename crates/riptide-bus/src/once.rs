use std::collections::HashMap;
use std::fmt;

use tracing::trace;

pub type OnceCallback<C> = Box<dyn FnOnce(&mut C)>;

struct Gate<C> {
    fired: bool,
    pending: Vec<OnceCallback<C>>,
}

impl<C> Default for Gate<C> {
    fn default() -> Self {
        Self {
            fired: false,
            pending: Vec::new(),
        }
    }
}

/// Latch for startup signals: every callback runs exactly once per name.
///
/// Firing is buffered. A subscriber that arrives after the signal has already
/// fired is handed straight back to the caller to run, so late subscribers are
/// never lost. The gate does not hold the context; callers run the returned
/// callbacks themselves.
pub struct OnceGate<C> {
    gates: HashMap<String, Gate<C>>,
}

impl<C> Default for OnceGate<C> {
    fn default() -> Self {
        Self {
            gates: HashMap::new(),
        }
    }
}

impl<C> fmt::Debug for OnceGate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, gate) in &self.gates {
            map.entry(name, &(gate.fired, gate.pending.len()));
        }
        map.finish()
    }
}

impl<C> OnceGate<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `callback` for the first emission of `name`. Returns the
    /// callback when `name` has already fired; the caller must run it now.
    #[must_use = "a returned callback belongs to a signal that already fired and must be run"]
    pub fn on(&mut self, name: &str, callback: OnceCallback<C>) -> Option<OnceCallback<C>> {
        let gate = self.gates.entry(name.to_string()).or_default();
        if gate.fired {
            trace!(target: "riptide::bus", signal = name, "late subscriber released immediately");
            return Some(callback);
        }
        gate.pending.push(callback);
        None
    }

    /// Marks `name` as fired and returns the queued callbacks in subscription
    /// order. Later emissions return nothing.
    pub fn emit(&mut self, name: &str) -> Vec<OnceCallback<C>> {
        let gate = self.gates.entry(name.to_string()).or_default();
        if gate.fired {
            trace!(target: "riptide::bus", signal = name, "signal already fired");
            return Vec::new();
        }
        gate.fired = true;
        std::mem::take(&mut gate.pending)
    }

    pub fn has_fired(&self, name: &str) -> bool {
        self.gates.get(name).is_some_and(|gate| gate.fired)
    }

    pub fn pending(&self, name: &str) -> usize {
        self.gates.get(name).map_or(0, |gate| gate.pending.len())
    }
}
