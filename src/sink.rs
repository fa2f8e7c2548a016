//! Value sinks and automation hooks
//!
//! A [`ValueSink`] receives the decoded values of one field. The
//! [`AutomationHooks`] lists fire on bus stalls and at the end of every
//! readout pass.

use tracing::{info, warn};

use crate::registry::FieldId;

/// Receiver of a field's decoded values.
///
/// Only `on_value` and `on_unreachable` are required.
pub trait ValueSink {
    /// New engineering value, at most once per successful poll
    fn on_value(&mut self, field_id: FieldId, value: f64);

    /// Retries exhausted for this cycle
    fn on_unreachable(&mut self, field_id: FieldId);

    /// Controller reports the value as not set
    fn on_null(&mut self, _field_id: FieldId) {}

    /// New text value
    fn on_text(&mut self, _field_id: FieldId, _text: &str) {}

    /// Switch state, when the value matches the on or off value
    fn on_switch(&mut self, _field_id: FieldId, _on: bool) {}

    /// Controller refused a write
    fn on_write_rejected(&mut self, _field_id: FieldId, _value: f64) {}
}

/// Sink that reports every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ValueSink for TracingSink {
    fn on_value(&mut self, field_id: FieldId, value: f64) {
        info!("Field 0x{:08X} = {}", field_id, value);
    }

    fn on_unreachable(&mut self, field_id: FieldId) {
        warn!("Field 0x{:08X} unreachable", field_id);
    }

    fn on_null(&mut self, field_id: FieldId) {
        info!("Field 0x{:08X} = ---", field_id);
    }

    fn on_text(&mut self, field_id: FieldId, text: &str) {
        info!("Field 0x{:08X} = {:?}", field_id, text);
    }
}

type BusTimeoutHook = Box<dyn FnMut(FieldId) + Send>;
type CycleCompleteHook = Box<dyn FnMut() + Send>;

/// Observer lists for bus events.
///
/// Callbacks run in registration order.
#[derive(Default)]
pub struct AutomationHooks {
    bus_timeout: Vec<BusTimeoutHook>,
    cycle_complete: Vec<CycleCompleteHook>,
}

impl AutomationHooks {
    /// Create empty hook lists
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the field id when a field becomes unreachable
    pub fn on_bus_timeout<F>(&mut self, hook: F)
    where
        F: FnMut(FieldId) + Send + 'static,
    {
        self.bus_timeout.push(Box::new(hook));
    }

    /// Called once when a readout pass has finished
    pub fn on_cycle_complete<F>(&mut self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.cycle_complete.push(Box::new(hook));
    }

    pub(crate) fn fire_bus_timeout(&mut self, field_id: FieldId) {
        for hook in self.bus_timeout.iter_mut() {
            hook(field_id);
        }
    }

    pub(crate) fn fire_cycle_complete(&mut self) {
        for hook in self.cycle_complete.iter_mut() {
            hook();
        }
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.bus_timeout.len() + self.cycle_complete.len()
    }

    /// Whether no hook is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AutomationHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationHooks")
            .field("bus_timeout", &self.bus_timeout.len())
            .field("cycle_complete", &self.cycle_complete.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = AutomationHooks::new();

        let first = calls.clone();
        hooks.on_bus_timeout(move |id| first.lock().unwrap().push(("first", id)));
        let second = calls.clone();
        hooks.on_bus_timeout(move |id| second.lock().unwrap().push(("second", id)));

        hooks.fire_bus_timeout(42);
        assert_eq!(*calls.lock().unwrap(), vec![("first", 42), ("second", 42)]);
        assert_eq!(hooks.len(), 2);
    }

    #[test]
    fn test_cycle_complete_hook() {
        let count = Arc::new(Mutex::new(0));
        let mut hooks = AutomationHooks::new();
        let c = count.clone();
        hooks.on_cycle_complete(move || *c.lock().unwrap() += 1);

        hooks.fire_cycle_complete();
        hooks.fire_cycle_complete();
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
