// Edge-triggered detection.
//
// `DetectionState::transition` is the whole state machine: it takes the
// previous state and whether the target was seen this tick, and yields the
// new state plus the value to broadcast, if any. Materials and callbacks
// hang off that result; nothing here knows about rendering.

/// Whether the tracked target is currently inside the field of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionState {
    #[default]
    Clear,
    Detected,
}

impl DetectionState {
    pub fn is_detected(self) -> bool {
        self == DetectionState::Detected
    }

    /// Returns the next state and `Some(value)` only when the state changed.
    pub fn transition(self, seen: bool) -> (DetectionState, Option<bool>) {
        match (self, seen) {
            (DetectionState::Clear, true) => (DetectionState::Detected, Some(true)),
            (DetectionState::Detected, false) => (DetectionState::Clear, Some(false)),
            (state, _) => (state, None),
        }
    }

    /// Material slot for this state: 0 = normal, 1 = detected.
    pub fn material_index(self) -> usize {
        match self {
            DetectionState::Clear => 0,
            DetectionState::Detected => 1,
        }
    }
}

// ============================================================================
// OBSERVERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(bool) + Send + Sync>;

/// Detection-changed observers. Every subscriber receives each emitted value,
/// in subscription order.
#[derive(Default)]
pub struct DetectionSignal {
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_id: u64,
}

impl DetectionSignal {
    pub fn subscribe(&mut self, callback: impl FnMut(bool) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub fn emit(&mut self, detected: bool) {
        for (_, callback) in &mut self.subscribers {
            callback(detected);
        }
    }

    pub fn subscriber_count(&self) -> usize { self.subscribers.len() }
}

impl std::fmt::Debug for DetectionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionSignal")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn transition_table() {
        use DetectionState::*;
        assert_eq!(Clear.transition(false), (Clear, None));
        assert_eq!(Clear.transition(true), (Detected, Some(true)));
        assert_eq!(Detected.transition(true), (Detected, None));
        assert_eq!(Detected.transition(false), (Clear, Some(false)));
    }

    #[test]
    fn scripted_ticks_fire_once_per_edge() {
        let ticks = [false, false, true, true, true, false];
        let mut state = DetectionState::default();
        let mut fired = Vec::new();
        for (tick, seen) in ticks.into_iter().enumerate() {
            let (next, signal) = state.transition(seen);
            state = next;
            if let Some(value) = signal {
                fired.push((tick + 1, value));
            }
        }
        assert_eq!(fired, vec![(3, true), (6, false)]);
        assert_eq!(state, DetectionState::Clear);
    }

    #[test]
    fn fan_out_and_unsubscribe() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut signal = DetectionSignal::default();

        let a = {
            let log = log.clone();
            signal.subscribe(move |v| log.lock().unwrap().push(("a", v)))
        };
        let _b = {
            let log = log.clone();
            signal.subscribe(move |v| log.lock().unwrap().push(("b", v)))
        };
        assert_eq!(signal.subscriber_count(), 2);

        signal.emit(true);
        assert!(signal.unsubscribe(a));
        assert!(!signal.unsubscribe(a));
        signal.emit(false);

        assert_eq!(*log.lock().unwrap(), vec![("a", true), ("b", true), ("b", false)]);
    }

    #[test]
    fn material_follows_state() {
        assert_eq!(DetectionState::Clear.material_index(), 0);
        assert_eq!(DetectionState::Detected.material_index(), 1);
    }
}
