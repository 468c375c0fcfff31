//! Backend health state machine.
//!
//! # States
//! - Unknown: never probed, still receives traffic
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from selection
//!
//! # State Transitions
//! ```text
//! Unknown   → Healthy | Unhealthy: first probe result
//! Healthy   → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy:   consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - The current state is read from the registry, so a backend the
//!   dispatcher marked unhealthy needs the full run of successes to return
//! - Counters reset on state transition

use std::collections::HashMap;

use crate::load_balancer::HealthState;

#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    successes: u32,
    failures: u32,
}

/// Consecutive probe results per backend.
#[derive(Debug)]
pub struct HealthTracker {
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    streaks: HashMap<String, Streak>,
}

impl HealthTracker {
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
            streaks: HashMap::new(),
        }
    }

    /// Feed one probe result. Returns the new state when it changes.
    pub fn observe(&mut self, backend: &str, current: HealthState, probe_ok: bool) -> Option<HealthState> {
        let streak = self.streaks.entry(backend.to_string()).or_default();
        if probe_ok {
            streak.successes = streak.successes.saturating_add(1);
            streak.failures = 0;
        } else {
            streak.failures = streak.failures.saturating_add(1);
            streak.successes = 0;
        }

        let next = match current {
            HealthState::Unknown => Some(HealthState::from_healthy(probe_ok)),
            HealthState::Healthy if streak.failures >= self.unhealthy_threshold => Some(HealthState::Unhealthy),
            HealthState::Unhealthy if streak.successes >= self.healthy_threshold => Some(HealthState::Healthy),
            _ => None,
        };

        if next.is_some() {
            *streak = Streak::default();
        }
        next
    }

    /// Drop counters of backends that are no longer registered.
    pub fn retain<'a>(&mut self, registered: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = registered.into_iter().collect();
        self.streaks.retain(|name, _| keep.contains(name.as_str()));
    }

    pub fn tracked(&self) -> usize {
        self.streaks.len()
    }
}
