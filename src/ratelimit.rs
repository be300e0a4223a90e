//! Client-side rate-limit bookkeeping. This is advisory only: the backend
//! enforces the real limits and may still answer 429.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::models::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Diagram,
    Readme,
    Explain,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Diagram => "diagram generation",
            ActionKind::Readme => "README generation",
            ActionKind::Explain => "node explanation",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    limit: u32,
    window: Duration,
}

/// Sliding-window counters per action kind, sized from the user's tier.
#[derive(Debug, Clone)]
pub struct RateLimitTracker {
    budgets: HashMap<ActionKind, Budget>,
    events: HashMap<ActionKind, VecDeque<DateTime<Utc>>>,
}

impl RateLimitTracker {
    pub fn new(tier: Tier) -> Self {
        let limits = tier.limits();
        let mut budgets = HashMap::new();
        budgets.insert(
            ActionKind::Diagram,
            Budget {
                limit: limits.diagrams_per_month,
                window: Duration::days(30),
            },
        );
        budgets.insert(
            ActionKind::Readme,
            Budget {
                limit: limits.readmes_per_month,
                window: Duration::days(30),
            },
        );
        budgets.insert(
            ActionKind::Explain,
            Budget {
                limit: limits.explains_per_day,
                window: Duration::days(1),
            },
        );
        Self {
            budgets,
            events: HashMap::new(),
        }
    }

    /// Switch tiers without losing the recorded history.
    pub fn set_tier(&mut self, tier: Tier) {
        let events = std::mem::take(&mut self.events);
        *self = Self::new(tier);
        self.events = events;
    }

    fn prune(&mut self, kind: ActionKind, now: DateTime<Utc>) {
        let Some(budget) = self.budgets.get(&kind).copied() else {
            return;
        };
        let cutoff = now - budget.window;
        if let Some(queue) = self.events.get_mut(&kind) {
            while queue.front().is_some_and(|t| *t <= cutoff) {
                queue.pop_front();
            }
        }
    }

    pub fn record(&mut self, kind: ActionKind, now: DateTime<Utc>) {
        self.prune(kind, now);
        self.events.entry(kind).or_default().push_back(now);
    }

    pub fn remaining(&mut self, kind: ActionKind, now: DateTime<Utc>) -> u32 {
        self.prune(kind, now);
        let limit = self.budgets.get(&kind).map(|b| b.limit).unwrap_or(0);
        let used = self.events.get(&kind).map(|q| q.len() as u32).unwrap_or(0);
        limit.saturating_sub(used)
    }

    /// Time until the next action of this kind is allowed; zero when the
    /// window still has room.
    pub fn cooldown(&mut self, kind: ActionKind, now: DateTime<Utc>) -> Duration {
        self.prune(kind, now);
        if self.remaining(kind, now) > 0 {
            return Duration::zero();
        }
        let Some(budget) = self.budgets.get(&kind).copied() else {
            return Duration::zero();
        };
        match self.events.get(&kind).and_then(|q| q.front()) {
            Some(oldest) => (*oldest + budget.window) - now,
            None => Duration::zero(),
        }
    }

    /// Record the action if the budget allows it, otherwise return the
    /// cooldown the caller should surface.
    pub fn try_acquire(&mut self, kind: ActionKind, now: DateTime<Utc>) -> Result<(), Duration> {
        let wait = self.cooldown(kind, now);
        if wait > Duration::zero() {
            return Err(wait);
        }
        self.record(kind, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn remaining_counts_down() {
        let mut tracker = RateLimitTracker::new(Tier::Free);
        let now = t0();
        assert_eq!(tracker.remaining(ActionKind::Diagram, now), 10);
        tracker.record(ActionKind::Diagram, now);
        tracker.record(ActionKind::Diagram, now);
        assert_eq!(tracker.remaining(ActionKind::Diagram, now), 8);
        // Readme budget is independent.
        assert_eq!(tracker.remaining(ActionKind::Readme, now), 5);
    }

    #[test]
    fn cooldown_is_zero_under_limit() {
        let mut tracker = RateLimitTracker::new(Tier::Free);
        assert_eq!(tracker.cooldown(ActionKind::Readme, t0()), Duration::zero());
    }

    #[test]
    fn cooldown_counts_from_oldest_event() {
        let mut tracker = RateLimitTracker::new(Tier::Free);
        let now = t0();
        for i in 0..5 {
            tracker.record(ActionKind::Readme, now + Duration::minutes(i));
        }
        assert_eq!(tracker.remaining(ActionKind::Readme, now + Duration::minutes(5)), 0);
        // Oldest event expires 30 days after t0.
        let wait = tracker.cooldown(ActionKind::Readme, now + Duration::minutes(5));
        assert_eq!(wait, Duration::days(30) - Duration::minutes(5));
    }

    #[test]
    fn window_prunes_old_events() {
        let mut tracker = RateLimitTracker::new(Tier::Free);
        let now = t0();
        for _ in 0..10 {
            tracker.record(ActionKind::Diagram, now);
        }
        assert_eq!(tracker.remaining(ActionKind::Diagram, now), 0);
        let later = now + Duration::days(30) + Duration::seconds(1);
        assert_eq!(tracker.remaining(ActionKind::Diagram, later), 10);
        assert_eq!(tracker.cooldown(ActionKind::Diagram, later), Duration::zero());
    }

    #[test]
    fn try_acquire_records_until_exhausted() {
        let mut tracker = RateLimitTracker::new(Tier::Free);
        let now = t0();
        for _ in 0..5 {
            assert!(tracker.try_acquire(ActionKind::Readme, now).is_ok());
        }
        let wait = tracker.try_acquire(ActionKind::Readme, now).unwrap_err();
        assert_eq!(wait, Duration::days(30));
        // A denied acquire must not consume budget.
        assert_eq!(tracker.remaining(ActionKind::Readme, now), 0);
    }

    #[test]
    fn set_tier_keeps_history() {
        let mut tracker = RateLimitTracker::new(Tier::Free);
        let now = t0();
        for _ in 0..10 {
            tracker.record(ActionKind::Diagram, now);
        }
        assert_eq!(tracker.remaining(ActionKind::Diagram, now), 0);
        tracker.set_tier(Tier::Pro);
        assert_eq!(tracker.remaining(ActionKind::Diagram, now), 190);
    }
}
