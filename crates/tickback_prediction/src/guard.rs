//! Oversimulation guard.
//!
//! Every replayed step adds one unit of debt. Every predicted tick repays
//! `step_budget_per_tick` units. A resimulation is allowed only when the debt
//! is fully repaid, so over any long window the replayed steps per predicted
//! tick converge to the budget.
//!
//! ```text
//!   budget 1, 3-step replays:
//!   tick   1  2  3  4  5  6  7
//!   debt   3  2  1  3  2  1  3      (resim at 1, 4, 7; others refused)
//! ```

use crate::config::OversimulationConfig;

/// Step-debt replay budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OversimulationGuard {
    enabled: bool,
    budget_per_tick: u32,
    debt: u64,
    granted: u64,
    refused: u64,
}

impl OversimulationGuard {
    /// Creates a guard with no outstanding debt.
    #[must_use]
    pub fn new(config: &OversimulationConfig) -> Self {
        Self {
            enabled: config.enabled,
            budget_per_tick: config.step_budget_per_tick,
            debt: 0,
            granted: 0,
            refused: 0,
        }
    }

    /// Repays one tick of budget.
    pub fn on_tick(&mut self) {
        self.debt = self.debt.saturating_sub(u64::from(self.budget_per_tick));
    }

    /// Asks to replay `steps` ticks. Records the debt when granted.
    pub fn request(&mut self, steps: u32) -> bool {
        if !self.allows() {
            return false;
        }
        self.commit(steps);
        true
    }

    /// True if a replay may start now. A refusal is counted.
    ///
    /// Pair with [`OversimulationGuard::commit`] once the replay is known
    /// to run, so a replay that cannot rewind is never charged.
    pub fn allows(&mut self) -> bool {
        if self.enabled && self.debt > 0 {
            self.refused += 1;
            return false;
        }
        true
    }

    /// Charges a replay of `steps` ticks.
    pub fn commit(&mut self, steps: u32) {
        self.debt += u64::from(steps);
        self.granted += 1;
    }

    /// Outstanding debt in steps.
    #[must_use]
    pub fn debt(&self) -> u64 {
        self.debt
    }

    /// Requests granted so far.
    #[must_use]
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Requests refused so far.
    #[must_use]
    pub fn refused(&self) -> u64 {
        self.refused
    }

    /// Forgets debt and counters.
    pub fn reset(&mut self) {
        self.debt = 0;
        self.granted = 0;
        self.refused = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(budget: u32) -> OversimulationGuard {
        OversimulationGuard::new(&OversimulationConfig {
            enabled: true,
            step_budget_per_tick: budget,
        })
    }

    #[test]
    fn test_pattern_matches_budget() {
        let mut g = guard(1);
        let mut pattern = Vec::new();
        for _ in 0..9 {
            g.on_tick();
            pattern.push(g.request(3));
        }
        assert_eq!(pattern, vec![true, false, false, true, false, false, true, false, false]);
        assert_eq!(g.granted(), 3);
        assert_eq!(g.refused(), 6);
    }

    #[test]
    fn test_larger_budget_allows_more() {
        let mut g = guard(3);
        for _ in 0..10 {
            g.on_tick();
            assert!(g.request(3));
        }
    }

    #[test]
    fn test_disabled_guard_always_grants() {
        let mut g = OversimulationGuard::new(&OversimulationConfig {
            enabled: false,
            step_budget_per_tick: 1,
        });
        for _ in 0..5 {
            assert!(g.request(10));
        }
        assert_eq!(g.refused(), 0);
    }

    #[test]
    fn test_uncommitted_check_is_free() {
        let mut g = guard(1);
        assert!(g.allows());
        assert!(g.allows());
        assert_eq!(g.debt(), 0);
        assert_eq!(g.granted(), 0);

        g.commit(2);
        assert!(!g.allows());
        assert_eq!(g.refused(), 1);
        g.on_tick();
        g.on_tick();
        assert!(g.allows());
    }

    #[test]
    fn test_reset_clears_debt() {
        let mut g = guard(1);
        assert!(g.request(50));
        assert!(!g.request(1));
        g.reset();
        assert_eq!(g.debt(), 0);
        assert!(g.request(1));
    }
}
