//! Time and memory budget checks for a single scan invocation.
//!
//! The environment is reached through [`ResourceProbe`]; the budget predicates
//! themselves are pure so the orchestrator can sample them every
//! `check_interval` entries without measurable cost.

#![allow(missing_docs)]

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Source of elapsed time and free memory for the running process.
pub trait ResourceProbe {
    /// Wall-clock time since the scan invocation started.
    fn elapsed(&self) -> Duration;
    /// Bytes still available below the memory ceiling, `None` when unknown.
    fn available_memory(&self) -> Option<u64>;
}

/// True while `elapsed` has not passed `threshold`.
#[must_use]
pub fn has_time_budget(elapsed: Duration, threshold: Duration) -> bool {
    elapsed <= threshold
}

/// True when at least `required` bytes remain. Unknown availability passes.
#[must_use]
pub fn has_memory_budget(available: Option<u64>, required: u64) -> bool {
    available.is_none_or(|free| free >= required)
}

/// Budget guard consulted by the orchestrator.
pub struct ResourceGuard {
    probe: Box<dyn ResourceProbe>,
    time_limit: Option<Duration>,
    memory_headroom: u64,
}

impl ResourceGuard {
    /// `time_limit = None` runs unconstrained: only memory is ever checked.
    pub fn new(
        probe: Box<dyn ResourceProbe>,
        time_limit: Option<Duration>,
        memory_headroom: u64,
    ) -> Self {
        Self {
            probe,
            time_limit,
            memory_headroom,
        }
    }

    /// Whether the caller asked for a time-boxed scan.
    #[must_use]
    pub fn is_constrained(&self) -> bool {
        self.time_limit.is_some()
    }

    #[must_use]
    pub fn time_exhausted(&self) -> bool {
        self.time_limit
            .is_some_and(|limit| !has_time_budget(self.probe.elapsed(), limit))
    }

    #[must_use]
    pub fn memory_exhausted(&self) -> bool {
        !has_memory_budget(self.probe.available_memory(), self.memory_headroom)
    }

    /// Whether `bytes` can be allocated while keeping the configured headroom.
    #[must_use]
    pub fn has_memory_for(&self, bytes: u64) -> bool {
        has_memory_budget(
            self.probe.available_memory(),
            bytes.saturating_add(self.memory_headroom),
        )
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.probe.elapsed()
    }
}

/// Monotonic clock plus process RSS measured against a configured ceiling.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    started: Instant,
    memory_limit_bytes: u64,
}

impl SystemProbe {
    /// A zero `memory_limit_bytes` disables memory accounting.
    #[must_use]
    pub fn new(started: Instant, memory_limit_bytes: u64) -> Self {
        Self {
            started,
            memory_limit_bytes,
        }
    }
}

impl ResourceProbe for SystemProbe {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn available_memory(&self) -> Option<u64> {
        if self.memory_limit_bytes == 0 {
            return None;
        }
        match read_rss_bytes() {
            0 => None,
            rss => Some(self.memory_limit_bytes.saturating_sub(rss)),
        }
    }
}

/// Deterministic probe that runs out of time or memory after a fixed number of checks.
///
/// Every call to a probe method counts as one check; the call that exceeds the
/// configured count and all later calls report exhaustion.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    time_checks: Cell<u64>,
    memory_checks: Cell<u64>,
    time_ok_checks: Option<u64>,
    memory_ok_checks: Option<u64>,
}

impl ScriptedProbe {
    /// Never runs out of anything.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn time_exhausted_after(mut self, checks: u64) -> Self {
        self.time_ok_checks = Some(checks);
        self
    }

    #[must_use]
    pub fn memory_exhausted_after(mut self, checks: u64) -> Self {
        self.memory_ok_checks = Some(checks);
        self
    }

    fn tick(counter: &Cell<u64>, ok_checks: Option<u64>) -> bool {
        let seen = counter.get();
        counter.set(seen + 1);
        ok_checks.is_none_or(|limit| seen < limit)
    }
}

impl ResourceProbe for ScriptedProbe {
    fn elapsed(&self) -> Duration {
        if Self::tick(&self.time_checks, self.time_ok_checks) {
            Duration::ZERO
        } else {
            Duration::MAX
        }
    }

    fn available_memory(&self) -> Option<u64> {
        if Self::tick(&self.memory_checks, self.memory_ok_checks) {
            Some(u64::MAX)
        } else {
            Some(0)
        }
    }
}

/// Read current process RSS in bytes from /proc/self/status.
///
/// Returns 0 on non-Linux or if reading fails.
fn read_rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        read_rss_linux()
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

#[cfg(target_os = "linux")]
fn read_rss_linux() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };

    status
        .lines()
        .find_map(|line| {
            let rest = line.strip_prefix("VmRSS:")?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
        .map_or(0, |kb| kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_budget_boundary_is_inclusive() {
        let limit = Duration::from_secs(15);
        assert!(has_time_budget(Duration::from_secs(15), limit));
        assert!(!has_time_budget(Duration::from_millis(15_001), limit));
    }

    #[test]
    fn unknown_memory_always_has_budget() {
        assert!(has_memory_budget(None, u64::MAX));
        assert!(has_memory_budget(Some(2_097_000), 2_097_000));
        assert!(!has_memory_budget(Some(1_000), 2_097_000));
    }

    #[test]
    fn unconstrained_guard_ignores_time() {
        let guard = ResourceGuard::new(
            Box::new(ScriptedProbe::unlimited().time_exhausted_after(0)),
            None,
            0,
        );
        assert!(!guard.is_constrained());
        assert!(!guard.time_exhausted());
    }

    #[test]
    fn scripted_probe_exhausts_after_count() {
        let guard = ResourceGuard::new(
            Box::new(ScriptedProbe::unlimited().time_exhausted_after(2)),
            Some(Duration::from_secs(15)),
            0,
        );
        assert!(!guard.time_exhausted());
        assert!(!guard.time_exhausted());
        assert!(guard.time_exhausted());
        assert!(guard.time_exhausted());
    }

    #[test]
    fn memory_headroom_applies_to_allocations() {
        let guard = ResourceGuard::new(Box::new(ScriptedProbe::unlimited()), None, 2_097_000);
        assert!(guard.has_memory_for(1 << 20));
        let starved = ResourceGuard::new(
            Box::new(ScriptedProbe::unlimited().memory_exhausted_after(0)),
            None,
            2_097_000,
        );
        assert!(!starved.has_memory_for(1));
        assert!(starved.memory_exhausted());
    }

    #[test]
    fn system_probe_without_limit_reports_unknown() {
        let probe = SystemProbe::new(Instant::now(), 0);
        assert!(probe.available_memory().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn read_rss_returns_nonzero() {
        assert!(read_rss_bytes() > 0, "RSS should be > 0 on Linux");
    }
}
