//! Backend selection.
//!
//! Selection is a pure function over a snapshot of candidate state plus one
//! piece of explicit rotation state per health tier ([`TierCursors`]):
//!
//! 1. drop unhealthy, excluded and full backends;
//! 2. use the healthy tier if it has any candidate, else the degraded tier;
//! 3. keep only the candidates with the lowest load ratio
//!    (`in_flight / max_concurrency`);
//! 4. among those, pick with smooth weighted round-robin: every tied candidate
//!    gains its weight, the highest running total wins (ties go to the higher
//!    weight, then the earlier backend) and pays back the tied set's total.
//!
//! Step 4 makes the heaviest backend win the first draw on an idle fleet while
//! still rotating through the lighter ones, so that over time equally loaded
//! backends are chosen in proportion to their weights.

use gpugate_common::{GateError, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{Backend, CandidateView, HealthState};

/// Running weights for the smooth round-robin, one map per selectable tier.
#[derive(Debug, Default, Clone)]
pub struct TierCursors {
    healthy: HashMap<String, i64>,
    degraded: HashMap<String, i64>,
}

impl TierCursors {
    pub fn new() -> Self {
        Self::default()
    }

    fn tier_mut(&mut self, health: HealthState) -> &mut HashMap<String, i64> {
        match health {
            HealthState::Degraded => &mut self.degraded,
            _ => &mut self.healthy,
        }
    }

    /// Forget all rotation state.
    pub fn clear(&mut self) {
        self.healthy.clear();
        self.degraded.clear();
    }
}

/// Compares `a.in_flight / a.max` with `b.in_flight / b.max` without division.
fn compare_load(a: &CandidateView<'_>, b: &CandidateView<'_>) -> Ordering {
    let lhs = a.in_flight as u64 * b.max_concurrency as u64;
    let rhs = b.in_flight as u64 * a.max_concurrency as u64;
    lhs.cmp(&rhs)
}

/// Picks one candidate and returns its index in `views`.
///
/// `is_excluded` is consulted by address. Returns `None` when nothing passes
/// the filter.
pub fn choose_candidate<F>(
    views: &[CandidateView<'_>],
    is_excluded: F,
    cursors: &mut TierCursors,
) -> Option<usize>
where
    F: Fn(&str) -> bool,
{
    let eligible: Vec<usize> = views
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            v.health.is_selectable() && v.in_flight < v.max_concurrency && !is_excluded(v.address)
        })
        .map(|(i, _)| i)
        .collect();

    let tier = if eligible.iter().any(|&i| views[i].health == HealthState::Healthy) {
        HealthState::Healthy
    } else {
        HealthState::Degraded
    };

    let in_tier: Vec<usize> = eligible
        .into_iter()
        .filter(|&i| views[i].health == tier)
        .collect();

    let least = in_tier
        .iter()
        .map(|&i| &views[i])
        .min_by(|a, b| compare_load(a, b))?;

    let tied: Vec<usize> = in_tier
        .iter()
        .copied()
        .filter(|&i| compare_load(&views[i], least) == Ordering::Equal)
        .collect();

    let current = cursors.tier_mut(tier);
    let total: i64 = tied.iter().map(|&i| views[i].weight as i64).sum();

    let mut best: Option<(usize, i64)> = None;
    for &i in &tied {
        let view = &views[i];
        let running = current.entry(view.address.to_string()).or_insert(0);
        *running += view.weight as i64;

        let better = match best {
            None => true,
            Some((b, score)) => {
                *running > score || (*running == score && view.weight > views[b].weight)
            }
        };
        if better {
            best = Some((i, *running));
        }
    }

    let (chosen, _) = best?;
    if let Some(running) = current.get_mut(views[chosen].address) {
        *running -= total;
    }
    Some(chosen)
}

/// Thread-safe wrapper around [`choose_candidate`] for live backends.
#[derive(Debug, Default)]
pub struct SelectionPolicy {
    cursors: Mutex<TierCursors>,
}

impl SelectionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chooses a backend from `backends`, skipping any address for which
    /// `is_excluded` returns true.
    pub fn select<F>(&self, backends: &[Arc<Backend>], is_excluded: F) -> Result<Arc<Backend>>
    where
        F: Fn(&str) -> bool,
    {
        let views: Vec<CandidateView<'_>> = backends.iter().map(|b| b.view()).collect();
        let chosen = {
            let mut cursors = self.cursors.lock();
            choose_candidate(&views, is_excluded, &mut cursors)
        };

        match chosen {
            Some(i) => {
                let view = views[i];
                debug!(
                    "Selected backend {} ({}, {}/{} in flight, weight {})",
                    view.address, view.health, view.in_flight, view.max_concurrency, view.weight
                );
                Ok(Arc::clone(&backends[i]))
            }
            None => Err(GateError::NoBackendAvailable {
                considered: backends.len(),
            }),
        }
    }

    /// Drops rotation state, e.g. after the backend set changed.
    pub fn reset(&self) {
        self.cursors.lock().clear();
    }
}
