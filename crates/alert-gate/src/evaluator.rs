//! Gate decision logic.
//!
//! The policy is threshold-confirm-then-mute: a key must be seen `min_count`
//! times inside the counting window before it is admitted, and once admitted
//! it is muted for `backoff`. An active cooldown is checked before window
//! expiry, so a stale window never cuts a cooldown short.
//!
//! Window expiry is measured from `first_seen` and discards the
//! below-threshold count entirely rather than re-basing the window on the
//! latest occurrence.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use crate::types::{elapsed_beyond, saturating_add, GateKey, GateState, Policy};

/// Why the evaluator reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// First occurrence of the key
    FirstSeen,
    /// Inside an active cooldown
    Suppressed,
    /// Counting toward `min_count`
    BelowThreshold,
    /// Counting window expired and was restarted
    WindowReset,
    /// Threshold met and no cooldown active
    Admitted,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the occurrence may proceed downstream
    pub allowed: bool,
    /// Why
    pub verdict: Verdict,
    /// State to persist for the key
    pub next: GateState,
}

/// Decide whether an occurrence at `now` passes the gate.
///
/// Occurrences stamped before the stored `last_seen` are evaluated at
/// `last_seen` so that `first_seen <= last_seen` holds across producers with
/// skewed clocks.
#[must_use]
pub fn evaluate(
    key: &GateKey,
    now: DateTime<Utc>,
    policy: &Policy,
    prior: Option<&GateState>,
) -> Decision {
    let decision = match prior {
        None => first_occurrence(now, policy),
        Some(prior) => next_occurrence(prior.last_seen.max(now), policy, prior),
    };

    trace!(
        key = %key,
        allowed = decision.allowed,
        verdict = ?decision.verdict,
        count = decision.next.count,
        "Gate evaluated"
    );

    decision
}

fn first_occurrence(now: DateTime<Utc>, policy: &Policy) -> Decision {
    let mut next = GateState::first(now);
    let allowed = policy.min_count <= 1;
    if allowed {
        start_cooldown(&mut next, now, policy);
    }

    Decision {
        allowed,
        verdict: if allowed {
            Verdict::Admitted
        } else {
            Verdict::FirstSeen
        },
        next,
    }
}

fn next_occurrence(now: DateTime<Utc>, policy: &Policy, prior: &GateState) -> Decision {
    let mut next = prior.clone();

    if prior.is_suppressed_at(now) {
        next.last_seen = now;
        next.count = next.count.saturating_add(1);
        return Decision {
            allowed: false,
            verdict: Verdict::Suppressed,
            next,
        };
    }

    let reset = !policy.window.is_zero() && elapsed_beyond(prior.first_seen, now, policy.window);
    if reset {
        next.first_seen = now;
        next.count = 0;
        next.suppressed_until = None;
    }

    next.last_seen = now;
    next.count = next.count.saturating_add(1);

    let allowed = policy.min_count <= 1 || next.count >= policy.min_count;
    if allowed {
        start_cooldown(&mut next, now, policy);
    }

    let verdict = match (allowed, reset) {
        (true, _) => Verdict::Admitted,
        (false, true) => Verdict::WindowReset,
        (false, false) => Verdict::BelowThreshold,
    };

    Decision {
        allowed,
        verdict,
        next,
    }
}

fn start_cooldown(state: &mut GateState, now: DateTime<Utc>, policy: &Policy) {
    if !policy.backoff.is_zero() {
        state.suppressed_until = Some(saturating_add(now, policy.backoff));
    }
}
