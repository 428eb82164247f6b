//! Recompute decision
//!
//! Given a resource and the current time, decide whether its formula has to
//! be evaluated now, later, or not at all. Pure apart from the clock value
//! passed in.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::resource::{parse_duration, ControlResource, ControlSpec, DurationParseError};

/// What an invocation should do with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Terminal: nothing to do until the spec changes
    Skip,
    /// The last result is still fresh; look again after the duration
    WaitUntil(Duration),
    /// Resolve parameters and evaluate the formula
    RecomputeNow,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Skip => f.write_str("skip"),
            Decision::WaitUntil(d) => write!(f, "wait {:?}", d),
            Decision::RecomputeNow => f.write_str("recompute"),
        }
    }
}

/// Decide what to do with `resource` at time `now`.
///
/// A new generation is always recomputed. Otherwise a resource without an
/// interval is terminal, one that was never evaluated is recomputed, and one
/// with a fresh result waits out the rest of its interval.
pub fn decide(resource: &ControlResource, now: DateTime<Utc>) -> Decision {
    let status = &resource.status;
    if resource.generation() != status.observed_generation {
        return Decision::RecomputeNow;
    }

    let Some(every) = resource.spec.interval() else {
        return Decision::Skip;
    };

    if status.result.is_empty() {
        return Decision::RecomputeNow;
    }

    // A malformed interval is surfaced after evaluation; here it counts as zero.
    let interval = parse_duration(every).unwrap_or_else(|err| {
        debug!(interval = every, error = %err, "Unparseable interval treated as zero");
        Duration::ZERO
    });

    // An unreadable timestamp counts as "just observed".
    let observed_at = status.observed_at_time().unwrap_or(now);
    let elapsed = (now - observed_at).to_std().unwrap_or(Duration::ZERO);

    if elapsed < interval {
        Decision::WaitUntil(interval - elapsed)
    } else {
        Decision::RecomputeNow
    }
}

/// Wake-up to request after a published evaluation.
///
/// `None` when the spec has no interval: the resource is terminal until its
/// spec changes.
pub fn next_wakeup(spec: &ControlSpec) -> Result<Option<Duration>, DurationParseError> {
    spec.interval().map(parse_duration).transpose()
}
