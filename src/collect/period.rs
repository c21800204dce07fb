//! Half-open time periods used to partition a search sweep

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const QUALIFIER_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// `[start, end)` with one-second resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
    /// Number of subdivisions that produced this period
    pub depth: u32,
}

impl Period {
    /// Top-level period
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            depth: 0,
        }
    }

    /// Width in whole seconds
    pub fn width_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    /// A one-second period cannot be split further
    pub fn is_atomic(&self) -> bool {
        self.width_secs() <= 1
    }

    /// Search qualifier selecting exactly this period.
    ///
    /// GitHub ranges are inclusive on both ends, so the end is pulled back by
    /// one second to keep neighbouring periods disjoint.
    pub fn search_qualifier(&self) -> String {
        let last = self.end - Duration::seconds(1);
        format!(
            "created:{}..{}",
            self.start.format(QUALIFIER_FORMAT),
            last.format(QUALIFIER_FORMAT)
        )
    }

    /// Split into `parts` contiguous periods of near-equal width.
    ///
    /// The result always covers `[start, end)` exactly. `parts` is clamped to
    /// the number of seconds in the period.
    pub fn split(&self, parts: u64) -> Vec<Period> {
        let width = self.width_secs().max(0);
        if width == 0 {
            return Vec::new();
        }
        let parts = i64::try_from(parts).unwrap_or(i64::MAX).clamp(1, width);
        let base = width / parts;
        let extra = width % parts;

        let mut periods = Vec::with_capacity(parts as usize);
        let mut cursor = self.start;
        for idx in 0..parts {
            let len = base + i64::from(idx < extra);
            let next = if idx == parts - 1 {
                self.end
            } else {
                cursor + Duration::seconds(len)
            };
            periods.push(Period {
                start: cursor,
                end: next,
                depth: self.depth + 1,
            });
            cursor = next;
        }
        periods
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(QUALIFIER_FORMAT),
            self.end.format(QUALIFIER_FORMAT)
        )
    }
}

/// Number of periods needed so each holds about `cap * fill_ratio` results
pub fn periods_needed(total: u64, cap: u64, fill_ratio: f64) -> u64 {
    let per_period = ((cap as f64) * fill_ratio).floor().max(1.0);
    ((total as f64) / per_period).ceil().max(1.0) as u64
}

/// Plan the initial chronological partition of `[start, end)`
pub fn plan_periods(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    estimated_total: u64,
    cap: u64,
    fill_ratio: f64,
) -> Vec<Period> {
    let root = Period {
        start,
        end,
        depth: 0,
    };
    let parts = periods_needed(estimated_total, cap, fill_ratio);
    if parts <= 1 {
        return if root.width_secs() > 0 { vec![root] } else { Vec::new() };
    }
    // Planned periods are top-level, not subdivisions.
    root.split(parts)
        .into_iter()
        .map(|p| Period { depth: 0, ..p })
        .collect()
}
