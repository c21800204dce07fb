//! Progress tracking for long-running enrichment runs and sweeps.
//!
//! Calculates percentages, throughput and remaining time, and decides when
//! a progress line is worth logging.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);

/// What is being counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    /// Enrichment work items
    WorkItems,
    /// Repositories collected by a sweep
    Repositories,
}

impl ProgressUnit {
    /// Human-friendly lowercase plural label
    pub fn plural(&self) -> &'static str {
        match self {
            Self::WorkItems => "items",
            Self::Repositories => "repositories",
        }
    }
}

/// Progress state for one run
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Items settled so far in this process
    pub items_done: u64,
    /// Total expected items (if known)
    pub total_expected: Option<u64>,
    /// When the run started
    pub start_time: Instant,
    /// Last time progress was reported
    pub last_update: Instant,
    /// Minimum interval between time-based updates
    pub update_interval: Duration,
    /// Items per second since start
    pub current_rate: f64,
    /// Unit being counted
    pub unit: ProgressUnit,
    /// Current phase, e.g. "batch 3/40"
    pub current_phase: Option<String>,
    /// Last reported completion percentage
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a new progress tracker with default intervals
    pub fn new(total_expected: Option<u64>, unit: ProgressUnit) -> Self {
        let now = Instant::now();
        Self {
            items_done: 0,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            unit,
            current_phase: None,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Count newly settled items
    pub fn update(&mut self, new_items: u64) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        self.items_done = self.items_done.saturating_add(new_items);
        if elapsed > 0.0 {
            self.current_rate = self.items_done as f64 / elapsed;
        }
    }

    /// Whether a progress update should be emitted based on time or percentage
    pub fn should_emit_update(&self) -> bool {
        if self.items_done == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Set descriptive phase label
    pub fn set_phase<S: Into<String>>(&mut self, phase: Option<S>) {
        self.current_phase = phase.map(|s| s.into());
    }

    /// Completion percentage (0-100), when the total is known
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.items_done as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Estimated remaining time at the current rate
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.items_done);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string for logging
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Processed {} {}",
            self.items_done,
            self.unit.plural()
        )];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        if let Some(phase) = &self.current_phase {
            parts.push(format!("({phase})"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} {}/sec", self.current_rate, self.unit.plural()));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
