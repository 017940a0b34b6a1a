//! Cooperative, resumable workflow engine.
//!
//! Every generator is a state machine advanced by [`Workflow::step`]. A step
//! runs one phase until it finishes or until the per-step work budget runs
//! out; in the latter case the phase's [`LoopCursor`] remembers the nested loop
//! indices so the next step picks up at exactly the same iteration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

// =============================================================================
// SETTINGS
// =============================================================================

/// Budget and pacing for resumable loops.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Iterations a phase may run before it yields.
    pub count_limit: usize,
    /// Delay in seconds the host waits after a yield.
    pub rate: f64,
    /// Deepest loop nesting a cursor accepts.
    pub depth_limit: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            count_limit: 3000,
            rate: 0.01,
            depth_limit: 4,
        }
    }
}

impl LoopSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.rate.max(0.0))
    }
}

// =============================================================================
// LOOP CURSOR
// =============================================================================

/// Saved position inside a (possibly nested) loop.
///
/// Usage inside a phase:
///
/// ```ignore
/// cursor.resume(budget);
/// let mut i = cursor.begin(0);
/// while i < n {
///     let mut j = cursor.begin(1);
///     while j < m {
///         if cursor.checkpoint(&[i, j]) {
///             return StepStatus::Yield { .. };
///         }
///         // work
///         j += 1;
///     }
///     i += 1;
/// }
/// ```
///
/// `begin(level)` hands back the saved index only the first time a level is
/// entered after `resume`; inner loops of later outer iterations start at 0.
#[derive(Clone, Debug)]
pub struct LoopCursor {
    saved: Vec<usize>,
    armed: Vec<bool>,
    count: usize,
    tick: usize,
    budget: usize,
    depth_limit: usize,
    initialized: bool,
}

impl LoopCursor {
    pub fn new(settings: &LoopSettings) -> Self {
        let depth = settings.depth_limit.max(1);
        Self {
            saved: vec![0; depth],
            armed: vec![true; depth],
            count: 0,
            tick: 0,
            budget: settings.count_limit.max(1),
            depth_limit: depth,
            initialized: false,
        }
    }

    /// Reject loops nested deeper than this cursor supports.
    pub fn validate_depth(&self, depth: usize) -> Result<()> {
        if depth > self.depth_limit {
            return Err(GridError::Config(format!(
                "loop depth {} exceeds depth limit {}",
                depth, self.depth_limit
            )));
        }
        Ok(())
    }

    /// Start a new step with a fresh tick budget.
    pub fn resume(&mut self, budget: usize) {
        self.tick = 0;
        self.budget = budget.max(1);
        self.armed.iter_mut().for_each(|a| *a = true);
    }

    /// Starting index for loop `level`.
    pub fn begin(&mut self, level: usize) -> usize {
        match self.armed.get_mut(level) {
            Some(armed) if *armed => {
                *armed = false;
                self.saved[level]
            }
            _ => 0,
        }
    }

    /// Account for one iteration; `true` means the budget is spent and the
    /// caller must return without doing the iteration. The indices are saved
    /// so the same iteration runs first on the next step.
    pub fn checkpoint(&mut self, indices: &[usize]) -> bool {
        if self.tick >= self.budget {
            for (slot, &index) in self.saved.iter_mut().zip(indices) {
                *slot = index;
            }
            return true;
        }
        self.tick += 1;
        self.count += 1;
        false
    }

    /// Store a resume point without spending budget; for phases whose inner
    /// work pauses on its own.
    pub fn save(&mut self, indices: &[usize]) {
        for (slot, &index) in self.saved.iter_mut().zip(indices) {
            *slot = index;
        }
    }

    /// Iterations completed since the last reset.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Forget everything; used when a phase completes.
    pub fn reset(&mut self) {
        self.saved.iter_mut().for_each(|s| *s = 0);
        self.armed.iter_mut().for_each(|a| *a = true);
        self.count = 0;
        self.tick = 0;
        self.initialized = false;
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Weighted progress across phases.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Progress {
    passed: f64,
    current: f64,
}

impl Progress {
    pub fn reset(&mut self) {
        *self = Progress::default();
    }

    /// Report `done` of `total` units inside a phase worth `weight`.
    pub fn update(&mut self, done: usize, total: usize, weight: f64) {
        let fraction = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        self.current = self.passed + fraction.min(1.0) * weight;
    }

    /// Credit a finished phase.
    pub fn finish_phase(&mut self, weight: f64) {
        self.passed += weight;
        self.current = self.passed;
    }

    /// Jump to 1.0; phases skipped on the way are not credited one by one.
    pub fn complete(&mut self) {
        self.passed = 1.0;
        self.current = 1.0;
    }

    pub fn value(&self) -> f64 {
        self.current
    }
}

// =============================================================================
// WORKFLOW TRAIT
// =============================================================================

/// Outcome of one [`Workflow::step`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepStatus {
    /// A phase finished; step again right away.
    Continue,
    /// Budget exhausted or waiting on a collaborator; step again after `delay`.
    Yield { delay: Duration },
    /// Terminal success.
    Done,
    /// Terminal failure; see [`Workflow::last_error`].
    Error,
}

/// Result of running the current phase for one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The phase finished and the state machine moved on.
    Complete,
    /// The budget ran out; the cursor holds the resume point.
    Paused,
}

/// A resumable generator.
pub trait Workflow<Ctx: ?Sized> {
    /// Generator name used in logs and errors.
    fn name(&self) -> &str;

    /// Advance by at most `budget` loop iterations.
    fn step(&mut self, ctx: &Ctx, budget: usize) -> StepStatus;

    /// Fraction of total work done, in [0, 1].
    fn progress(&self) -> f64;

    /// True only in the `Done` state.
    fn is_loading_completed(&self) -> bool;

    fn last_error(&self) -> Option<&GridError>;

    /// Label of the current workflow state.
    fn state_label(&self) -> String;
}

/// Run a workflow to completion, sleeping between yields.
pub fn drive<Ctx, W>(
    workflow: &mut W,
    ctx: &Ctx,
    settings: &LoopSettings,
    mut sleep: impl FnMut(Duration),
) -> Result<()>
where
    Ctx: ?Sized,
    W: Workflow<Ctx> + ?Sized,
{
    loop {
        match workflow.step(ctx, settings.count_limit) {
            StepStatus::Continue => {}
            StepStatus::Yield { delay } => sleep(delay),
            StepStatus::Done => return Ok(()),
            StepStatus::Error => {
                return Err(GridError::Workflow {
                    name: workflow.name().to_string(),
                    step: workflow.state_label(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(limit: usize) -> LoopCursor {
        LoopCursor::new(&LoopSettings {
            count_limit: limit,
            ..LoopSettings::default()
        })
    }

    /// Nested loop over 3x4 that records every visited pair.
    fn run_nested(c: &mut LoopCursor, budget: usize, seen: &mut Vec<(usize, usize)>) -> bool {
        c.resume(budget);
        let mut i = c.begin(0);
        while i < 3 {
            let mut j = c.begin(1);
            while j < 4 {
                if c.checkpoint(&[i, j]) {
                    return false;
                }
                seen.push((i, j));
                j += 1;
            }
            i += 1;
        }
        true
    }

    #[test]
    fn test_resume_visits_each_iteration_once() {
        let mut c = cursor(5);
        let mut seen = Vec::new();
        let mut steps = 0;
        while !run_nested(&mut c, 5, &mut seen) {
            steps += 1;
            assert!(steps < 10);
        }
        let expected: Vec<_> = (0..3).flat_map(|i| (0..4).map(move |j| (i, j))).collect();
        assert_eq!(seen, expected);
        assert_eq!(c.count(), 12);
        // 12 iterations with a budget of 5 need two yields.
        assert_eq!(steps, 2);
    }

    #[test]
    fn test_inner_level_restarts_at_zero_after_first_reentry() {
        let mut c = cursor(2);
        let mut seen = Vec::new();
        assert!(!run_nested(&mut c, 2, &mut seen));
        assert_eq!(seen, vec![(0, 0), (0, 1)]);
        assert!(!run_nested(&mut c, 2, &mut seen));
        assert_eq!(&seen[2..], &[(0, 2), (0, 3)]);
        assert!(!run_nested(&mut c, 2, &mut seen));
        assert_eq!(&seen[4..], &[(1, 0), (1, 1)]);
    }

    #[test]
    fn test_depth_limit() {
        let c = cursor(10);
        assert!(c.validate_depth(4).is_ok());
        assert!(matches!(c.validate_depth(5), Err(GridError::Config(_))));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut c = cursor(1);
        let mut seen = Vec::new();
        run_nested(&mut c, 1, &mut seen);
        run_nested(&mut c, 1, &mut seen);
        c.mark_initialized();
        c.reset();
        assert_eq!(c.count(), 0);
        assert!(!c.is_initialized());
        c.resume(1);
        assert_eq!(c.begin(0), 0);
        assert_eq!(c.begin(1), 0);
    }

    #[test]
    fn test_progress_weights() {
        let mut p = Progress::default();
        p.update(5, 10, 0.2);
        assert!((p.value() - 0.1).abs() < 1e-12);
        p.finish_phase(0.2);
        p.update(1, 4, 0.4);
        assert!((p.value() - 0.3).abs() < 1e-12);
        p.update(0, 0, 0.4);
        assert!((p.value() - 0.6).abs() < 1e-12);
    }

    struct Countdown {
        left: usize,
        fail: bool,
    }

    impl Workflow<()> for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }
        fn step(&mut self, _: &(), _budget: usize) -> StepStatus {
            if self.left == 0 {
                return if self.fail { StepStatus::Error } else { StepStatus::Done };
            }
            self.left -= 1;
            StepStatus::Yield {
                delay: Duration::from_millis(1),
            }
        }
        fn progress(&self) -> f64 {
            0.0
        }
        fn is_loading_completed(&self) -> bool {
            self.left == 0 && !self.fail
        }
        fn last_error(&self) -> Option<&GridError> {
            None
        }
        fn state_label(&self) -> String {
            format!("left={}", self.left)
        }
    }

    #[test]
    fn test_drive_sleeps_on_yield_and_reports_error() {
        let mut sleeps = 0;
        let mut ok = Countdown { left: 3, fail: false };
        drive(&mut ok, &(), &LoopSettings::default(), |_| sleeps += 1).unwrap();
        assert_eq!(sleeps, 3);

        let mut bad = Countdown { left: 0, fail: true };
        let err = drive(&mut bad, &(), &LoopSettings::default(), |_| {}).unwrap_err();
        assert!(matches!(err, GridError::Workflow { .. }));
    }
}
