//! Evaluation deadline enforcement.
//!
//! A [`DeadlineGovernor`] is registered as an evaluation handler on one image
//! handle. It is *armed* while its budget is positive and *tripped* once a
//! progress report shows the evaluation has run for at least the budget:
//!
//! ```text
//!   Armed(budget) ──progress.run >= budget──▶ Tripped
//!        │                                      │
//!        └─ progress.run < budget: stay         └─ any progress: no-op
//! ```
//!
//! Tripping kills the image, records one descriptive error and zeroes the
//! budget so later reports are no-ops. The governor is owned by the handler
//! closure, which the backend drops together with the handle's evaluation
//! state.

use super::backend::{BackendImage, EvalSink, Progress};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineGovernor {
    budget: u64,
}

impl DeadlineGovernor {
    pub fn new(budget_secs: u64) -> Self {
        Self {
            budget: budget_secs,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.budget == 0
    }

    /// Handle one progress report.
    pub fn on_progress(&mut self, progress: &Progress, sink: &dyn EvalSink) {
        if self.budget == 0 || progress.run < self.budget {
            return;
        }

        sink.set_kill();
        let message = timeout_message(self.budget, progress);
        tracing::warn!(
            budget = self.budget,
            elapsed = progress.run,
            percent = progress.percent,
            "Image evaluation canceled"
        );
        sink.report_error(message);

        // Killed and reported; the error travels up through the backend.
        self.budget = 0;
    }
}

fn plural(n: u64) -> &'static str {
    if n > 1 { "s" } else { "" }
}

fn timeout_message(budget: u64, progress: &Progress) -> String {
    format!(
        "Maximum image processing time of {budget} second{} exceeded with {} second{}. \
         Operation was canceled after {}% completion",
        plural(budget),
        progress.run,
        plural(progress.run),
        progress.percent
    )
}

/// Abort evaluation of `image` after `process_timeout` seconds.
///
/// A timeout of zero or less registers nothing.
pub fn setup_timeout_handler<I: BackendImage>(image: &I, process_timeout: i64) {
    let Ok(budget) = u64::try_from(process_timeout) else {
        return;
    };
    if budget == 0 {
        return;
    }

    let mut governor = DeadlineGovernor::new(budget);
    image.on_eval(Box::new(move |progress: &Progress, sink: &dyn EvalSink| {
        governor.on_progress(progress, sink)
    }));
}
