use std::time::Instant;

use log::debug;

/// Logs how long an action took when dropped.
#[must_use = "the action is timed until the tracer is dropped"]
pub struct Tracer {
    action: &'static str,
    started: Instant,
}

impl Tracer {
    pub fn trace(action: &'static str) -> Tracer {
        Tracer {
            action,
            started: Instant::now(),
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        debug!("{} took {:.3}ms", self.action, elapsed.as_secs_f64() * 1000.0);
    }
}
