use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ctf_core::{CtfError, ErrorKind};

use crate::context::EngineContext;
use crate::registry::ContinuousCheck;
use crate::telemetry::TelemetryLink;

pub const DEFAULT_POLL_PERIOD: f64 = 0.5;

/// Tolerance for float division when counting whole poll cycles, so that
/// `1.0 / 0.1` counts as 10 cycles.
const CYCLE_EPSILON: f64 = 1e-9;

/// Longest single wait or verification timeout. Longer requests are cut
/// down to this many time-units.
pub const MAX_WAIT_SECONDS: f64 = 86_400.0;

/// Number of whole poll cycles needed to cover `seconds`, which is clamped
/// to [`MAX_WAIT_SECONDS`].
pub fn cycles_for(seconds: f64, poll_period: f64) -> u64 {
    if seconds.is_nan() || poll_period.is_nan() || seconds <= 0.0 || poll_period <= 0.0 {
        return 0;
    }
    (seconds.min(MAX_WAIT_SECONDS) / poll_period - CYCLE_EPSILON)
        .ceil()
        .max(0.0) as u64
}

/// Couples engine time to a clock. A wait is a sequence of poll cycles,
/// each framed by `pre_command` and `post_command`.
pub trait TimeManager: Send {
    fn poll_period(&self) -> f64;

    /// Poll cycles completed so far.
    fn cycles(&self) -> u64;

    /// Advances the clock by one poll period.
    fn sleep_quantum(&mut self);

    fn pre_command(&mut self, _ctx: &mut EngineContext) -> Result<(), CtfError> {
        Ok(())
    }

    fn post_command(&mut self, _ctx: &mut EngineContext) -> Result<(), CtfError> {
        Ok(())
    }

    fn exec_time(&self) -> f64 {
        self.cycles() as f64 * self.poll_period()
    }

    /// Waits `ceil(seconds / poll_period)` cycles. An error from either
    /// hook ends the wait early.
    fn wait(&mut self, ctx: &mut EngineContext, seconds: f64) -> Result<(), CtfError> {
        if seconds > MAX_WAIT_SECONDS {
            log::warn!(
                "Wait of {} time-units exceeds the limit. Waiting {} instead.",
                seconds,
                MAX_WAIT_SECONDS
            );
        }
        let cycles = cycles_for(seconds, self.poll_period());
        for _ in 0..cycles {
            self.pre_command(ctx)?;
            self.sleep_quantum();
            ctx.exec_time = self.exec_time();
            self.post_command(ctx)?;
        }
        Ok(())
    }
}

/// Wall-clock time manager.
#[derive(Debug, Clone)]
pub struct OsTimeManager {
    poll_period: f64,
    cycles: u64,
}

impl OsTimeManager {
    pub fn new(poll_period: f64) -> Self {
        Self {
            poll_period,
            cycles: 0,
        }
    }
}

impl Default for OsTimeManager {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_PERIOD)
    }
}

impl TimeManager for OsTimeManager {
    fn poll_period(&self) -> f64 {
        self.poll_period
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }

    fn sleep_quantum(&mut self) {
        thread::sleep(Duration::from_secs_f64(self.poll_period));
        self.cycles += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounts {
    pub pre_command: u64,
    pub sleep: u64,
    pub post_command: u64,
}

type StepHook = Box<dyn FnMut(u64) + Send>;

/// Time manager driven by an external clock: each quantum calls the step
/// hook (if any) instead of sleeping.
pub struct SteppedTimeManager {
    poll_period: f64,
    cycles: u64,
    counts: CycleCounts,
    on_step: Option<StepHook>,
}

impl SteppedTimeManager {
    pub fn new(poll_period: f64) -> Self {
        Self {
            poll_period,
            cycles: 0,
            counts: CycleCounts::default(),
            on_step: None,
        }
    }

    /// The hook receives the number of the cycle being stepped, from 1.
    pub fn with_step_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.on_step = Some(Box::new(hook));
        self
    }

    pub fn counts(&self) -> CycleCounts {
        self.counts
    }
}

impl std::fmt::Debug for SteppedTimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteppedTimeManager")
            .field("poll_period", &self.poll_period)
            .field("cycles", &self.cycles)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl TimeManager for SteppedTimeManager {
    fn poll_period(&self) -> f64 {
        self.poll_period
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }

    fn sleep_quantum(&mut self) {
        self.cycles += 1;
        self.counts.sleep += 1;
        if let Some(hook) = self.on_step.as_mut() {
            hook(self.cycles);
        }
    }

    fn pre_command(&mut self, _ctx: &mut EngineContext) -> Result<(), CtfError> {
        self.counts.pre_command += 1;
        Ok(())
    }

    fn post_command(&mut self, _ctx: &mut EngineContext) -> Result<(), CtfError> {
        self.counts.post_command += 1;
        Ok(())
    }
}

/// Wraps another time manager. Before every command and poll cycle it drains
/// the telemetry links and runs the continuous checks.
pub struct MonitoringTimeManager {
    inner: Box<dyn TimeManager>,
    links: Vec<Arc<dyn TelemetryLink>>,
    checks: Vec<ContinuousCheck>,
}

impl MonitoringTimeManager {
    pub fn new(inner: Box<dyn TimeManager>) -> Self {
        Self {
            inner,
            links: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn with_link(mut self, link: Arc<dyn TelemetryLink>) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_checks(mut self, checks: Vec<ContinuousCheck>) -> Self {
        self.checks.extend(checks);
        self
    }
}

impl TimeManager for MonitoringTimeManager {
    fn poll_period(&self) -> f64 {
        self.inner.poll_period()
    }

    fn cycles(&self) -> u64 {
        self.inner.cycles()
    }

    fn sleep_quantum(&mut self) {
        self.inner.sleep_quantum();
    }

    fn pre_command(&mut self, ctx: &mut EngineContext) -> Result<(), CtfError> {
        self.inner.pre_command(ctx)?;

        for link in &self.links {
            link.read_packets().map_err(|error| CtfError {
                kind: ErrorKind::Test,
                ..error
            })?;
        }

        for check in &self.checks {
            (check.check)(ctx).map_err(|error| {
                log::error!(
                    "Continuous check {} of {} failed: {}",
                    check.name,
                    check.plugin,
                    error
                );
                CtfError::condition(
                    "CONTINUOUS_CHECK_FAILED",
                    format!("{} ({}): {}", check.name, check.plugin, error),
                )
            })?;
        }
        Ok(())
    }

    fn post_command(&mut self, ctx: &mut EngineContext) -> Result<(), CtfError> {
        self.inner.post_command(ctx)
    }
}
