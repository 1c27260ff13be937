use ctf_core::CtfError;

use crate::context::{EngineContext, VerificationStage};
use crate::registry::{CommandArgs, CommandSpec, Status};
use crate::time::{cycles_for, TimeManager};

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Verified { polls: u64 },
    TimedOut { polls: u64, last_error: Option<CtfError> },
    /// A Condition error from the handler or a poll wait stopped polling.
    Aborted { polls: u64, error: CtfError },
}

impl Verification {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    pub fn polls(&self) -> u64 {
        match self {
            Self::Verified { polls } | Self::TimedOut { polls, .. } | Self::Aborted { polls, .. } => {
                *polls
            }
        }
    }
}

/// Most handler invocations one verification may take.
pub fn max_polls(timeout: f64, poll_period: f64) -> u64 {
    cycles_for(timeout, poll_period).max(1)
}

/// Re-runs `command` once per poll period until it passes or the timeout
/// is spent. The verification stage is published in `ctx` for the duration.
pub fn run_verification(
    ctx: &mut EngineContext,
    time: &mut dyn TimeManager,
    command: &CommandSpec,
    args: &CommandArgs,
    timeout: f64,
) -> Verification {
    let poll_period = time.poll_period();
    let limit = max_polls(timeout, poll_period);
    log::info!(
        "Waiting up to {} time-units for verification of {}",
        timeout,
        command.name
    );

    let mut last_error = None;
    let mut polls = 0;
    let result = loop {
        if polls >= limit {
            break Verification::TimedOut { polls, last_error };
        }
        ctx.verification_stage = stage_for(polls, limit);
        polls += 1;

        match (command.handler)(ctx, args) {
            Ok(outcome) if outcome.status == Status::Passed => {
                break Verification::Verified { polls };
            }
            Ok(_) => {}
            Err(error) if error.is_condition() => {
                break Verification::Aborted { polls, error };
            }
            Err(error) => {
                log::warn!("Verification poll {} of {} failed: {}", polls, command.name, error);
                last_error = Some(error);
            }
        }

        if let Err(error) = time.wait(ctx, poll_period) {
            if error.is_condition() {
                break Verification::Aborted { polls, error };
            }
            log::error!("Error while waiting between polls of {}: {}", command.name, error);
        }
    };

    ctx.verification_stage = VerificationStage::None;
    result
}

fn stage_for(poll: u64, limit: u64) -> VerificationStage {
    if poll == 0 {
        VerificationStage::First
    } else if poll + 1 == limit {
        VerificationStage::Last
    } else {
        VerificationStage::Polling
    }
}
