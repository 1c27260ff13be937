use ctf_core::{CtfError, Instruction, InstructionStatus};

use super::Executor;
use crate::plugins::control_flow::skip_block;
use crate::registry::{Flow, Status};
use crate::verify::{run_verification, Verification};

/// What one executed instruction leaves behind for the test loop.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct StepResult {
    pub(super) status: InstructionStatus,
    pub(super) details: String,
    pub(super) flow: Flow,
    /// A failure of this instruction ends the script.
    pub(super) fatal: bool,
    /// A time-manager condition ended the current test.
    pub(super) end_test: bool,
}

impl StepResult {
    fn new(status: InstructionStatus, details: impl Into<String>) -> Self {
        Self {
            status,
            details: details.into(),
            flow: Flow::Continue,
            fatal: false,
            end_test: false,
        }
    }

    fn failed_with(error: &CtfError) -> Self {
        Self::new(InstructionStatus::Failed, error.to_string())
    }

    fn from_hook_error(error: CtfError) -> Self {
        log::error!("Condition not satisfied: {}", error);
        Self {
            end_test: error.is_condition(),
            ..Self::failed_with(&error)
        }
    }

    pub(super) fn failed(&self) -> bool {
        matches!(
            self.status,
            InstructionStatus::Failed | InstructionStatus::Error
        )
    }
}

impl Executor {
    /// Command delay, `pre_command`, the handler (or its verification loop)
    /// and `post_command`, in that order. Fatality is decided up front so
    /// that a failed hook ends the script as a failed handler would.
    pub(super) fn execute_step(
        &mut self,
        instruction: &Instruction,
        script_timeout: Option<f64>,
    ) -> StepResult {
        let name = instruction.name.as_str();
        let fatal = self.options.end_test_on_fail
            || self
                .registry
                .find(name)
                .is_some_and(|(plugin, _)| plugin.is_fatal_on_fail(name));
        StepResult {
            fatal,
            ..self.run_hooks_and_dispatch(instruction, script_timeout)
        }
    }

    fn run_hooks_and_dispatch(
        &mut self,
        instruction: &Instruction,
        script_timeout: Option<f64>,
    ) -> StepResult {
        if instruction.wait > 0.0 {
            log::info!(
                "Waiting {} time-units before executing {}",
                instruction.wait,
                instruction.name
            );
            if let Err(error) = self.time.wait(&mut self.context, instruction.wait) {
                return StepResult::from_hook_error(error);
            }
        }
        if let Err(error) = self.time.pre_command(&mut self.context) {
            return StepResult::from_hook_error(error);
        }

        let mut result = self.dispatch(instruction, script_timeout);

        if let Err(error) = self.time.post_command(&mut self.context) {
            log::error!("Condition not satisfied: {}", error);
            if !result.failed() {
                result.status = InstructionStatus::Failed;
                result.details = error.to_string();
            }
            result.end_test |= error.is_condition();
        }
        result
    }

    fn dispatch(&mut self, instruction: &Instruction, script_timeout: Option<f64>) -> StepResult {
        let name = instruction.name.as_str();
        let Some((plugin, command)) = self.registry.find(name) else {
            return StepResult::new(
                InstructionStatus::Error,
                format!("Unknown Command. No plugin to handle {}", name),
            );
        };

        let args = match command.bind_resolved(&instruction.data, &self.context.variables) {
            Ok(args) => args,
            Err(error) => {
                log::error!("Instruction {} has invalid arguments: {}", name, error);
                let flow = skip_block(&mut self.context.labels, instruction)
                    .map_or(Flow::Continue, Flow::Jump);
                return StepResult {
                    flow,
                    ..StepResult::failed_with(&error)
                };
            }
        };

        if plugin.is_verify_required(name) {
            let timeout = instruction
                .verify_timeout
                .or(script_timeout)
                .unwrap_or(self.options.verify_timeout);
            match run_verification(&mut self.context, self.time.as_mut(), command, &args, timeout) {
                Verification::Verified { polls } => {
                    StepResult::new(InstructionStatus::Passed, format!("Verified after {} polls", polls))
                }
                Verification::TimedOut { polls, last_error } => StepResult::new(
                    InstructionStatus::Failed,
                    match last_error {
                        Some(error) => format!("Timeout after {} polls. Last error: {}", polls, error),
                        None => format!("Timeout after {} polls", polls),
                    },
                ),
                Verification::Aborted { error, .. } => StepResult::from_hook_error(error),
            }
        } else {
            match (command.handler)(&mut self.context, &args) {
                Ok(outcome) => {
                    let status = match outcome.status {
                        Status::Passed => InstructionStatus::Passed,
                        Status::Failed => InstructionStatus::Failed,
                        Status::Pending => {
                            log::warn!("{} is not verify-required but returned no verdict", name);
                            InstructionStatus::Failed
                        }
                    };
                    StepResult {
                        flow: outcome.flow,
                        ..StepResult::new(status, "")
                    }
                }
                Err(error) => {
                    log::error!("Instruction {} raised an error: {}", name, error);
                    StepResult::failed_with(&error)
                }
            }
        }
    }
}
