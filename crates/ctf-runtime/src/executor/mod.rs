use std::collections::BTreeSet;
use std::sync::Arc;

use ctf_core::{
    CtfError, Instruction, InstructionRecord, InstructionStatus, ResolvedScript, ScriptReport,
    TestCase, TestReport, TestStatus,
};

use crate::context::EngineContext;
use crate::labels::resolve_labels;
use crate::registry::{Flow, PluginRegistry};
use crate::status::{StatusListener, StatusUpdate};
use crate::time::TimeManager;

mod step;
#[cfg(test)]
mod tests;

pub const DEFAULT_VERIFY_TIMEOUT: f64 = 4.0;

/// Instruction steps one test may take before it is stopped as a runaway.
pub const STEP_GUARD: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    /// Used when neither the instruction nor the script sets a timeout.
    pub verify_timeout: f64,
    /// Treat every failed instruction as fatal to the script.
    pub end_test_on_fail: bool,
    pub ignored_instructions: BTreeSet<String>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            end_test_on_fail: false,
            ignored_instructions: BTreeSet::new(),
        }
    }
}

/// Runs resolved scripts test by test. The executor owns the engine context
/// and is the only writer of the instruction index.
pub struct Executor {
    registry: PluginRegistry,
    time: Box<dyn TimeManager>,
    context: EngineContext,
    options: ExecutorOptions,
    listeners: Vec<Arc<dyn StatusListener>>,
}

impl Executor {
    pub fn new(
        registry: PluginRegistry,
        time: Box<dyn TimeManager>,
        context: EngineContext,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            registry,
            time,
            context,
            options,
            listeners: Vec::new(),
        }
    }

    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn publish(&self, update: StatusUpdate) {
        for listener in &self.listeners {
            listener.on_status(&update);
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.context
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn exec_time(&self) -> f64 {
        self.time.exec_time()
    }

    /// Waits outside of any test, e.g. between scripts.
    pub fn idle(&mut self, seconds: f64) -> Result<(), CtfError> {
        self.time.wait(&mut self.context, seconds)
    }

    pub fn initialize_plugins(&mut self) -> Result<(), CtfError> {
        self.registry.initialize(&mut self.context)
    }

    pub fn shutdown_plugins(&mut self) {
        self.registry.shutdown(&mut self.context);
    }

    pub fn run_script(&mut self, script: &ResolvedScript) -> ScriptReport {
        let header = &script.header;
        log::info!("Script {}: {}", header.test_number, header.test_name);
        let started = self.time.exec_time();
        self.publish(StatusUpdate::ScriptStarted {
            test_number: header.test_number.clone(),
            test_name: header.test_name.clone(),
            num_tests: script.tests.len() + script.rejected.len(),
            exec_time: started,
        });

        let mut tests = Vec::with_capacity(script.tests.len() + script.rejected.len());
        let mut aborted = false;
        for test in &script.tests {
            if aborted {
                log::warn!("Skipping test {} after an aborted test", test.test_number);
                let report = TestReport::new(&test.test_number, &test.description)
                    .with_status(TestStatus::Skipped, "An earlier test aborted the script.");
                self.publish_test_finished(&report);
                tests.push(report);
                continue;
            }
            let report = self.run_test(test, header.verify_timeout);
            aborted = report.status == TestStatus::Aborted;
            tests.push(report);
        }
        for rejected in &script.rejected {
            let report = TestReport::new(&rejected.test_number, "")
                .with_status(TestStatus::Error, rejected.reason.clone());
            self.publish_test_finished(&report);
            tests.push(report);
        }

        let num_passed = tests
            .iter()
            .filter(|test| test.status == TestStatus::Passed)
            .count();
        let num_failed = tests
            .iter()
            .filter(|test| {
                matches!(
                    test.status,
                    TestStatus::Failed | TestStatus::Aborted | TestStatus::Error
                )
            })
            .count();
        let status = if aborted {
            TestStatus::Aborted
        } else if tests.is_empty() {
            TestStatus::Error
        } else if num_passed == tests.len() {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };

        let elapsed = self.time.exec_time() - started;
        log::info!(
            "Script {} finished: {:?} ({} passed, {} failed, {:.3} time-units)",
            header.test_number,
            status,
            num_passed,
            num_failed,
            elapsed
        );
        self.publish(StatusUpdate::ScriptFinished {
            test_number: header.test_number.clone(),
            status,
            num_passed,
            num_failed,
            exec_time: self.time.exec_time(),
        });

        ScriptReport {
            test_number: header.test_number.clone(),
            test_name: header.test_name.clone(),
            requirements: header.requirements.clone(),
            source_path: header.source_path.clone(),
            status,
            tests,
            elapsed,
            num_passed,
            num_failed,
            aborted,
        }
    }

    /// Runs one test. `script_timeout` is the script's default verification
    /// timeout, used before the executor's own default.
    pub fn run_test(&mut self, test: &TestCase, script_timeout: Option<f64>) -> TestReport {
        self.publish(StatusUpdate::TestStarted {
            test_number: test.test_number.clone(),
            description: test.description.clone(),
            num_instructions: test.instructions.len(),
            exec_time: self.time.exec_time(),
        });
        let report = self.execute_test(test, script_timeout);
        self.publish_test_finished(&report);
        report
    }

    fn publish_test_finished(&self, report: &TestReport) {
        self.publish(StatusUpdate::TestFinished {
            test_number: report.test_number.clone(),
            status: report.status,
            details: report.details.clone(),
            exec_time: self.time.exec_time(),
        });
    }

    fn publish_instruction(&self, test_number: &str, record: &InstructionRecord) {
        self.publish(StatusUpdate::InstructionFinished {
            test_number: test_number.to_string(),
            index: record.index,
            instruction: record.name.clone(),
            status: record.status,
            details: record.details.clone(),
            exec_time: self.time.exec_time(),
        });
    }

    fn execute_test(&mut self, test: &TestCase, script_timeout: Option<f64>) -> TestReport {
        let mut report = TestReport::new(&test.test_number, &test.description);
        log::info!("Test {}: Starting", test.test_number);
        if !test.description.is_empty() {
            log::info!("{}", test.description);
        }

        if test.instructions.is_empty() {
            log::error!("Invalid test case {}: it has no instructions", test.test_number);
            return report.with_status(TestStatus::Failed, "Test has no instructions.");
        }
        match resolve_labels(&test.instructions) {
            Ok(labels) => self.context.labels = labels,
            Err(error) => {
                log::error!("Test {} rejected: {}", test.test_number, error);
                return report.with_status(TestStatus::Error, error.to_string());
            }
        }

        let instructions = &test.instructions;
        let mut all_passed = true;
        let mut ending: Option<(TestStatus, String)> = None;
        let mut index = 0;
        let mut steps = 0usize;

        while index < instructions.len() {
            steps += 1;
            if steps > STEP_GUARD {
                let error = CtfError::new(
                    "EXECUTOR_GUARD_EXCEEDED",
                    format!("Test {} exceeded {} instruction steps.", test.test_number, STEP_GUARD),
                );
                log::error!("{}", error);
                ending = Some((TestStatus::Error, error.to_string()));
                break;
            }

            let instruction = &instructions[index];
            self.context.current_instruction_index = index;

            if instruction.disabled {
                log::info!("Skipping disabled test instruction {}", instruction.name);
                let skipped = record(
                    index,
                    instruction,
                    InstructionStatus::Disabled,
                    "Instruction is disabled. Skipping...",
                );
                self.publish_instruction(&test.test_number, &skipped);
                report.records.push(skipped);
                report.num_skipped += 1;
                index += 1;
                continue;
            }
            if self.options.ignored_instructions.contains(&instruction.name) {
                log::info!("Ignoring test instruction {}", instruction.name);
                let ignored = record(index, instruction, InstructionStatus::Ignored, "");
                self.publish_instruction(&test.test_number, &ignored);
                report.records.push(ignored);
                report.num_skipped += 1;
                index += 1;
                continue;
            }

            report.num_ran += 1;
            self.publish(StatusUpdate::InstructionActive {
                test_number: test.test_number.clone(),
                index,
                instruction: instruction.name.clone(),
                exec_time: self.time.exec_time(),
            });
            let step = self.execute_step(instruction, script_timeout);
            let failed = step.failed();
            if failed {
                all_passed = false;
                log::error!(
                    "FAIL Instruction {} ({}): {}",
                    instruction.name,
                    index,
                    step.details
                );
            } else {
                log::info!("PASS Instruction {} ({})", instruction.name, index);
            }
            let ran = record(index, instruction, step.status, step.details.clone());
            self.publish_instruction(&test.test_number, &ran);
            report.records.push(ran);

            if failed && step.fatal {
                log::error!("Instruction {} failed. Aborting test...", instruction.name);
                if self.options.end_test_on_fail {
                    log::warn!("Configuration field \"end_test_on_fail\" enabled. Ending testing.");
                }
                ending = Some((
                    TestStatus::Aborted,
                    format!("Instruction {} at {} failed.", instruction.name, index),
                ));
                break;
            }
            if step.end_test {
                ending = Some((
                    TestStatus::Failed,
                    format!("Condition not satisfied at instruction {} ({}).", index, instruction.name),
                ));
                break;
            }

            index = match step.flow {
                Flow::Continue => index + 1,
                Flow::Jump(target) if target < instructions.len() => target,
                Flow::Jump(target) => {
                    let error = CtfError::new(
                        "EXECUTOR_JUMP_OUT_OF_RANGE",
                        format!(
                            "Instruction {} jumped to {}, outside the test's {} instructions.",
                            index,
                            target,
                            instructions.len()
                        ),
                    );
                    log::error!("{}", error);
                    ending = Some((TestStatus::Error, error.to_string()));
                    break;
                }
            };
        }

        let (status, details) = ending.unwrap_or_else(|| {
            if all_passed {
                (TestStatus::Passed, String::new())
            } else {
                (TestStatus::Failed, String::new())
            }
        });
        report.status = status;
        report.details = details;

        log::info!("Test {}: {:?}", test.test_number, report.status);
        log::info!("Number instructions To Run:  {}", instructions.len());
        log::info!("Number instructions Ran:     {}", report.num_ran);
        log::info!("Number instructions Skipped: {}", report.num_skipped);
        report
    }
}

fn record(
    index: usize,
    instruction: &Instruction,
    status: InstructionStatus,
    details: impl Into<String>,
) -> InstructionRecord {
    InstructionRecord {
        index,
        name: instruction.name.clone(),
        status,
        details: details.into(),
    }
}
