use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ctf_core::{CtfValue, ParamType};

use super::*;
use crate::plugins::{control_flow_plugin, user_io_plugin, variable_plugin, ScriptedPrompt};
use crate::registry::{Outcome, ParamSpec, Plugin};
use crate::status::{StatusListener, StatusUpdate};
use crate::time::{MonitoringTimeManager, SteppedTimeManager};

fn executor_with(extra: Vec<Plugin>, options: ExecutorOptions) -> Executor {
    let mut registry = PluginRegistry::new();
    registry
        .register(control_flow_plugin())
        .expect("control flow should register");
    registry
        .register(variable_plugin(None))
        .expect("variables should register");
    for plugin in extra {
        registry.register(plugin).expect("plugin should register");
    }
    Executor::new(
        registry,
        Box::new(SteppedTimeManager::new(0.5)),
        EngineContext::default(),
        options,
    )
}

fn executor() -> Executor {
    executor_with(Vec::new(), ExecutorOptions::default())
}

fn conditions(json: &str) -> CtfValue {
    serde_json::from_str(json).expect("conditions should parse")
}

fn set(name: &str, op: &str, value: CtfValue) -> Instruction {
    Instruction::new("SetUserVariable")
        .arg("variable_name", name)
        .arg("operator", op)
        .arg("value", value)
        .arg("variable_type", "int")
}

fn test_case(number: &str, instructions: Vec<Instruction>) -> TestCase {
    TestCase {
        test_number: number.to_string(),
        description: String::new(),
        instructions,
    }
}

fn script(source: &str) -> ResolvedScript {
    ctf_loader::load_script_str(source, None).expect("script should load")
}

fn statuses(report: &TestReport) -> Vec<InstructionStatus> {
    report.records.iter().map(|record| record.status).collect()
}

fn visited(report: &TestReport) -> Vec<usize> {
    report.records.iter().map(|record| record.index).collect()
}

fn test_statuses(report: &ScriptReport) -> Vec<TestStatus> {
    report.tests.iter().map(|test| test.status).collect()
}

fn if_else(condition: Instruction) -> TestCase {
    test_case(
        "T1",
        vec![
            condition,
            set("a", "=", CtfValue::Int(1)),
            Instruction::new("ElseCondition").arg("label", "L"),
            set("b", "=", CtfValue::Int(2)),
            Instruction::new("EndCondition").arg("label", "L"),
        ],
    )
}

#[test]
fn if_else_runs_only_the_else_branch() {
    let mut executor = executor();
    executor.context_mut().variables.insert("y", CtfValue::Int(3));

    let report = executor.run_test(
        &test_case(
            "T1",
            vec![
                Instruction::new("IfCondition")
                    .arg("label", "L")
                    .arg("conditions", conditions(r#"[{"variable": "y", "compare": ">", "value": 5}]"#)),
                set("a", "=", CtfValue::Int(1)),
                Instruction::new("ElseCondition").arg("label", "L"),
                set("a", "=", CtfValue::Int(2)),
                Instruction::new("EndCondition").arg("label", "L"),
            ],
        ),
        None,
    );

    assert_eq!(report.status, TestStatus::Passed);
    assert_eq!(executor.context().variables.get("a"), Some(&CtfValue::Int(2)));
    assert_eq!(visited(&report), vec![0, 2, 3, 4]);
}

#[test]
fn unbound_reference_in_condition_takes_the_else_branch() {
    let mut executor = executor();
    executor.context_mut().variables.insert("y", CtfValue::Int(3));

    let report = executor.run_test(
        &if_else(
            Instruction::new("IfCondition").arg("label", "L").arg(
                "conditions",
                conditions(r#"[{"variable": "y", "compare": ">", "value": "$limit$"}]"#),
            ),
        ),
        None,
    );

    assert_eq!(visited(&report), vec![0, 2, 3, 4]);
    assert_eq!(report.records[0].status, InstructionStatus::Failed);
    assert_eq!(report.status, TestStatus::Failed);
    assert!(!executor.context().variables.contains("a"));
    assert_eq!(executor.context().variables.get("b"), Some(&CtfValue::Int(2)));
}

#[test]
fn unbound_reference_in_loop_condition_skips_the_body() {
    let mut executor = executor();
    let report = executor.run_test(
        &test_case(
            "T1",
            vec![
                Instruction::new("BeginLoop").arg("label", "L").arg(
                    "conditions",
                    conditions(r#"[{"variable": "i", "compare": "<", "value": "$max$"}]"#),
                ),
                set("i", "=", CtfValue::Int(1)),
                Instruction::new("EndLoop").arg("label", "L"),
            ],
        ),
        None,
    );

    assert_eq!(visited(&report), vec![0, 2]);
    assert_eq!(report.status, TestStatus::Failed);
    assert!(!executor.context().variables.contains("i"));
}

#[test]
fn invalid_control_flow_arguments_skip_the_block() {
    let mut executor = executor();
    executor.context_mut().variables.insert("y", CtfValue::Int(9));

    let report = executor.run_test(
        &if_else(
            Instruction::new("IfCondition")
                .arg("label", "L")
                .arg("conditions", conditions(r#"[{"variable": "y", "compare": ">", "value": 5}]"#))
                .arg("otherwise", "ignored"),
        ),
        None,
    );

    assert!(report.records[0].details.contains("ARG_UNKNOWN"));
    assert_eq!(visited(&report), vec![0, 2, 3, 4]);
    assert!(!executor.context().variables.contains("a"));
}

#[test]
fn string_variable_in_condition_is_compared_by_value() {
    let mut executor = executor();
    executor
        .context_mut()
        .variables
        .insert("mode", CtfValue::from("SAFE"));

    let report = executor.run_test(
        &if_else(
            Instruction::new("IfCondition").arg("label", "L").arg(
                "conditions",
                conditions(r#"[{"variable": "$mode$", "compare": "==", "value": "SAFE"}]"#),
            ),
        ),
        None,
    );

    assert_eq!(report.status, TestStatus::Passed);
    assert_eq!(visited(&report), vec![0, 1, 2, 4]);
    assert_eq!(executor.context().variables.get("a"), Some(&CtfValue::Int(1)));
}

#[test]
fn substituted_values_are_not_expanded_twice() {
    let mut executor = executor();
    let variables = &mut executor.context_mut().variables;
    variables.insert("x", CtfValue::Int(5));
    variables.insert("template", CtfValue::from("$x$"));

    let report = executor.run_test(
        &test_case(
            "T1",
            vec![Instruction::new("SetUserVariable")
                .arg("variable_name", "copy")
                .arg("operator", "=")
                .arg("value", "$template$")
                .arg("variable_type", "string")],
        ),
        None,
    );

    assert_eq!(report.status, TestStatus::Passed);
    assert_eq!(
        executor.context().variables.get("copy"),
        Some(&CtfValue::from("$x$"))
    );
}

#[test]
fn loop_reevaluates_until_condition_fails() {
    let mut executor = executor();
    executor.context_mut().variables.insert("i", CtfValue::Int(0));

    let report = executor.run_test(
        &test_case(
            "T1",
            vec![
                Instruction::new("BeginLoop")
                    .arg("label", "L")
                    .arg("conditions", conditions(r#"[{"variable": "i", "compare": "<", "value": 3}]"#)),
                set("i", "+", CtfValue::Int(1)),
                Instruction::new("EndLoop").arg("label", "L"),
            ],
        ),
        None,
    );

    assert_eq!(report.status, TestStatus::Passed);
    assert_eq!(executor.context().variables.get("i"), Some(&CtfValue::Int(3)));
    let sets = report
        .records
        .iter()
        .filter(|record| record.name == "SetUserVariable")
        .count();
    assert_eq!(sets, 3);
    // Four loop headers, three bodies, four loop ends.
    assert_eq!(report.num_ran, 11);
}

#[test]
fn disabled_ignored_and_unknown_instructions() {
    let mut executor = executor_with(
        Vec::new(),
        ExecutorOptions {
            ignored_instructions: ["InsertUserComment".to_string()].into_iter().collect(),
            ..ExecutorOptions::default()
        },
    );

    let report = executor.run_test(
        &test_case(
            "T1",
            vec![
                set("x", "=", CtfValue::Int(1)).disabled(),
                Instruction::new("InsertUserComment").arg("comment", "hello"),
                Instruction::new("SendCfsCommand"),
                set("x", "=", CtfValue::Int(5)),
            ],
        ),
        None,
    );

    assert_eq!(
        statuses(&report),
        vec![
            InstructionStatus::Disabled,
            InstructionStatus::Ignored,
            InstructionStatus::Error,
            InstructionStatus::Passed,
        ]
    );
    assert_eq!(report.records[2].details, "Unknown Command. No plugin to handle SendCfsCommand");
    assert_eq!(report.status, TestStatus::Failed);
    assert_eq!(report.num_ran, 2);
    assert_eq!(report.num_skipped, 2);
    assert_eq!(executor.context().variables.get("x"), Some(&CtfValue::Int(5)));
}

#[test]
fn bad_arguments_fail_the_instruction_only() {
    let mut executor = executor();
    let report = executor.run_test(
        &test_case(
            "T1",
            vec![
                set("x", "=", CtfValue::from("$missing$")),
                Instruction::new("CheckUserVariable").arg("variable_name", "x"),
                set("y", "=", CtfValue::Int(1)),
            ],
        ),
        None,
    );

    assert_eq!(
        statuses(&report),
        vec![
            InstructionStatus::Failed,
            InstructionStatus::Failed,
            InstructionStatus::Passed,
        ]
    );
    assert!(report.records[0].details.contains("VARIABLE_UNBOUND"));
    assert!(report.records[1].details.contains("ARG_COUNT"));
    assert!(!executor.context().variables.contains("x"));
}

#[test]
fn empty_and_malformed_tests_do_not_run() {
    let mut executor = executor();

    let empty = executor.run_test(&test_case("T1", Vec::new()), None);
    assert_eq!(empty.status, TestStatus::Failed);

    let unterminated = executor.run_test(
        &test_case(
            "T2",
            vec![Instruction::new("BeginLoop")
                .arg("label", "L")
                .arg("conditions", conditions("[]"))],
        ),
        None,
    );
    assert_eq!(unterminated.status, TestStatus::Error);
    assert!(unterminated.details.contains("LABEL_UNTERMINATED"));
    assert!(unterminated.records.is_empty());
}

#[test]
fn jumps_outside_the_test_are_errors() {
    let rogue = Plugin::new("Rogue", "").command("Jump", Vec::new(), |_, _| {
        Ok(Outcome::pass().jump_to(99))
    });
    let mut executor = executor_with(vec![rogue], ExecutorOptions::default());

    let report = executor.run_test(
        &test_case("T1", vec![Instruction::new("Jump"), set("x", "=", CtfValue::Int(1))]),
        None,
    );
    assert_eq!(report.status, TestStatus::Error);
    assert!(report.details.contains("EXECUTOR_JUMP_OUT_OF_RANGE"));
    assert_eq!(report.records.len(), 1);
}

fn get_ready(calls: Arc<AtomicUsize>, ready_on: usize) -> Plugin {
    Plugin::new("Ready", "")
        .command(
            "GetReady",
            vec![ParamSpec::optional("target", ParamType::String)],
            move |_, _| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if call >= ready_on {
                    Outcome::pass()
                } else {
                    Outcome::pending()
                })
            },
        )
        .verify_required("GetReady")
}

#[test]
fn verification_timeout_prefers_instruction_then_script() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut executor = executor_with(
        vec![get_ready(Arc::clone(&calls), usize::MAX)],
        ExecutorOptions::default(),
    );

    let own = executor.run_test(
        &test_case(
            "T1",
            vec![Instruction::new("GetReady").with_verify_timeout(1.0)],
        ),
        Some(3.0),
    );
    assert_eq!(own.status, TestStatus::Failed);
    assert_eq!(calls.swap(0, Ordering::SeqCst), 2);
    assert_eq!(own.records[0].details, "Timeout after 2 polls");

    executor.run_test(&test_case("T2", vec![Instruction::new("GetReady")]), Some(3.0));
    assert_eq!(calls.swap(0, Ordering::SeqCst), 6);

    executor.run_test(&test_case("T3", vec![Instruction::new("GetReady")]), None);
    assert_eq!(calls.load(Ordering::SeqCst), 8);
}

#[test]
fn instruction_wait_advances_engine_time() {
    let mut executor = executor();
    let before = executor.exec_time();
    let report = executor.run_test(
        &test_case("T1", vec![set("x", "=", CtfValue::Int(1)).with_wait(1.2)]),
        None,
    );
    assert_eq!(report.status, TestStatus::Passed);
    assert!((executor.exec_time() - before - 1.5).abs() < 1e-9);
    assert!((executor.context().exec_time - 1.5).abs() < 1e-9);
}

#[test]
fn fatal_failure_skips_remaining_tests() {
    let answers = Arc::new(ScriptedPrompt::new(["n", "y"]));
    let mut executor = executor_with(
        vec![user_io_plugin(answers.clone())],
        ExecutorOptions::default(),
    );

    let report = executor.run_script(&script(
        r#"{
  "test_number": "S6",
  "test_name": "fatal propagation",
  "tests": [
    {"case_number": "S6-1", "instructions": [
      {"instruction": "WaitForUserInput", "data": {"prompt": "Continue?"}},
      {"instruction": "SetUserVariable", "data": {"name": "after", "op": "=", "value": 1}}
    ]},
    {"case_number": "S6-2", "instructions": [
      {"instruction": "WaitForUserInput", "data": {}},
      {"instruction": "SetUserVariable", "data": {"name": "after", "op": "=", "value": 2}}
    ]}
  ]
}"#,
    ));

    assert_eq!(report.status, TestStatus::Aborted);
    assert!(report.aborted);
    assert_eq!(report.tests[0].status, TestStatus::Aborted);
    assert_eq!(report.tests[0].records.len(), 1);
    assert_eq!(report.tests[1].status, TestStatus::Skipped);
    assert!(report.tests[1].records.is_empty());
    assert_eq!(report.num_failed, 1);
    assert_eq!(answers.prompts().len(), 1);
    assert!(!executor.context().variables.contains("after"));
}

#[test]
fn end_test_on_fail_makes_every_failure_fatal() {
    let mut executor = executor_with(
        Vec::new(),
        ExecutorOptions {
            end_test_on_fail: true,
            ..ExecutorOptions::default()
        },
    );
    let report = executor.run_script(&script(
        r#"{
  "test_number": "E1",
  "tests": [
    {"case_number": "E1-1", "instructions": [
      {"instruction": "CheckUserVariable", "data": {"name": "ghost", "op": "==", "value": 1}},
      {"instruction": "SetUserVariable", "data": {"name": "x", "op": "=", "value": 1}}
    ]},
    {"case_number": "E1-2", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "x", "op": "=", "value": 2}}
    ]}
  ]
}"#,
    ));
    assert_eq!(report.status, TestStatus::Aborted);
    assert_eq!(report.tests[1].status, TestStatus::Skipped);
    assert!(!executor.context().variables.contains("x"));
}

#[test]
fn end_test_on_fail_aborts_on_unknown_instruction() {
    let mut executor = executor_with(
        Vec::new(),
        ExecutorOptions {
            end_test_on_fail: true,
            ..ExecutorOptions::default()
        },
    );
    let report = executor.run_script(&script(
        r#"{
  "test_number": "E2",
  "tests": [
    {"case_number": "E2-1", "instructions": [
      {"instruction": "SendCfsCommand", "data": {}},
      {"instruction": "SetUserVariable", "data": {"name": "a", "op": "=", "value": 1}}
    ]},
    {"case_number": "E2-2", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "a", "op": "=", "value": 2}}
    ]}
  ]
}"#,
    ));

    assert_eq!(test_statuses(&report), vec![TestStatus::Aborted, TestStatus::Skipped]);
    assert_eq!(statuses(&report.tests[0]), vec![InstructionStatus::Error]);
    assert!(!executor.context().variables.contains("a"));
}

fn failing_monitor() -> Plugin {
    Plugin::new("Monitor", "").continuous_check("always", |_| {
        Err(CtfError::new("LINK_DOWN", "telemetry link lost"))
    })
}

fn monitored_executor(plugins: Vec<Plugin>, options: ExecutorOptions) -> Executor {
    let mut registry = PluginRegistry::new();
    registry.register(variable_plugin(None)).expect("register");
    for plugin in plugins {
        registry.register(plugin).expect("register");
    }
    let time = MonitoringTimeManager::new(Box::new(SteppedTimeManager::new(0.5)))
        .with_checks(registry.continuous_checks());
    Executor::new(registry, Box::new(time), EngineContext::default(), options)
}

#[test]
fn hook_failure_on_fatal_instruction_aborts_the_script() {
    let answers = Arc::new(ScriptedPrompt::new(["y", "y"]));
    let mut executor = monitored_executor(
        vec![user_io_plugin(answers.clone()), failing_monitor()],
        ExecutorOptions::default(),
    );

    let report = executor.run_script(&script(
        r#"{
  "test_number": "H1",
  "tests": [
    {"case_number": "H1-1", "instructions": [
      {"instruction": "WaitForUserInput", "data": {}}
    ]},
    {"case_number": "H1-2", "instructions": [
      {"instruction": "WaitForUserInput", "data": {}}
    ]}
  ]
}"#,
    ));

    assert_eq!(test_statuses(&report), vec![TestStatus::Aborted, TestStatus::Skipped]);
    assert!(report.tests[0].records[0]
        .details
        .contains("CONTINUOUS_CHECK_FAILED"));
    assert!(answers.prompts().is_empty());
}

#[test]
fn hook_failure_under_end_test_on_fail_aborts_the_script() {
    let mut executor = monitored_executor(
        vec![failing_monitor()],
        ExecutorOptions {
            end_test_on_fail: true,
            ..ExecutorOptions::default()
        },
    );

    let report = executor.run_script(&script(
        r#"{
  "test_number": "H2",
  "tests": [
    {"case_number": "H2-1", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "a", "op": "=", "value": 1}, "wait": 1}
    ]},
    {"case_number": "H2-2", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "a", "op": "=", "value": 2}}
    ]}
  ]
}"#,
    ));

    assert_eq!(test_statuses(&report), vec![TestStatus::Aborted, TestStatus::Skipped]);
    assert!(!executor.context().variables.contains("a"));
}

#[test]
fn condition_from_continuous_check_ends_only_the_test() {
    let tripped = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&tripped);
    let monitor = Plugin::new("Monitor", "").continuous_check("x_small", move |ctx| {
        if !matches!(ctx.variables.get("x"), Some(CtfValue::Int(x)) if *x > 5) {
            return Ok(());
        }
        seen.fetch_add(1, Ordering::SeqCst);
        ctx.variables.insert("x", CtfValue::Int(0));
        Err(CtfError::new("X_LARGE", "x exceeded 5"))
    });

    let mut registry = PluginRegistry::new();
    registry.register(variable_plugin(None)).expect("register");
    registry.register(monitor).expect("register");
    let time = MonitoringTimeManager::new(Box::new(SteppedTimeManager::new(0.5)))
        .with_checks(registry.continuous_checks());
    let mut executor = Executor::new(
        registry,
        Box::new(time),
        EngineContext::default(),
        ExecutorOptions::default(),
    );

    let report = executor.run_script(&script(
        r#"{
  "test_number": "C1",
  "tests": [
    {"case_number": "C1-1", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "x", "op": "=", "value": 9, "type": "int"}},
      {"instruction": "SetUserVariable", "data": {"name": "y", "op": "=", "value": 1, "type": "int"}},
      {"instruction": "SetUserVariable", "data": {"name": "z", "op": "=", "value": 1, "type": "int"}}
    ]},
    {"case_number": "C1-2", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "x", "op": "=", "value": 0, "type": "int"}, "wait": 0},
      {"instruction": "SetUserVariable", "data": {"name": "done", "op": "=", "value": true, "type": "boolean"}}
    ]}
  ]
}"#,
    ));

    let first = &report.tests[0];
    assert_eq!(first.status, TestStatus::Failed);
    assert_eq!(
        statuses(first),
        vec![InstructionStatus::Passed, InstructionStatus::Failed]
    );
    assert!(first.records[1].details.contains("CONTINUOUS_CHECK_FAILED"));
    assert!(!executor.context().variables.contains("y"));

    let second = &report.tests[1];
    assert_eq!(
        statuses(second),
        vec![InstructionStatus::Passed, InstructionStatus::Passed]
    );
    assert_eq!(second.status, TestStatus::Passed);
    assert_eq!(report.status, TestStatus::Failed);
    assert!(!report.aborted);
    assert_eq!(executor.context().variables.get("done"), Some(&CtfValue::Bool(true)));
    assert_eq!(tripped.load(Ordering::SeqCst), 1);
}

#[test]
fn rejected_tests_are_reported_as_errors() {
    let mut executor = executor();
    let report = executor.run_script(&script(
        r#"{
  "test_number": "R1",
  "tests": [
    {"case_number": "R1-1", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "x", "op": "=", "value": 1}}
    ]},
    {"case_number": "R1-2", "instructions": [
      {"function": "NotDefined", "params": {}}
    ]}
  ]
}"#,
    ));

    assert_eq!(report.tests.len(), 2);
    assert_eq!(report.tests[0].status, TestStatus::Passed);
    assert_eq!(report.tests[1].test_number, "R1-2");
    assert_eq!(report.tests[1].status, TestStatus::Error);
    assert_eq!(report.num_passed, 1);
    assert_eq!(report.num_failed, 1);
    assert_eq!(report.status, TestStatus::Failed);
}

#[derive(Default)]
struct Recorder {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.updates
            .lock()
            .expect("recorder lock")
            .iter()
            .map(|update| {
                let encoded = serde_json::to_value(update).expect("update should encode");
                encoded["event"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }
}

impl StatusListener for Recorder {
    fn on_status(&self, update: &StatusUpdate) {
        self.updates
            .lock()
            .expect("recorder lock")
            .push(update.clone());
    }
}

#[test]
fn status_listener_follows_every_step() {
    let recorder = Arc::new(Recorder::default());
    let mut executor = executor().with_status_listener(recorder.clone());

    let report = executor.run_script(&script(
        r#"{
  "test_number": "ST1",
  "tests": [
    {"case_number": "ST1-1", "instructions": [
      {"instruction": "SetUserVariable", "data": {"name": "x", "op": "=", "value": 1}, "wait": 0.5},
      {"instruction": "SetUserVariable", "data": {"name": "x", "op": "+", "value": 1}, "disabled": true},
      {"instruction": "CheckUserVariable", "data": {"name": "x", "op": "==", "value": 2}}
    ]}
  ]
}"#,
    ));
    assert_eq!(report.status, TestStatus::Failed);

    assert_eq!(
        recorder.events(),
        vec![
            "script_started",
            "test_started",
            "instruction_active",
            "instruction_finished",
            "instruction_finished",
            "instruction_active",
            "instruction_finished",
            "test_finished",
            "script_finished",
        ]
    );

    let updates = recorder.updates.lock().expect("recorder lock");
    assert_eq!(
        updates[3],
        StatusUpdate::InstructionFinished {
            test_number: "ST1-1".to_string(),
            index: 0,
            instruction: "SetUserVariable".to_string(),
            status: InstructionStatus::Passed,
            details: String::new(),
            exec_time: 0.5,
        }
    );
    assert!(matches!(
        &updates[4],
        StatusUpdate::InstructionFinished { status: InstructionStatus::Disabled, index: 1, .. }
    ));
    assert!(matches!(
        &updates[6],
        StatusUpdate::InstructionFinished { status: InstructionStatus::Failed, index: 2, .. }
    ));
    assert!(matches!(
        &updates[8],
        StatusUpdate::ScriptFinished { status: TestStatus::Failed, num_passed: 0, num_failed: 1, .. }
    ));
}
