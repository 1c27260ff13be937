use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("ctf-cli-smoke-{}-{}", name, nanos));
    fs::create_dir_all(&dir).expect("temp dir should be created");
    dir
}

fn write_file(path: &Path, content: &str) {
    fs::write(path, content).expect("file should be written");
}

#[test]
fn run_reports_each_script_and_exit_code() {
    let bin = env!("CARGO_BIN_EXE_ctf-cli");
    let root = temp_dir("run");
    let scripts = root.join("scripts");
    fs::create_dir_all(&scripts).expect("scripts dir should be created");

    write_file(
        &root.join("ctf.json"),
        r#"{"core": {"time_manager": "stepped", "ctf_verification_poll_period": 0.25},
            "test_variable": {"limit": 3}}"#,
    );
    write_file(
        &root.join("library.json"),
        r#"{"test_number": "LIB", "functions": {"bump": {
            "varlist": ["counter"],
            "instructions": [
              {"instruction": "SetUserVariable",
               "data": {"variable_name": "counter", "operator": "+", "value": 1, "variable_type": "int"}}
            ]}}}"#,
    );
    let script = format!(
        r#"{{
  "test_number": "SMOKE-1",
  "test_name": "loop through a library function",
  "import": {{"{}": ["bump"]}},
  "tests": [{{"case_number": "SMOKE-1-1", "instructions": [
    {{"instruction": "SetUserVariable",
      "data": {{"variable_name": "n", "operator": "=", "value": 0, "variable_type": "int"}}}},
    {{"instruction": "BeginLoop",
      "data": {{"label": "L", "conditions": [{{"variable": "n", "compare": "<", "value": "$limit$"}}]}}}},
    {{"function": "bump", "params": {{"counter": "n"}}, "wait": 0}},
    {{"instruction": "EndLoop", "data": {{"label": "L"}}}},
    {{"instruction": "CheckUserVariable",
      "data": {{"variable_name": "n", "operator": "==", "value": 3}}}}
  ]}}]
}}"#,
        root.join("library.json").display()
    );
    write_file(&scripts.join("smoke.json"), &script);

    let output = Command::new(bin)
        .arg("run")
        .arg(&scripts)
        .arg("--config")
        .arg(root.join("ctf.json"))
        .arg("--log-level")
        .arg("warn")
        .output()
        .expect("cli should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        stdout,
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("SCRIPT:SMOKE-1|PASSED|1/1"));
    assert!(stdout.contains("RESULT:PASSED"));
}

#[test]
fn bad_config_prints_an_error_result() {
    let bin = env!("CARGO_BIN_EXE_ctf-cli");
    let root = temp_dir("bad-config");
    write_file(
        &root.join("ctf.json"),
        r#"{"core": {"ctf_verification_poll_period": -1}}"#,
    );
    write_file(&root.join("script.json"), r#"{"test_number": "X", "tests": []}"#);

    let output = Command::new(bin)
        .arg("run")
        .arg(root.join("script.json"))
        .arg("--config")
        .arg(root.join("ctf.json"))
        .output()
        .expect("cli should execute");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RESULT:ERROR"));
    assert!(stdout.contains("ERROR_CODE:CLI_CONFIG_INVALID"));
}
