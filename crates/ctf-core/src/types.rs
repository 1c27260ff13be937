use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::CtfValue;

pub const DEFAULT_FUNCTION_CALL_WAIT: f64 = 1.0;

/// Argument kinds advertised to external tooling. Only the argument count
/// is checked at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    CmdMid,
    CmdCode,
    CmdArg,
    TlmMid,
    Comparison,
    String,
    Boolean,
    Number,
    Ignore,
    Other,
}

impl ParamType {
    pub fn is_array(self) -> bool {
        matches!(self, Self::CmdArg | Self::Comparison)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CmdMid => "cmd_mid",
            Self::CmdCode => "cmd_code",
            Self::CmdArg => "cmd_arg",
            Self::TlmMid => "tlm_mid",
            Self::Comparison => "comparison",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::Ignore => "ignore",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionDoc {
    pub instruction: String,
    #[serde(default)]
    pub data: BTreeMap<String, CtfValue>,
    #[serde(default)]
    pub wait: f64,
    #[serde(default, alias = "timeout")]
    pub verify_timeout: Option<f64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDoc {
    pub function: String,
    #[serde(default)]
    pub params: BTreeMap<String, CtfValue>,
    #[serde(default)]
    pub wait: Option<f64>,
    #[serde(default)]
    pub disabled: bool,
}

/// One entry of an instruction list before function inlining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Instruction(InstructionDoc),
    Call(FunctionCallDoc),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDoc {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub varlist: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<ScriptStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDoc {
    #[serde(alias = "test_number")]
    pub case_number: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: Vec<ScriptStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptOptions {
    #[serde(default, alias = "verif_timeout")]
    pub verify_timeout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub test_number: String,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub requirements: BTreeMap<String, CtfValue>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub test_setup: String,
    #[serde(default)]
    pub ctf_options: ScriptOptions,
    #[serde(default)]
    pub import: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDoc>,
    #[serde(default)]
    pub tests: Vec<TestCaseDoc>,
}

/// An instruction after function calls have been inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, CtfValue>,
    #[serde(default)]
    pub wait: f64,
    #[serde(default)]
    pub verify_timeout: Option<f64>,
    #[serde(default)]
    pub disabled: bool,
}

impl Instruction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
            wait: 0.0,
            verify_timeout: None,
            disabled: false,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<CtfValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_wait(mut self, seconds: f64) -> Self {
        self.wait = seconds;
        self
    }

    pub fn with_verify_timeout(mut self, seconds: f64) -> Self {
        self.verify_timeout = Some(seconds);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub test_number: String,
    pub description: String,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptHeader {
    pub test_number: String,
    pub test_name: String,
    pub requirements: Vec<String>,
    pub description: String,
    pub owner: String,
    pub test_setup: String,
    pub verify_timeout: Option<f64>,
    pub source_path: Option<String>,
}

/// A test that the loader could not resolve; it is reported, not run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedTest {
    pub test_number: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedScript {
    pub header: ScriptHeader,
    pub tests: Vec<TestCase>,
    pub rejected: Vec<RejectedTest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionStatus {
    Passed,
    Failed,
    Error,
    Disabled,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    /// A fatal failure ended the test and the rest of the script.
    Aborted,
    /// The test could not run (rejected by the loader or label resolver,
    /// or stopped by the execution guard).
    Error,
    /// Never started because an earlier test aborted the script.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub index: usize,
    pub name: String,
    pub status: InstructionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub test_number: String,
    pub description: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    pub records: Vec<InstructionRecord>,
    pub num_ran: usize,
    pub num_skipped: usize,
}

impl TestReport {
    pub fn new(test_number: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            test_number: test_number.into(),
            description: description.into(),
            status: TestStatus::Passed,
            details: String::new(),
            records: Vec::new(),
            num_ran: 0,
            num_skipped: 0,
        }
    }

    pub fn with_status(mut self, status: TestStatus, details: impl Into<String>) -> Self {
        self.status = status;
        self.details = details.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptReport {
    pub test_number: String,
    pub test_name: String,
    pub requirements: Vec<String>,
    pub source_path: Option<String>,
    pub status: TestStatus,
    pub tests: Vec<TestReport>,
    /// Engine time consumed by the script, in seconds.
    pub elapsed: f64,
    pub num_passed: usize,
    pub num_failed: usize,
    pub aborted: bool,
}

impl ScriptReport {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}
