use std::io::Write;
use std::sync::Mutex;

use ctf_core::{InstructionStatus, TestStatus};
use serde::Serialize;

/// One progress event of a run, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusUpdate {
    ScriptStarted {
        test_number: String,
        test_name: String,
        num_tests: usize,
        exec_time: f64,
    },
    TestStarted {
        test_number: String,
        description: String,
        num_instructions: usize,
        exec_time: f64,
    },
    /// An instruction has started running and has no verdict yet.
    InstructionActive {
        test_number: String,
        index: usize,
        instruction: String,
        exec_time: f64,
    },
    InstructionFinished {
        test_number: String,
        index: usize,
        instruction: String,
        status: InstructionStatus,
        details: String,
        exec_time: f64,
    },
    TestFinished {
        test_number: String,
        status: TestStatus,
        details: String,
        exec_time: f64,
    },
    ScriptFinished {
        test_number: String,
        status: TestStatus,
        num_passed: usize,
        num_failed: usize,
        exec_time: f64,
    },
}

/// Receives status updates while scripts run. Listeners must not block:
/// they are called inline from the executor.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, update: &StatusUpdate);
}

/// Writes each update as one compact JSON object per line. A failed write
/// is logged and disables the listener.
pub struct JsonLinesStatus<W: Write + Send> {
    out: Mutex<Option<W>>,
}

impl<W: Write + Send> JsonLinesStatus<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(Some(out)),
        }
    }

    /// Returns the writer unless a failed write dropped it.
    pub fn into_inner(self) -> Option<W> {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> StatusListener for JsonLinesStatus<W> {
    fn on_status(&self, update: &StatusUpdate) {
        let mut guard = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(out) = guard.as_mut() else {
            return;
        };
        let written = serde_json::to_writer(&mut *out, update)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(error) = written {
            log::error!("Cannot write status update: {}. Disabling status updates.", error);
            *guard = None;
        }
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn updates_are_written_as_json_lines() {
        let listener = JsonLinesStatus::new(Vec::new());
        listener.on_status(&StatusUpdate::TestStarted {
            test_number: "S-1-1".to_string(),
            description: String::new(),
            num_instructions: 2,
            exec_time: 0.0,
        });
        listener.on_status(&StatusUpdate::InstructionFinished {
            test_number: "S-1-1".to_string(),
            index: 0,
            instruction: "SetUserVariable".to_string(),
            status: InstructionStatus::Passed,
            details: String::new(),
            exec_time: 0.5,
        });

        let bytes = listener.into_inner().expect("writer should survive");
        let text = String::from_utf8(bytes).expect("utf8");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "test_started");
        assert_eq!(lines[0]["num_instructions"], 2);
        assert_eq!(lines[1]["event"], "instruction_finished");
        assert_eq!(lines[1]["status"], "passed");
        assert_eq!(lines[1]["exec_time"], 0.5);
    }

    #[test]
    fn failed_write_disables_the_listener() {
        let listener = JsonLinesStatus::new(Broken);
        listener.on_status(&StatusUpdate::ScriptStarted {
            test_number: "S".to_string(),
            test_name: String::new(),
            num_tests: 0,
            exec_time: 0.0,
        });
        assert!(listener.into_inner().is_none());
    }
}
