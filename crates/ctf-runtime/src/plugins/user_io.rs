use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use ctf_core::{CtfError, ParamType};

use crate::registry::{Outcome, ParamSpec, Plugin};

pub const USER_IO_PLUGIN: &str = "UserIOPlugin";
pub const WAIT_FOR_USER_INPUT: &str = "WaitForUserInput";

/// Where operator answers come from.
pub trait PromptSource: Send + Sync {
    fn read_line(&self, prompt: &str) -> Result<String, CtfError>;
}

/// Prompts on stdout and reads one line from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompt;

impl PromptSource for StdinPrompt {
    fn read_line(&self, prompt: &str) -> Result<String, CtfError> {
        let mut stdout = io::stdout();
        write!(stdout, "{} ", prompt)
            .and_then(|_| stdout.flush())
            .map_err(|error| io_error("write prompt", error))?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|error| io_error("read answer", error))?;
        Ok(line)
    }
}

fn io_error(action: &str, error: io::Error) -> CtfError {
    CtfError::new("USER_IO_FAILED", format!("Failed to {}: {}", action, error))
}

/// Answers queued up front; an exhausted queue is an error. Prompts are kept
/// for inspection.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl PromptSource for ScriptedPrompt {
    fn read_line(&self, prompt: &str) -> Result<String, CtfError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut answers = self
            .answers
            .lock()
            .map_err(|_| CtfError::new("USER_IO_FAILED", "Answer queue is poisoned."))?;
        answers
            .pop_front()
            .ok_or_else(|| CtfError::new("USER_IO_EXHAUSTED", "No scripted answer left."))
    }
}

/// `WaitForUserInput` asks the operator to confirm; anything but `Y` fails
/// and ends the script.
pub fn user_io_plugin(prompt: Arc<dyn PromptSource>) -> Plugin {
    Plugin::new(USER_IO_PLUGIN, "CTF UserIO Plugin")
        .command(
            WAIT_FOR_USER_INPUT,
            vec![ParamSpec::optional("prompt", ParamType::String)],
            move |_, args| {
                let text = args.opt_str("prompt")?.unwrap_or_default();
                log::info!("Waiting for user input: {}", text);
                let answer = prompt.read_line(&format!("{} (Y/N):", text))?;
                let confirmed = answer.trim().eq_ignore_ascii_case("y");
                if confirmed {
                    log::info!("User confirmed");
                } else {
                    log::error!("User answered {:?}", answer.trim());
                }
                Ok(Outcome::from_bool(confirmed))
            },
        )
        .fatal_on_fail(WAIT_FOR_USER_INPUT)
}

#[cfg(test)]
mod user_io_tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::context::EngineContext;
    use ctf_core::CtfValue;

    fn ask(plugin: &Plugin, prompt: Option<&str>) -> Result<Outcome, CtfError> {
        let mut data = BTreeMap::new();
        if let Some(prompt) = prompt {
            data.insert("prompt".to_string(), CtfValue::from(prompt));
        }
        plugin
            .command_spec(WAIT_FOR_USER_INPUT)
            .expect("command should exist")
            .invoke(&mut EngineContext::default(), &data)
    }

    #[test]
    fn only_yes_confirms() {
        let answers = Arc::new(ScriptedPrompt::new(["y\n", "Y", "n", "yes"]));
        let plugin = user_io_plugin(answers.clone());

        assert!(ask(&plugin, Some("Power on?")).expect("answer").passed());
        assert!(ask(&plugin, None).expect("answer").passed());
        assert!(!ask(&plugin, None).expect("answer").passed());
        assert!(!ask(&plugin, None).expect("answer").passed());
        assert!(plugin.is_fatal_on_fail(WAIT_FOR_USER_INPUT));
        assert_eq!(answers.prompts()[0], "Power on? (Y/N):");
    }

    #[test]
    fn exhausted_answers_are_an_error() {
        let plugin = user_io_plugin(Arc::new(ScriptedPrompt::new(Vec::<String>::new())));
        let error = ask(&plugin, None).expect_err("no answers");
        assert_eq!(error.code, "USER_IO_EXHAUSTED");
    }
}
