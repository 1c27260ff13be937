use serde::{Deserialize, Serialize};

use crate::labels::LabelMap;
use crate::variables::VariableStore;

/// Which poll of a verification is running, so handlers can vary their
/// behaviour on the first and last attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    #[default]
    None,
    First,
    Polling,
    Last,
}

/// Run state shared with every handler. Handlers may read the instruction
/// index but only the executor moves it.
#[derive(Debug, Default)]
pub struct EngineContext {
    pub variables: VariableStore,
    pub labels: LabelMap,
    pub current_instruction_index: usize,
    pub verification_stage: VerificationStage,
    /// Engine time in seconds, as last reported by the time manager.
    pub exec_time: f64,
}

impl EngineContext {
    pub fn new(variables: VariableStore) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }
}
