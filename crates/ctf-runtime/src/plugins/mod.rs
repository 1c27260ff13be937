pub mod control_flow;
pub mod user_io;
pub mod variable;

pub use control_flow::{control_flow_plugin, CONTROL_FLOW_PLUGIN};
pub use user_io::{user_io_plugin, PromptSource, ScriptedPrompt, StdinPrompt, USER_IO_PLUGIN};
pub use variable::{variable_plugin, VARIABLE_PLUGIN};
