mod helpers;

pub mod context;
pub mod executor;
pub mod labels;
pub mod plugins;
pub mod registry;
pub mod status;
pub mod telemetry;
pub mod time;
pub mod variables;
pub mod verify;

pub use context::{EngineContext, VerificationStage};
pub use executor::{Executor, ExecutorOptions, DEFAULT_VERIFY_TIMEOUT, STEP_GUARD};
pub use labels::{resolve_labels, LabelMap};
pub use registry::{
    CommandArgs, CommandSpec, ContinuousCheck, Flow, Outcome, ParamSpec, Plugin, PluginInfo,
    PluginRegistry, Status,
};
pub use status::{JsonLinesStatus, StatusListener, StatusUpdate};
pub use telemetry::{TelemetryCache, TelemetryLink, TelemetryPacket, TelemetrySource};
pub use time::{
    MonitoringTimeManager, OsTimeManager, SteppedTimeManager, TimeManager, DEFAULT_POLL_PERIOD,
    MAX_WAIT_SECONDS,
};
pub use variables::{AssignOp, VariableStore};
pub use verify::{run_verification, Verification};
