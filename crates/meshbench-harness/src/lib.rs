//! Meshbench Harness - Challenge Evaluation Engine
//!
//! Drives candidate handler source through a scripted message protocol
//! inside a sandboxed executor, records the interaction trace, and
//! scores it against the level's rubric:
//! - `sandbox`: process-isolated execution with hard deadlines
//! - `simulator`: fixture delivery and the level-5 relay loop
//! - `scoring`: pure rubric evaluation over finalized traces
//! - `engine`: the orchestrator producing result records
//! - `model` / `challenge`: the generation boundary and retry loop

pub mod challenge;
pub mod engine;
pub mod exec;
pub mod fakes;
pub mod model;
pub mod policy;
pub mod protocol;
pub mod report;
pub mod sandbox;
pub mod scoring;
pub mod simulator;

// Re-export key types
pub use challenge::{level_prompt, ChallengeConfig, ChallengeRunner};
pub use engine::{ChallengeEngine, EngineConfig};
pub use exec::{run_mediated, CommandOutcome, MediatedExec};
pub use model::{extract_code, ModelClient, OllamaClient};
pub use policy::{ExecPolicy, SandboxPolicy};
pub use protocol::{HandlerOp, HostOp};
pub use report::{append_result, load_results};
pub use sandbox::{
    CommandRecord, DeliverOutcome, HandlerFault, HandlerInstance, HandlerSandbox, Launcher,
    LoadResult, ProcessSandbox,
};
pub use scoring::score;
pub use simulator::{ProtocolSimulator, SimulatorConfig, SourceSet};
