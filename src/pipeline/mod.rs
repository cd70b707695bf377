pub mod execution;
pub mod orchestrator;
pub mod phase;
pub mod scheduler;
pub mod state;

pub use execution::{ExecutionPipeline, ExecutionSettings, PipelineDeps};
pub use orchestrator::{Collaborators, Orchestrator, SyncReport};
pub use scheduler::{JobScheduler, SchedulerSettings};
pub use state::{ExecutionStage, JobRequest, OrchestratorState};
