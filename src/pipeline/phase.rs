use super::state::ExecutionStage;

pub struct StageDefinition {
    pub stage: ExecutionStage,
    pub display_name: &'static str,
    /// Progress reported once the stage completes.
    pub progress: u8,
}

pub static STAGES: &[StageDefinition] = &[
    StageDefinition {
        stage: ExecutionStage::Validate,
        display_name: "Validating task",
        progress: 10,
    },
    StageDefinition {
        stage: ExecutionStage::AcquireLock,
        display_name: "Agent locked",
        progress: 20,
    },
    StageDefinition {
        stage: ExecutionStage::InitTracking,
        display_name: "Tracking started",
        progress: 30,
    },
    StageDefinition {
        stage: ExecutionStage::PrepareEnvironment,
        display_name: "Repository ready",
        progress: 40,
    },
    StageDefinition {
        stage: ExecutionStage::Execute,
        display_name: "Agent finished",
        progress: 80,
    },
    StageDefinition {
        stage: ExecutionStage::ProcessResult,
        display_name: "Result recorded",
        progress: 90,
    },
    StageDefinition {
        stage: ExecutionStage::UpdateStatus,
        display_name: "Status updated",
        progress: 95,
    },
    StageDefinition {
        stage: ExecutionStage::Cleanup,
        display_name: "Done",
        progress: 100,
    },
];

pub fn definition(stage: ExecutionStage) -> &'static StageDefinition {
    STAGES
        .iter()
        .find(|d| d.stage == stage)
        .unwrap_or(&STAGES[STAGES.len() - 1])
}
