use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::agents::CliAgentConnector;
use crate::cli::commands::RunArgs;
use crate::cli::{escalation_channel, load_settings};
use crate::db::Database;
use crate::errors::OrchestraError;
use crate::models::{Agent, JobState, TaskPriority};
use crate::notifications::{LogNotifier, ProgressTracker};
use crate::pipeline::{Collaborators, Orchestrator};

const LOCAL_AGENT_ID: &str = "local";

/// Run one command through the full pipeline against a throwaway store.
pub async fn handle_run(args: RunArgs, config: Option<&str>) -> Result<(), OrchestraError> {
    let mut settings = load_settings(config).await?;
    if let Some(secs) = args.timeout {
        settings.execution.timeout = Duration::from_secs(secs);
    }
    let priority = TaskPriority::parse(&args.priority)
        .ok_or_else(|| OrchestraError::Validation(format!("unknown priority '{}'", args.priority)))?;

    let repo = Path::new(&args.repo);
    let repo = repo
        .canonicalize()
        .map_err(|e| OrchestraError::RepositoryAccess(format!("{}: {}", repo.display(), e)))?;
    let repo = repo.to_string_lossy().to_string();

    let store = Arc::new(Database::in_memory()?);
    let orchestrator = Orchestrator::new(
        &settings,
        Collaborators {
            store: store.clone(),
            connector: Arc::new(CliAgentConnector::new(settings.connector.clone())),
            notifier: Arc::new(LogNotifier),
            escalation: escalation_channel(&settings),
            progress: Arc::new(ProgressTracker::new()),
            discovery: None,
        },
    );

    orchestrator
        .register_agent(Agent::new(LOCAL_AGENT_ID, "local agent", &settings.connector.executable, &repo))
        .await;
    let task_id = orchestrator.enqueue(&args.command, &repo, priority).await?;
    let task = orchestrator
        .assign_next(LOCAL_AGENT_ID)
        .await
        .ok_or_else(|| OrchestraError::AgentUnavailable(LOCAL_AGENT_ID.to_string()))?;
    info!(task_id = %task.id, "Running task");

    let record = orchestrator
        .scheduler()
        .run_inline(&task.id, LOCAL_AGENT_ID)
        .await
        .ok_or_else(|| OrchestraError::Unexpected("job record missing after run".into()))?;
    let result = store.results_for_task(&task_id)?.pop();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "task_id": task_id,
            "job": record,
            "result": result,
        }))?);
    } else if let Some(result) = &result {
        println!("{}", result.output);
    }

    match record.state {
        JobState::Succeeded => Ok(()),
        _ => Err(OrchestraError::CommandExecution(
            record.last_error.unwrap_or_else(|| format!("task {} did not complete", task_id)),
        )),
    }
}
