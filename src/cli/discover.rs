use crate::cli::commands::DiscoverArgs;
use crate::cli::load_settings;
use crate::discovery::ProcessDiscovery;
use crate::errors::OrchestraError;

pub async fn handle_discover(args: DiscoverArgs, config: Option<&str>) -> Result<(), OrchestraError> {
    let mut settings = load_settings(config).await?;
    if let Some(exe) = args.executable {
        settings.discovery.executable = exe;
    }
    let discovery = ProcessDiscovery::with_default_inspector(settings.discovery);

    if let Some(session) = args.session {
        let Some(params) = discovery.get_connection_params_for_agent(&session).await else {
            return Err(OrchestraError::NotFound(format!("no live process for session {}", session)));
        };
        if args.json {
            println!("{}", serde_json::to_string_pretty(&params)?);
        } else {
            println!("session:   {}", session);
            println!("connector: {:?}", params.connector_type);
            if let Some(pid) = params.process_id {
                println!("pid:       {}", pid);
            }
            if let Some(socket) = &params.socket_path {
                println!("socket:    {}", socket.display());
            }
            if let Some(pipe) = &params.pipe_name {
                println!("pipe:      {}", pipe);
            }
        }
        return Ok(());
    }

    let processes = discovery.discover_agent_processes().await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&processes)?);
        return Ok(());
    }
    if processes.is_empty() {
        println!("No {} processes found", discovery.settings().executable);
        return Ok(());
    }
    println!("{:<8} {:<38} {}", "PID", "SESSION", "DIRECTORY");
    for p in &processes {
        println!(
            "{:<8} {:<38} {}",
            p.pid,
            p.session_id.as_deref().unwrap_or("-"),
            p.working_directory.display()
        );
    }
    Ok(())
}
