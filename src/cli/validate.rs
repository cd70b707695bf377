use std::path::PathBuf;

use crate::cli::commands::ValidateArgs;
use crate::config::{parse_config, Settings};
use crate::errors::OrchestraError;

pub async fn handle_validate(args: ValidateArgs) -> Result<(), OrchestraError> {
    let path = PathBuf::from(&args.config);
    let config = parse_config(&path).await?;
    let settings = Settings::from_config(&config);

    println!("Configuration is valid: {}", args.config);
    println!("  poll interval:     {:?}", settings.poll_interval);
    println!("  execution timeout: {:?}", settings.execution.timeout);
    println!("  agent executable:  {}", settings.connector.executable);
    println!("  database:          {}", settings.database_path.display());
    println!("  listen:            {}:{}", settings.server_host, settings.server_port);
    if let Some(url) = &settings.escalation_webhook {
        println!("  escalation:        {}", url);
    }
    Ok(())
}
