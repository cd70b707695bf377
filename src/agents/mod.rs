pub mod connector;
pub mod directory;

pub use connector::{AgentConnector, AgentResponse, CliAgentConnector, CliConnectorSettings};
pub use directory::AgentDirectory;
