pub mod agents;
pub mod health;
pub mod jobs;
pub mod processes;
pub mod state;
pub mod tasks;
