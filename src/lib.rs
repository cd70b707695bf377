pub mod agents;
pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod discovery;
pub mod errors;
pub mod health;
pub mod models;
pub mod notifications;
pub mod pipeline;
pub mod queue;
pub mod resilience;
