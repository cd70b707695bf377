pub mod agent;
pub mod task;
pub mod connection;
pub mod job;

pub use agent::*;
pub use task::*;
pub use connection::*;
pub use job::*;
