pub mod agents;
pub mod connection;
pub mod schema;
pub mod store;
pub mod tasks;

pub use connection::Database;
pub use store::TaskStore;
