use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    UnixSocket,
    NamedPipe,
    ProcessId,
}

/// How to reach a live agent process. Derived from discovery, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub connector_type: ConnectorType,
    pub process_id: Option<u32>,
    pub socket_path: Option<PathBuf>,
    pub pipe_name: Option<String>,
    pub timeout_seconds: u64,
}

/// A live agent process as seen by discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub session_id: Option<String>,
    pub working_directory: PathBuf,
    pub socket_path: Option<PathBuf>,
    pub pipe_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

impl ProcessInfo {
    /// Socket first, then pipe, then the bare pid.
    pub fn connection(&self, timeout_seconds: u64) -> ConnectionDescriptor {
        let connector_type = if self.socket_path.is_some() {
            ConnectorType::UnixSocket
        } else if self.pipe_name.is_some() {
            ConnectorType::NamedPipe
        } else {
            ConnectorType::ProcessId
        };
        ConnectionDescriptor {
            connector_type,
            process_id: Some(self.pid),
            socket_path: self.socket_path.clone(),
            pipe_name: self.pipe_name.clone(),
            timeout_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(socket: Option<&str>, pipe: Option<&str>) -> ProcessInfo {
        ProcessInfo {
            pid: 42,
            session_id: None,
            working_directory: PathBuf::from("/repo"),
            socket_path: socket.map(PathBuf::from),
            pipe_name: pipe.map(String::from),
            start_time: None,
        }
    }

    #[test]
    fn test_socket_preferred() {
        let desc = process(Some("/tmp/claude-42.sock"), Some("pipe")).connection(30);
        assert_eq!(desc.connector_type, ConnectorType::UnixSocket);
        assert_eq!(desc.timeout_seconds, 30);
    }

    #[test]
    fn test_pipe_then_pid() {
        assert_eq!(process(None, Some(r"\\.\pipe\claude-42")).connection(5).connector_type, ConnectorType::NamedPipe);
        let bare = process(None, None).connection(5);
        assert_eq!(bare.connector_type, ConnectorType::ProcessId);
        assert_eq!(bare.process_id, Some(42));
    }
}
