pub mod inspector;
pub mod session;

pub use inspector::{default_inspector, ProcessInspector, RawProcess};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{ConnectionDescriptor, ProcessInfo};

pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub executable: String,
    /// Where the agent keeps per-project session transcripts.
    pub projects_dir: PathBuf,
    /// Where agents create their control sockets.
    pub runtime_dir: PathBuf,
    pub cache_ttl: Duration,
    pub connection_timeout_secs: u64,
    pub sync_interval: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        let projects_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude")
            .join("projects");
        Self {
            executable: crate::agents::connector::DEFAULT_AGENT_EXECUTABLE.to_string(),
            projects_dir,
            runtime_dir: dirs::runtime_dir().unwrap_or_else(std::env::temp_dir),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
        }
    }
}

struct CachedScan {
    taken_at: Instant,
    processes: Vec<ProcessInfo>,
}

/// Finds running agent processes and how to talk to them.
///
/// Results are cached for `cache_ttl`; a failed scan is never cached.
pub struct ProcessDiscovery {
    inspector: Arc<dyn ProcessInspector>,
    settings: DiscoverySettings,
    cache: Mutex<Option<CachedScan>>,
}

impl ProcessDiscovery {
    pub fn new(inspector: Arc<dyn ProcessInspector>, settings: DiscoverySettings) -> Self {
        Self {
            inspector,
            settings,
            cache: Mutex::new(None),
        }
    }

    pub fn with_default_inspector(settings: DiscoverySettings) -> Self {
        Self::new(Arc::from(default_inspector()), settings)
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    pub async fn discover_agent_processes(&self) -> Vec<ProcessInfo> {
        if let Some(cached) = self.cached() {
            debug!(count = cached.len(), "Process discovery served from cache");
            return cached;
        }

        let raw = match self.inspector.list_processes(&self.settings.executable).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(executable = %self.settings.executable, error = %e, "Process scan failed");
                return Vec::new();
            }
        };

        let settings = self.settings.clone();
        let described = tokio::task::spawn_blocking(move || {
            raw.into_iter().map(|p| describe(&settings, p)).collect::<Vec<_>>()
        })
        .await;
        let processes = match described {
            Ok(processes) => processes,
            Err(e) => {
                warn!(error = %e, "Process enrichment panicked");
                return Vec::new();
            }
        };
        info!(
            executable = %self.settings.executable,
            count = processes.len(),
            with_session = processes.iter().filter(|p| p.session_id.is_some()).count(),
            "Discovered agent processes"
        );

        *self.lock_cache() = Some(CachedScan { taken_at: Instant::now(), processes: processes.clone() });
        processes
    }

    pub fn clear_cache(&self) {
        *self.lock_cache() = None;
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<CachedScan>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve how to reach the agent running `session_id`. Returns `None`
    /// when no live process carries that session, including processes that
    /// exited since the last scan.
    pub async fn get_connection_params_for_agent(&self, session_id: &str) -> Option<ConnectionDescriptor> {
        let process = self
            .discover_agent_processes()
            .await
            .into_iter()
            .find(|p| p.session_id.as_deref() == Some(session_id))?;

        if !self.inspector.is_alive(process.pid).await {
            debug!(session_id, pid = process.pid, "Discovered process has exited");
            self.clear_cache();
            return None;
        }
        Some(process.connection(self.settings.connection_timeout_secs))
    }

    fn cached(&self) -> Option<Vec<ProcessInfo>> {
        self.lock_cache()
            .as_ref()
            .filter(|c| c.taken_at.elapsed() < self.settings.cache_ttl)
            .map(|c| c.processes.clone())
    }

}

/// Session, socket and pipe lookup for one scanned process. Touches the
/// filesystem, so it runs on the blocking pool.
fn describe(settings: &DiscoverySettings, raw: RawProcess) -> ProcessInfo {
    let working_directory = raw.working_directory.unwrap_or_default();
    let session_id = session::resolve_session_id(&raw.args, &working_directory, &settings.projects_dir);
    let socket_path = if cfg!(windows) {
        None
    } else {
        find_socket(&settings.runtime_dir, &settings.executable, raw.pid, session_id.as_deref())
    };
    let pipe_name = cfg!(windows).then(|| pipe_name(&settings.executable, raw.pid));

    ProcessInfo {
        pid: raw.pid,
        session_id,
        working_directory,
        socket_path,
        pipe_name,
        start_time: raw.start_time,
    }
}

/// First existing socket among `<runtime>/<exe>-<pid>.sock` and
/// `<runtime>/<exe>/<session>.sock`.
pub fn find_socket(runtime_dir: &Path, executable: &str, pid: u32, session_id: Option<&str>) -> Option<PathBuf> {
    let mut candidates = vec![runtime_dir.join(format!("{}-{}.sock", executable, pid))];
    if let Some(session) = session_id {
        candidates.push(runtime_dir.join(executable).join(format!("{}.sock", session)));
    }
    candidates.into_iter().find(|p| p.exists())
}

pub fn pipe_name(executable: &str, pid: u32) -> String {
    format!(r"\\.\pipe\{}-{}", executable, pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OrchestraError;
    use crate::models::ConnectorType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const SESSION: &str = "0b5cf8a2-9a3e-4c0f-8f57-1d2a3b4c5d6e";

    struct FakeInspector {
        processes: Vec<RawProcess>,
        scans: AtomicU32,
        alive: AtomicBool,
        fail: bool,
    }

    impl FakeInspector {
        fn new(processes: Vec<RawProcess>) -> Self {
            Self { processes, scans: AtomicU32::new(0), alive: AtomicBool::new(true), fail: false }
        }
    }

    #[async_trait]
    impl ProcessInspector for FakeInspector {
        async fn list_processes(&self, _executable: &str) -> Result<Vec<RawProcess>, OrchestraError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OrchestraError::CommandExecution("ps missing".into()));
            }
            Ok(self.processes.clone())
        }
        async fn is_alive(&self, _pid: u32) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn settings(runtime: &Path) -> DiscoverySettings {
        DiscoverySettings {
            executable: "claude".into(),
            projects_dir: runtime.join("projects"),
            runtime_dir: runtime.to_path_buf(),
            cache_ttl: Duration::from_secs(30),
            connection_timeout_secs: 12,
            sync_interval: Duration::from_secs(60),
        }
    }

    fn agent_process(pid: u32) -> RawProcess {
        RawProcess {
            pid,
            args: vec!["claude".into(), "--session-id".into(), SESSION.into()],
            working_directory: Some(PathBuf::from("/work/repo")),
            start_time: None,
        }
    }

    #[tokio::test]
    async fn test_no_processes_yields_empty_list() {
        let tmp = tempfile::tempdir().unwrap();
        let discovery = ProcessDiscovery::new(Arc::new(FakeInspector::new(vec![])), settings(tmp.path()));
        assert!(discovery.discover_agent_processes().await.is_empty());
        assert!(discovery.get_connection_params_for_agent(SESSION).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let discovery = ProcessDiscovery::new(Arc::new(FakeInspector::new(vec![agent_process(7)])), settings(tmp.path()));
        assert!(discovery.get_connection_params_for_agent("7e1d2c3b-4a59-4876-9a1b-2c3d4e5f6a7b").await.is_none());
    }

    #[tokio::test]
    async fn test_inspector_failure_yields_empty_list() {
        let tmp = tempfile::tempdir().unwrap();
        let inspector = FakeInspector { fail: true, ..FakeInspector::new(vec![agent_process(7)]) };
        let discovery = ProcessDiscovery::new(Arc::new(inspector), settings(tmp.path()));
        assert!(discovery.discover_agent_processes().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_descriptor_for_known_session() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("claude-7.sock"), "").unwrap();
        let discovery = ProcessDiscovery::new(Arc::new(FakeInspector::new(vec![agent_process(7)])), settings(tmp.path()));

        let desc = discovery.get_connection_params_for_agent(SESSION).await.unwrap();
        assert_eq!(desc.connector_type, ConnectorType::UnixSocket);
        assert_eq!(desc.process_id, Some(7));
        assert_eq!(desc.timeout_seconds, 12);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pid_fallback_without_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let discovery = ProcessDiscovery::new(Arc::new(FakeInspector::new(vec![agent_process(7)])), settings(tmp.path()));
        let desc = discovery.get_connection_params_for_agent(SESSION).await.unwrap();
        assert_eq!(desc.connector_type, ConnectorType::ProcessId);
    }

    #[tokio::test]
    async fn test_exited_process_yields_none_and_clears_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let inspector = Arc::new(FakeInspector::new(vec![agent_process(7)]));
        let discovery = ProcessDiscovery::new(inspector.clone(), settings(tmp.path()));
        discovery.discover_agent_processes().await;

        inspector.alive.store(false, Ordering::SeqCst);
        assert!(discovery.get_connection_params_for_agent(SESSION).await.is_none());
        discovery.discover_agent_processes().await;
        assert_eq!(inspector.scans.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_and_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let inspector = Arc::new(FakeInspector::new(vec![agent_process(7)]));
        let discovery = ProcessDiscovery::new(inspector.clone(), settings(tmp.path()));

        discovery.discover_agent_processes().await;
        discovery.discover_agent_processes().await;
        assert_eq!(inspector.scans.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        discovery.discover_agent_processes().await;
        assert_eq!(inspector.scans.load(Ordering::SeqCst), 2);

        discovery.clear_cache();
        discovery.discover_agent_processes().await;
        assert_eq!(inspector.scans.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poisoned_cache_keeps_caching() {
        let tmp = tempfile::tempdir().unwrap();
        let inspector = Arc::new(FakeInspector::new(vec![agent_process(7)]));
        let discovery = Arc::new(ProcessDiscovery::new(inspector.clone(), settings(tmp.path())));
        let holder = discovery.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.cache.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();
        assert!(discovery.cache.is_poisoned());

        assert_eq!(discovery.discover_agent_processes().await.len(), 1);
        discovery.discover_agent_processes().await;
        assert_eq!(inspector.scans.load(Ordering::SeqCst), 1);

        discovery.clear_cache();
        discovery.discover_agent_processes().await;
        assert_eq!(inspector.scans.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pipe_name_format() {
        assert_eq!(pipe_name("claude", 42), r"\\.\pipe\claude-42");
    }
}
