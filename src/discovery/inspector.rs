//! OS process enumeration behind a small capability trait, one
//! implementation per platform family.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio::process::Command;
use tracing::debug;

use crate::errors::OrchestraError;

/// A process as reported by the OS, before any agent-specific enrichment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub start_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Live processes whose executable name is `executable`.
    async fn list_processes(&self, executable: &str) -> Result<Vec<RawProcess>, OrchestraError>;
    async fn is_alive(&self, pid: u32) -> bool;
}

/// Picks the inspector for the platform we were built for.
pub fn default_inspector() -> Box<dyn ProcessInspector> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcfsInspector::new())
    }
    #[cfg(windows)]
    {
        Box::new(TasklistInspector)
    }
    #[cfg(not(any(target_os = "linux", windows)))]
    {
        Box::new(PsInspector)
    }
}

/// True when `args` belong to `executable`, either directly or as a script
/// run by an interpreter (`node /usr/lib/.../claude`).
pub fn matches_executable(args: &[String], executable: &str) -> bool {
    let base = |s: &str| -> String {
        let name = s.rsplit(&['/', '\\'][..]).next().unwrap_or(s);
        name.strip_suffix(".exe").unwrap_or(name).to_string()
    };
    match args {
        [] => false,
        [first] => base(first) == executable,
        [first, second, ..] => base(first) == executable || base(second) == executable,
    }
}

// ---------------------------------------------------------------------------
// Linux
// ---------------------------------------------------------------------------

/// Reads `/proc` directly.
pub struct ProcfsInspector {
    root: PathBuf,
    /// USER_HZ; 100 on every mainstream Linux build.
    clock_ticks: u64,
}

impl ProcfsInspector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), clock_ticks: 100 }
    }

    fn boot_time(&self) -> Option<i64> {
        let stat = std::fs::read_to_string(self.root.join("stat")).ok()?;
        stat.lines()
            .find_map(|l| l.strip_prefix("btime "))
            .and_then(|v| v.trim().parse().ok())
    }

    fn start_time(&self, pid_dir: &Path, boot: Option<i64>) -> Option<DateTime<Utc>> {
        let stat = std::fs::read_to_string(pid_dir.join("stat")).ok()?;
        // comm may contain spaces; fields resume after the last ')'
        let rest = &stat[stat.rfind(')')? + 1..];
        let ticks: u64 = rest.split_whitespace().nth(19)?.parse().ok()?;
        let secs = boot? + (ticks / self.clock_ticks) as i64;
        Utc.timestamp_opt(secs, 0).single()
    }

    fn scan(&self, executable: &str) -> Result<Vec<RawProcess>, OrchestraError> {
        let boot = self.boot_time();
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.root)?.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let dir = entry.path();
            // processes can vanish mid-scan; skip anything unreadable
            let Ok(raw) = std::fs::read(dir.join("cmdline")) else {
                continue;
            };
            let args: Vec<String> = raw
                .split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect();
            if !matches_executable(&args, executable) {
                continue;
            }
            found.push(RawProcess {
                pid,
                working_directory: std::fs::read_link(dir.join("cwd")).ok(),
                start_time: self.start_time(&dir, boot),
                args,
            });
        }
        found.sort_by_key(|p| p.pid);
        Ok(found)
    }
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessInspector for ProcfsInspector {
    async fn list_processes(&self, executable: &str) -> Result<Vec<RawProcess>, OrchestraError> {
        let inspector = ProcfsInspector { root: self.root.clone(), clock_ticks: self.clock_ticks };
        let executable = executable.to_string();
        tokio::task::spawn_blocking(move || inspector.scan(&executable))
            .await
            .map_err(|e| OrchestraError::Unexpected(format!("process scan panicked: {}", e)))?
    }

    async fn is_alive(&self, pid: u32) -> bool {
        tokio::fs::metadata(self.root.join(pid.to_string())).await.is_ok()
    }
}

// ---------------------------------------------------------------------------
// macOS / BSD
// ---------------------------------------------------------------------------

/// Uses `ps` for the process table and `lsof` for working directories.
pub struct PsInspector;

impl PsInspector {
    async fn cwd_of(pid: u32) -> Option<PathBuf> {
        let output = Command::new("lsof")
            .args(["-a", "-p", &pid.to_string(), "-d", "cwd", "-Fn"])
            .output()
            .await
            .ok()?;
        parse_lsof_cwd(&String::from_utf8_lossy(&output.stdout))
    }
}

/// `lsof -Fn` prints one field per line; the name field starts with `n`.
pub fn parse_lsof_cwd(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .find_map(|l| l.strip_prefix('n'))
        .map(PathBuf::from)
}

/// `ps` elapsed time: `[[dd-]hh:]mm:ss`.
pub fn parse_etime(etime: &str) -> Option<ChronoDuration> {
    let (days, clock) = match etime.split_once('-') {
        Some((d, rest)) => (d.parse::<i64>().ok()?, rest),
        None => (0, etime),
    };
    let parts: Vec<i64> = clock
        .split(':')
        .map(|p| p.parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;
    let (h, m, s) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    Some(ChronoDuration::seconds(((days * 24 + h) * 60 + m) * 60 + s))
}

/// Lines of `ps -axo pid=,etime=,command=`.
pub fn parse_ps_output(output: &str, executable: &str, now: DateTime<Utc>) -> Vec<RawProcess> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse::<u32>().ok()?;
            let etime = fields.next()?;
            let args: Vec<String> = fields.map(String::from).collect();
            if !matches_executable(&args, executable) {
                return None;
            }
            Some(RawProcess {
                pid,
                args,
                working_directory: None,
                start_time: parse_etime(etime).map(|e| now - e),
            })
        })
        .collect()
}

#[async_trait]
impl ProcessInspector for PsInspector {
    async fn list_processes(&self, executable: &str) -> Result<Vec<RawProcess>, OrchestraError> {
        let output = Command::new("ps")
            .args(["-axo", "pid=,etime=,command="])
            .output()
            .await?;
        if !output.status.success() {
            return Err(OrchestraError::CommandExecution(format!("ps exited with {}", output.status)));
        }
        let mut processes = parse_ps_output(&String::from_utf8_lossy(&output.stdout), executable, Utc::now());
        for process in &mut processes {
            process.working_directory = Self::cwd_of(process.pid).await;
        }
        Ok(processes)
    }

    async fn is_alive(&self, pid: u32) -> bool {
        match Command::new("ps").args(["-p", &pid.to_string()]).output().await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!(pid, error = %e, "ps liveness check failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// Uses `tasklist`; it exposes neither command lines nor working
/// directories, so session ids come only from transcript lookups.
pub struct TasklistInspector;

/// `tasklist /FO CSV /NH` rows: "image","pid","session","session#","mem".
pub fn parse_tasklist_csv(output: &str, executable: &str) -> Vec<RawProcess> {
    let image = format!("{}.exe", executable).to_ascii_lowercase();
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.trim().trim_matches('"').split("\",\"").collect();
            if cols.len() < 2 || cols[0].to_ascii_lowercase() != image {
                return None;
            }
            Some(RawProcess {
                pid: cols[1].parse().ok()?,
                args: vec![cols[0].to_string()],
                working_directory: None,
                start_time: None,
            })
        })
        .collect()
}

#[async_trait]
impl ProcessInspector for TasklistInspector {
    async fn list_processes(&self, executable: &str) -> Result<Vec<RawProcess>, OrchestraError> {
        let filter = format!("IMAGENAME eq {}.exe", executable);
        let output = Command::new("tasklist")
            .args(["/FO", "CSV", "/NH", "/FI", &filter])
            .output()
            .await?;
        Ok(parse_tasklist_csv(&String::from_utf8_lossy(&output.stdout), executable))
    }

    async fn is_alive(&self, pid: u32) -> bool {
        let filter = format!("PID eq {}", pid);
        match Command::new("tasklist").args(["/FO", "CSV", "/NH", "/FI", &filter]).output().await {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&format!("\"{}\"", pid)),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matches_executable() {
        assert!(matches_executable(&args(&["/usr/local/bin/claude", "-p"]), "claude"));
        assert!(matches_executable(&args(&["node", "/opt/claude/bin/claude"]), "claude"));
        assert!(matches_executable(&args(&[r"C:\Tools\claude.exe"]), "claude"));
        assert!(!matches_executable(&args(&["vim", "claude.md"]), "claude"));
        assert!(!matches_executable(&[], "claude"));
    }

    #[test]
    fn test_parse_etime() {
        assert_eq!(parse_etime("05:07"), Some(ChronoDuration::seconds(307)));
        assert_eq!(parse_etime("01:00:00"), Some(ChronoDuration::seconds(3600)));
        assert_eq!(parse_etime("2-00:00:01"), Some(ChronoDuration::seconds(2 * 86400 + 1)));
        assert_eq!(parse_etime("garbage"), None);
    }

    #[test]
    fn test_parse_ps_output() {
        let now = Utc::now();
        let out = "  101 00:10 /usr/local/bin/claude --resume abc\n  102 01:00 /bin/zsh\n";
        let procs = parse_ps_output(out, "claude", now);
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].pid, 101);
        assert_eq!(procs[0].start_time, Some(now - ChronoDuration::seconds(10)));
    }

    #[test]
    fn test_parse_lsof_cwd() {
        let out = "p101\nfcwd\nn/Users/dev/repo\n";
        assert_eq!(parse_lsof_cwd(out), Some(PathBuf::from("/Users/dev/repo")));
        assert_eq!(parse_lsof_cwd(""), None);
    }

    #[test]
    fn test_parse_tasklist_csv() {
        let out = "\"claude.exe\",\"4242\",\"Console\",\"1\",\"120,000 K\"\r\n\"explorer.exe\",\"10\",\"Console\",\"1\",\"1 K\"\r\n";
        let procs = parse_tasklist_csv(out, "claude");
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].pid, 4242);
        assert!(parse_tasklist_csv("INFO: No tasks are running", "claude").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_procfs_scan_on_fake_root() {
        let root = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("stat"), "cpu 1 2 3\nbtime 1700000000\n").unwrap();

        let agent = root.path().join("321");
        std::fs::create_dir(&agent).unwrap();
        std::fs::write(agent.join("cmdline"), b"/usr/bin/claude\0--session-id\0abc\0").unwrap();
        std::os::unix::fs::symlink(repo.path(), agent.join("cwd")).unwrap();
        let stat = format!("321 (claude main) S {}", vec!["0"; 18].join(" ") + " 500 0");
        std::fs::write(agent.join("stat"), stat).unwrap();

        let other = root.path().join("322");
        std::fs::create_dir(&other).unwrap();
        std::fs::write(other.join("cmdline"), b"bash\0").unwrap();
        std::fs::create_dir(root.path().join("self")).unwrap();

        let inspector = ProcfsInspector::with_root(root.path());
        let procs = inspector.list_processes("claude").await.unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].pid, 321);
        assert_eq!(procs[0].working_directory.as_deref(), Some(repo.path()));
        assert_eq!(procs[0].start_time.map(|t| t.timestamp()), Some(1_700_000_005));

        assert!(inspector.is_alive(321).await);
        assert!(!inspector.is_alive(999).await);
    }
}
