use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
});

const SESSION_FLAGS: &[&str] = &["--session-id", "--resume", "-r"];

pub fn is_session_id(value: &str) -> bool {
    UUID_RE.is_match(value)
}

/// Session id passed explicitly on the command line, either as
/// `--session-id <uuid>` or `--session-id=<uuid>` (same for `--resume`).
pub fn session_from_args(args: &[String]) -> Option<String> {
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some((flag, value)) = arg.split_once('=') {
            if SESSION_FLAGS.contains(&flag) && is_session_id(value) {
                return Some(value.to_lowercase());
            }
            continue;
        }
        if SESSION_FLAGS.contains(&arg.as_str()) {
            if let Some(value) = iter.peek() {
                if is_session_id(value) {
                    return Some(value.to_lowercase());
                }
            }
        }
    }
    None
}

/// Project directory name for a working directory: separators, drive
/// colons and dots all become `-`.
pub fn encode_project_dir(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '.' => '-',
            other => other,
        })
        .collect()
}

/// The most recently modified `<uuid>.jsonl` transcript for `cwd`.
pub fn latest_session_file(projects_dir: &Path, cwd: &Path) -> Option<String> {
    let dir = projects_dir.join(encode_project_dir(cwd));
    let entries = std::fs::read_dir(&dir).ok()?;

    let mut newest: Option<(SystemTime, String)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_session_id(stem) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, stem.to_lowercase()));
        }
    }
    newest.map(|(_, id)| id)
}

/// Explicit flag first, transcript file second.
pub fn resolve_session_id(args: &[String], cwd: &Path, projects_dir: &Path) -> Option<String> {
    session_from_args(args).or_else(|| latest_session_file(projects_dir, cwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ID_A: &str = "0b5cf8a2-9a3e-4c0f-8f57-1d2a3b4c5d6e";
    const ID_B: &str = "7e1d2c3b-4a59-4876-9a1b-2c3d4e5f6a7b";

    fn touch(path: &Path, secs: u64) {
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_session_flag_forms() {
        assert_eq!(session_from_args(&args(&["claude", "--session-id", ID_A])).as_deref(), Some(ID_A));
        assert_eq!(session_from_args(&args(&["claude", &format!("--resume={}", ID_B)])).as_deref(), Some(ID_B));
        assert_eq!(session_from_args(&args(&["claude", "--resume", "not-a-uuid"])), None);
        assert_eq!(session_from_args(&args(&["claude", "-p", "fix it"])), None);
    }

    #[test]
    fn test_encode_project_dir() {
        assert_eq!(encode_project_dir(Path::new("/home/dev/my.app")), "-home-dev-my-app");
        assert_eq!(encode_project_dir(Path::new(r"C:\src\repo")), "C--src-repo");
    }

    #[test]
    fn test_latest_session_file_picks_newest_uuid() {
        let projects = tempfile::tempdir().unwrap();
        let cwd = Path::new("/work/repo");
        let dir = projects.path().join(encode_project_dir(cwd));
        std::fs::create_dir_all(&dir).unwrap();

        touch(&dir.join(format!("{}.jsonl", ID_A)), 2_000);
        touch(&dir.join("notes.jsonl"), 3_000);
        touch(&dir.join(format!("{}.jsonl", ID_B)), 2_500);

        assert_eq!(latest_session_file(projects.path(), cwd).as_deref(), Some(ID_B));
    }

    #[test]
    fn test_missing_project_dir_yields_none() {
        let projects = tempfile::tempdir().unwrap();
        assert!(latest_session_file(projects.path(), Path::new("/nowhere")).is_none());
    }

    #[test]
    fn test_args_take_precedence_over_files() {
        let projects = tempfile::tempdir().unwrap();
        let cwd = Path::new("/work/repo");
        let dir = projects.path().join(encode_project_dir(cwd));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.jsonl", ID_B)), "{}").unwrap();

        let resolved = resolve_session_id(&args(&["claude", "--session-id", ID_A]), cwd, projects.path());
        assert_eq!(resolved.as_deref(), Some(ID_A));
    }
}
