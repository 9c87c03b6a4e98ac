use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the project directories for dumpkeeper.
fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "dumpkeeper")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut path = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    for part in parts {
        path.push(part);
    }
    path
}

/// Returns the configuration directory: `~/.config/dumpkeeper/`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback(&[".config", "dumpkeeper"]))
}

/// Returns the path to the config file: `~/.config/dumpkeeper/config.toml`
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Returns the data directory holding the log file: `~/.local/share/dumpkeeper/`
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback(&[".local", "share", "dumpkeeper"]))
}

/// Returns the log file path: `~/.local/share/dumpkeeper/dumpkeeper.log`
pub fn log_path() -> PathBuf {
    data_dir().join("dumpkeeper.log")
}

/// Returns the PID file path.
/// Respects `$XDG_RUNTIME_DIR/dumpkeeper.pid` with fallback to `/tmp/dumpkeeper-$UID.pid`.
pub fn pid_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("dumpkeeper.pid")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/dumpkeeper-{}.pid", uid))
    }
}

/// Expands a leading `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let dir = config_dir();
        assert!(dir.ends_with("dumpkeeper"));
        assert!(config_path().ends_with("dumpkeeper/config.toml"));
    }

    #[test]
    fn test_log_path() {
        assert!(log_path().ends_with("dumpkeeper/dumpkeeper.log"));
    }

    #[test]
    fn test_pid_path() {
        assert!(pid_path().to_string_lossy().contains("dumpkeeper"));
        assert!(pid_path().to_string_lossy().ends_with(".pid"));
    }

    #[test]
    fn test_expand_home() {
        let home = directories::BaseDirs::new()
            .unwrap()
            .home_dir()
            .to_path_buf();
        assert_eq!(
            expand_home("~/backups"),
            format!("{}/backups", home.to_string_lossy())
        );
        assert_eq!(expand_home("/var/backups"), "/var/backups");
        assert_eq!(expand_home("relative/~/dir"), "relative/~/dir");
    }
}
