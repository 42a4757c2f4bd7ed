//! Instance readiness advertisement — spec §4.2 "Service state machine"
//! and Design Notes ("the ready/active file ... is owned exclusively by
//! one instance; contention ... resolved at the orchestrator layer, not
//! by file locking"). This module only toggles the two files; it never
//! attempts to lock them against other processes.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Ready,
    Active,
    Draining,
}

pub struct ReadinessFiles {
    ready_file_path: Option<PathBuf>,
    active_lock_file_path: Option<PathBuf>,
}

impl ReadinessFiles {
    pub fn new(ready_file_path: Option<PathBuf>, active_lock_file_path: Option<PathBuf>) -> Self {
        Self { ready_file_path, active_lock_file_path }
    }

    pub fn advertise_ready(&self) {
        if let Some(path) = &self.ready_file_path {
            if let Err(e) = std::fs::write(path, b"ready") {
                tracing::warn!(error = %e, path = %path.display(), "failed to write ready file");
            }
        }
        if let Some(path) = &self.active_lock_file_path {
            let _ = std::fs::remove_file(path);
        }
    }

    pub fn advertise_active(&self) {
        if let Some(path) = &self.ready_file_path {
            let _ = std::fs::remove_file(path);
        }
        if let Some(path) = &self.active_lock_file_path {
            if let Err(e) = std::fs::write(path, b"active") {
                tracing::warn!(error = %e, path = %path.display(), "failed to write active lock file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertise_ready_then_active_toggles_files() {
        let dir = std::env::temp_dir().join(format!("session-readiness-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let ready = dir.join("ready");
        let active = dir.join("active");

        let files = ReadinessFiles::new(Some(ready.clone()), Some(active.clone()));
        files.advertise_ready();
        assert!(ready.exists());
        assert!(!active.exists());

        files.advertise_active();
        assert!(!ready.exists());
        assert!(active.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
