// SPDX-License-Identifier: MIT

//! Per-task directory layout.
//!
//! ```text
//! <root>/<task_id>/
//!   task.json
//!   machine.json
//!   logs/
//!   memory/
//!   files/
//!   screenshots/<ms>.jpg
//!   pcap
//!   run_errors.json
//!   zipped_results.zip
//! ```

use std::path::{Path, PathBuf};
use vmn_core::TaskId;

/// Upload categories the Result Server accepts for `FILE` transfers.
/// Anything outside this safelist is rejected before a path is built.
pub const UPLOAD_CATEGORIES: &[&str] = &["logs", "memory", "files"];

#[derive(Debug, Clone)]
pub struct TaskPaths {
    root: PathBuf,
}

impl TaskPaths {
    pub fn new(tasks_root: impl Into<PathBuf>, task_id: &TaskId) -> Self {
        Self {
            root: tasks_root.into().join(task_id.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_json(&self) -> PathBuf {
        self.root.join("task.json")
    }

    pub fn machine_json(&self) -> PathBuf {
        self.root.join("machine.json")
    }

    pub fn pcap(&self) -> PathBuf {
        self.root.join("pcap")
    }

    pub fn run_errors_json(&self) -> PathBuf {
        self.root.join("run_errors.json")
    }

    pub fn zipped_results(&self) -> PathBuf {
        self.root.join("zipped_results.zip")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join("screenshots")
    }

    pub fn screenshot(&self, ms_since_map: u64) -> PathBuf {
        self.screenshots_dir().join(format!("{ms_since_map}.jpg"))
    }

    /// Resolve an upload category (`logs`, `memory`, `files`) to its
    /// directory, returning `None` if the category is not in the safelist.
    pub fn category_dir(&self, category: &str) -> Option<PathBuf> {
        if UPLOAD_CATEGORIES.contains(&category) {
            Some(self.root.join(category))
        } else {
            None
        }
    }

    /// Create every directory this task needs before uploads can land.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        for category in UPLOAD_CATEGORIES {
            std::fs::create_dir_all(self.root.join(category))?;
        }
        std::fs::create_dir_all(self.screenshots_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_categories_resolve_under_task_root() {
        let paths = TaskPaths::new("/var/lib/vmn/tasks", &TaskId::new("t1"));
        let dir = paths.category_dir("logs").unwrap();
        assert_eq!(dir, PathBuf::from("/var/lib/vmn/tasks/t1/logs"));
    }

    #[test]
    fn unknown_category_is_rejected() {
        let paths = TaskPaths::new("/var/lib/vmn/tasks", &TaskId::new("t1"));
        assert!(paths.category_dir("../etc").is_none());
        assert!(paths.category_dir("secrets").is_none());
    }

    #[test]
    fn screenshot_path_is_named_by_elapsed_milliseconds() {
        let paths = TaskPaths::new("/var/lib/vmn/tasks", &TaskId::new("t1"));
        assert_eq!(
            paths.screenshot(1500),
            PathBuf::from("/var/lib/vmn/tasks/t1/screenshots/1500.jpg")
        );
    }

    #[test]
    fn ensure_dirs_creates_the_full_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(tmp.path(), &TaskId::new("t1"));
        paths.ensure_dirs().unwrap();
        assert!(paths.category_dir("logs").unwrap().is_dir());
        assert!(paths.screenshots_dir().is_dir());
    }
}
