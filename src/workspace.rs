use crate::errors::{AppError, AppResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    output_root: PathBuf,
}

impl TaskWorkspace {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Trims `raw` and rejects names that are empty or would resolve outside
    /// the output root.
    pub fn normalize_task_name(raw: &str) -> AppResult<String> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(AppError::Validation("task name cannot be empty".to_string()));
        }
        if name == "." || name == ".." {
            return Err(AppError::Validation(format!("'{}' is not a valid task name", name)));
        }
        if name.chars().any(|ch| ch == '/' || ch == '\\' || ch.is_control()) {
            return Err(AppError::Validation(format!(
                "task name '{}' may not contain path separators or control characters",
                name
            )));
        }
        Ok(name.to_string())
    }

    /// Directory for a validated task name.
    pub fn task_dir(&self, task_name: &str) -> PathBuf {
        self.output_root.join(task_name)
    }

    pub fn task_exists(&self, task_name: &str) -> bool {
        self.task_dir(task_name).is_dir()
    }

    /// Path of the entry point inside the task directory, if the file is there.
    pub fn entry_point(&self, task_name: &str, entry_point: &str) -> AppResult<PathBuf> {
        let task_dir = self.task_dir(task_name);
        let path = task_dir.join(entry_point);
        if !path.is_file() {
            return Err(AppError::NotFound(format!(
                "could not find '{}' in '{}'",
                entry_point,
                task_dir.display()
            )));
        }
        Ok(path)
    }
}
