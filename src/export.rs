use crate::config::ShellConfig;
use crate::errors::{AppError, AppResult};
use crate::workspace::TaskWorkspace;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_EXTENSION: &str = "zip";

#[derive(Debug, Clone)]
pub struct ArtifactExporter {
    workspace: TaskWorkspace,
    export_root: PathBuf,
}

impl ArtifactExporter {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            workspace: TaskWorkspace::new(config.output_root.clone()),
            export_root: config.export_root.clone(),
        }
    }

    pub fn archive_path(&self, task_name: &str) -> PathBuf {
        self.export_root
            .join(format!("{}.{}", task_name, ARCHIVE_EXTENSION))
    }

    /// Archives the task directory, replacing any earlier archive of it.
    ///
    /// `Ok(None)` means there was nothing to export (blank name or no such
    /// task); nothing is written in that case. An `Err` leaves no partial
    /// archive behind.
    pub fn export(&self, task_name: &str) -> AppResult<Option<PathBuf>> {
        let task_name = match TaskWorkspace::normalize_task_name(task_name) {
            Ok(name) => name,
            Err(error) => {
                tracing::warn!(error = %error, "export skipped");
                return Ok(None);
            }
        };
        let task_dir = self.workspace.task_dir(&task_name);
        if !task_dir.is_dir() {
            tracing::warn!(task = %task_name, path = %task_dir.display(), "export skipped: task directory not found");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.export_root).map_err(|error| {
            AppError::Io(format!(
                "failed to create export directory {}: {}",
                self.export_root.display(),
                error
            ))
        })?;
        let archive_path = self.archive_path(&task_name);
        let partial_path = self.export_root.join(format!(
            ".{}.{}.{}.partial",
            task_name,
            Uuid::new_v4(),
            ARCHIVE_EXTENSION
        ));

        let written = write_archive(&task_dir, &partial_path)
            .and_then(|entries| {
                std::fs::rename(&partial_path, &archive_path)?;
                Ok(entries)
            });
        match written {
            Ok(entries) => {
                tracing::info!(task = %task_name, path = %archive_path.display(), entries, "task exported");
                Ok(Some(archive_path))
            }
            Err(error) => {
                let _ = std::fs::remove_file(&partial_path);
                tracing::error!(task = %task_name, error = %error, "export failed");
                Err(error)
            }
        }
    }
}

/// Writes every file and directory under `source` into a new archive at
/// `destination`. Returns the number of entries written.
fn write_archive(source: &Path, destination: &Path) -> AppResult<usize> {
    let file = File::create(destination)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0_usize;
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut children = std::fs::read_dir(&dir)?
            .collect::<Result<Vec<_>, _>>()?;
        children.sort_by_key(|entry| entry.file_name());

        for child in children {
            let path = child.path();
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping unreadable entry");
                    continue;
                }
            };
            let name = archive_name(source, &path)?;

            if metadata.is_dir() {
                if child.file_type()?.is_symlink() {
                    // following directory links could loop
                    continue;
                }
                writer.add_directory(format!("{}/", name), options)?;
                pending.push(path);
            } else if metadata.is_file() {
                writer.start_file(name, file_options(options, &metadata))?;
                let mut input = File::open(&path)?;
                std::io::copy(&mut input, &mut writer)?;
            } else {
                continue;
            }
            entries += 1;
        }
    }

    let mut inner = writer.finish()?;
    inner.flush()?;
    inner
        .into_inner()
        .map_err(|error| AppError::Io(error.to_string()))?
        .sync_all()?;
    Ok(entries)
}

#[cfg(unix)]
fn file_options(options: SimpleFileOptions, metadata: &std::fs::Metadata) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    options.unix_permissions(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn file_options(options: SimpleFileOptions, _metadata: &std::fs::Metadata) -> SimpleFileOptions {
    options
}

/// `/`-separated path of `path` relative to `root`.
fn archive_name(root: &Path, path: &Path) -> AppResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|error| AppError::Internal(format!("entry outside export source: {}", error)))?;
    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}
