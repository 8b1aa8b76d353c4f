//! Workspace overlay: the ordered file layers that make up a grading
//! workspace, and the default materializer that copies them.
//!
//! Layers are applied in order and a later layer wins on path conflicts.
//! Content is always copied; links are never created or followed.

use crate::config::loader::OverlayConfig;
use crate::config::types::{GradeError, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Which files of a layer's source tree are copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every regular file below `dir`
    Tree { dir: PathBuf },
    /// Regular files below `dir` whose file name ends with `suffix`
    Suffix { dir: PathBuf, suffix: String },
    /// Regular files below `dir` whose path relative to `dir` contains `marker`
    Marker { dir: PathBuf, marker: String },
    /// Individual files; missing ones are skipped
    Files { paths: Vec<PathBuf> },
}

/// One overlay layer. Paths in the selection are relative to `source_root`
/// and land at the same relative path in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLayer {
    pub label: String,
    pub source_root: PathBuf,
    pub selection: Selection,
}

/// Collaborator that turns a layer list into files under `dest`.
pub trait Materializer: Send + Sync {
    fn materialize(&self, layers: &[OverlayLayer], dest: &Path) -> Result<()>;
}

/// Layer stack for one problem, lowest priority first.
pub fn plan_layers(
    config: &OverlayConfig,
    submission_root: &Path,
    private_root: &Path,
    problem: &str,
) -> Vec<OverlayLayer> {
    let problem_dir = PathBuf::from(problem);
    vec![
        OverlayLayer {
            label: "submission".to_string(),
            source_root: submission_root.to_path_buf(),
            selection: Selection::Tree {
                dir: problem_dir.clone(),
            },
        },
        OverlayLayer {
            label: "tests".to_string(),
            source_root: private_root.to_path_buf(),
            selection: Selection::Suffix {
                dir: problem_dir.clone(),
                suffix: config.test_file_suffix.clone(),
            },
        },
        OverlayLayer {
            label: "protected files".to_string(),
            source_root: private_root.to_path_buf(),
            selection: Selection::Marker {
                dir: problem_dir.clone(),
                marker: config.protected_marker.clone(),
            },
        },
        OverlayLayer {
            label: "testdata".to_string(),
            source_root: private_root.to_path_buf(),
            selection: Selection::Tree {
                dir: problem_dir.join(&config.testdata_dir),
            },
        },
        OverlayLayer {
            label: "shared files".to_string(),
            source_root: private_root.to_path_buf(),
            selection: Selection::Files {
                paths: config.shared_files.iter().map(PathBuf::from).collect(),
            },
        },
    ]
}

/// True if `root/problem` is an existing directory.
pub fn problem_dir_exists(root: &Path, problem: &str) -> bool {
    root.join(problem).is_dir()
}

/// Default materializer: recursive copy of regular files.
#[derive(Debug, Clone, Default)]
pub struct CopyOverlay;

impl CopyOverlay {
    pub fn new() -> Self {
        Self
    }

    /// Relative paths of the regular files a layer selects, sorted.
    fn select(&self, layer: &OverlayLayer) -> Result<Vec<PathBuf>> {
        let (dir, filter): (&Path, Box<dyn Fn(&Path) -> bool>) = match &layer.selection {
            Selection::Tree { dir } => (dir, Box::new(|_: &Path| true)),
            Selection::Suffix { dir, suffix } => {
                let suffix = suffix.clone();
                (
                    dir,
                    Box::new(move |rel: &Path| {
                        rel.file_name()
                            .map(|n| n.to_string_lossy().ends_with(suffix.as_str()))
                            .unwrap_or(false)
                    }),
                )
            }
            Selection::Marker { dir, marker } => {
                let marker = marker.clone();
                (
                    dir,
                    Box::new(move |rel: &Path| rel.to_string_lossy().contains(marker.as_str())),
                )
            }
            Selection::Files { paths } => return Ok(self.select_files(layer, paths)),
        };

        let walk_root = layer.source_root.join(dir);
        if fs::symlink_metadata(&walk_root).is_err() {
            log::debug!(
                "Layer '{}' source {} does not exist, skipping",
                layer.label,
                walk_root.display()
            );
            return Ok(Vec::new());
        }

        let mut selected = Vec::new();
        for entry in WalkDir::new(&walk_root)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                GradeError::Infrastructure(format!(
                    "Failed to walk {} for layer '{}': {}",
                    walk_root.display(),
                    layer.label,
                    e
                ))
            })?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                log::warn!(
                    "Skipping non-regular file {} in layer '{}'",
                    entry.path().display(),
                    layer.label
                );
                continue;
            }
            let within_dir = entry.path().strip_prefix(&walk_root).unwrap_or(entry.path());
            if filter(within_dir) {
                selected.push(dir.join(within_dir));
            }
        }
        Ok(selected)
    }

    fn select_files(&self, layer: &OverlayLayer, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut selected = Vec::new();
        for rel in paths {
            match fs::symlink_metadata(layer.source_root.join(rel)) {
                Ok(meta) if meta.file_type().is_file() => selected.push(rel.clone()),
                Ok(_) => log::warn!(
                    "Skipping non-regular file {} in layer '{}'",
                    rel.display(),
                    layer.label
                ),
                Err(_) => log::warn!(
                    "Layer '{}' file {} not found, skipping",
                    layer.label,
                    rel.display()
                ),
            }
        }
        selected
    }
}

fn ensure_parent(dest_root: &Path, target: &Path) -> Result<()> {
    let Some(parent) = target.parent() else {
        return Ok(());
    };
    if parent.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|e| {
        GradeError::Infrastructure(format!(
            "Failed to create directory {}: {}",
            parent.display(),
            e
        ))
    })?;
    // Every directory between the workspace root and the file must be traversable.
    let mut dir = parent;
    while dir != dest_root {
        fs::set_permissions(dir, fs::Permissions::from_mode(0o755))?;
        match dir.parent() {
            Some(next) if next.starts_with(dest_root) => dir = next,
            _ => break,
        }
    }
    Ok(())
}

fn copy_file(source: &Path, target: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(target);
    if let Ok(meta) = meta {
        if meta.is_dir() {
            return Err(GradeError::Infrastructure(format!(
                "Cannot overlay file onto directory {}",
                target.display()
            )));
        }
        // Replace rather than write through whatever is there.
        fs::remove_file(target)?;
    }

    let mode = fs::metadata(source)?.permissions().mode();
    fs::copy(source, target).map_err(|e| {
        GradeError::Infrastructure(format!(
            "Failed to copy {} to {}: {}",
            source.display(),
            target.display(),
            e
        ))
    })?;
    // Readable by the sandbox user; no setuid/setgid/sticky bits survive.
    let mode = (mode & 0o777) | 0o444;
    fs::set_permissions(target, fs::Permissions::from_mode(mode))?;
    Ok(())
}

impl Materializer for CopyOverlay {
    fn materialize(&self, layers: &[OverlayLayer], dest: &Path) -> Result<()> {
        for layer in layers {
            log::info!("copying {}", layer.label);
            let files = self.select(layer)?;
            for rel in &files {
                let target = dest.join(rel);
                ensure_parent(dest, &target)?;
                copy_file(&layer.source_root.join(rel), &target)?;
            }
            log::debug!("Layer '{}' contributed {} files", layer.label, files.len());
        }
        Ok(())
    }
}
