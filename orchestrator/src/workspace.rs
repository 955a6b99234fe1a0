//! Job-exclusive scratch directory shared with the worker process.

use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

/// Scratch directory named after its job. Removed when dropped, whichever
/// way the owning run exits.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    pub fn create(root: &Path, job_id: Uuid) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("agent-job-{job_id}-"))
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Resolve a worker-reported file reference to a path inside this
    /// workspace. Relative references are joined onto the workspace;
    /// absolute ones must already point inside it. `None` when the reference
    /// would escape the workspace.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let reference = Path::new(reference);
        let relative = if reference.is_absolute() {
            reference.strip_prefix(self.path()).ok()?
        } else {
            reference
        };

        let mut resolved = self.path().to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if resolved == self.path() {
            return None;
        }
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_namespaced_and_removed_on_drop() {
        let root = tempfile::tempdir().expect("tempdir");
        let job_id = Uuid::new_v4();
        let workspace = ScratchWorkspace::create(root.path(), job_id).expect("workspace");
        let path = workspace.path().to_path_buf();

        assert!(path.is_dir());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("agent-job-{job_id}-")));

        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn resolve_accepts_relative_and_contained_absolute_paths() {
        let root = tempfile::tempdir().expect("tempdir");
        let workspace = ScratchWorkspace::create(root.path(), Uuid::new_v4()).expect("workspace");

        let relative = workspace.resolve("screenshots/01_landing.png").unwrap();
        assert_eq!(relative, workspace.path().join("screenshots/01_landing.png"));

        let absolute = workspace.path().join("screenshots/02_login.png");
        let resolved = workspace.resolve(absolute.to_str().unwrap()).unwrap();
        assert_eq!(resolved, absolute);
    }

    #[test]
    fn resolve_rejects_escaping_paths() {
        let root = tempfile::tempdir().expect("tempdir");
        let workspace = ScratchWorkspace::create(root.path(), Uuid::new_v4()).expect("workspace");

        assert!(workspace.resolve("../secrets.txt").is_none());
        assert!(workspace.resolve("screenshots/../../x.png").is_none());
        assert!(workspace.resolve("/etc/passwd").is_none());
        assert!(workspace.resolve("").is_none());
    }
}
