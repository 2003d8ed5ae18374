//! A working copy of the manifest repository.
//!
//! The checkout is the only shared mutable resource in the process. Access
//! goes through scoped [`Checkout::with_read`] / [`Checkout::with_write`]
//! acquisition so callers cannot forget to release the guard; an `fs2`
//! advisory lock additionally excludes other processes from the same
//! working directory.

use crate::git::{git_succeeds, run_git};
use crate::RepoError;
use caravel_schema::Revision;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Identity used for commits made by the control plane.
pub const COMMIT_AUTHOR_NAME: &str = "Caravel";
pub const COMMIT_AUTHOR_EMAIL: &str = "caravel@invalid";

/// Notes ref carrying structured release provenance.
const NOTES_REF: &str = "refs/notes/caravel";

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Clone URL of the manifest repository.
    pub url: String,
    pub branch: String,
    /// Subdirectory holding the manifests, relative to the repo root.
    pub path: Option<String>,
}

struct ProcessLock {
    lock_file: File,
}

impl ProcessLock {
    fn acquire(lock_path: &Path) -> Result<Self, RepoError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        file.try_lock_exclusive()
            .map_err(|e| RepoError::Locked(e.to_string()))?;
        Ok(Self { lock_file: file })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}

/// The working tree itself. Only reachable through a checkout guard.
pub struct WorkTree {
    dir: PathBuf,
    branch: String,
    manifest_dir: PathBuf,
}

impl WorkTree {
    /// Directory to enumerate manifests from.
    pub fn manifest_dir(&self) -> &Path {
        &self.manifest_dir
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn head_revision(&self) -> Result<Revision, RepoError> {
        run_git(&self.dir, &["rev-parse", "HEAD"]).map(Revision::new)
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, RepoError> {
        Ok(std::fs::read(path)?)
    }

    /// Overwrite `path` with `bytes`, keeping the file's mode.
    pub fn write_file(&mut self, path: &Path, bytes: &[u8]) -> Result<(), RepoError> {
        let mode = std::fs::metadata(path)?.permissions();
        std::fs::write(path, bytes)?;
        std::fs::set_permissions(path, mode)?;
        Ok(())
    }

    /// Whether the working tree differs from HEAD.
    pub fn has_changes(&self) -> Result<bool, RepoError> {
        let status = run_git(&self.dir, &["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }

    /// Stage everything and commit with the control plane's identity.
    pub fn commit_all(&mut self, message: &str) -> Result<Revision, RepoError> {
        run_git(&self.dir, &["add", "-A"])?;
        run_git(
            &self.dir,
            &[
                "-c",
                &format!("user.name={COMMIT_AUTHOR_NAME}"),
                "-c",
                &format!("user.email={COMMIT_AUTHOR_EMAIL}"),
                "commit",
                "-m",
                message,
            ],
        )?;
        let rev = self.head_revision()?;
        info!("committed {rev}");
        Ok(rev)
    }

    /// Attach structured provenance to a commit as a git note.
    pub fn add_note(&mut self, rev: &Revision, note: &str) -> Result<(), RepoError> {
        run_git(
            &self.dir,
            &[
                "-c",
                &format!("user.name={COMMIT_AUTHOR_NAME}"),
                "-c",
                &format!("user.email={COMMIT_AUTHOR_EMAIL}"),
                "notes",
                &format!("--ref={NOTES_REF}"),
                "add",
                "-f",
                "-m",
                note,
                rev.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn show_note(&self, rev: &Revision) -> Option<String> {
        run_git(
            &self.dir,
            &["notes", &format!("--ref={NOTES_REF}"), "show", rev.as_str()],
        )
        .ok()
    }

    /// Push the branch and the provenance notes to origin.
    pub fn push(&mut self) -> Result<(), RepoError> {
        debug!("pushing {}", self.branch);
        run_git(&self.dir, &["push", "origin", &self.branch, NOTES_REF])?;
        Ok(())
    }

    pub fn pull(&mut self) -> Result<(), RepoError> {
        run_git(&self.dir, &["pull", "--ff-only", "origin", &self.branch])?;
        Ok(())
    }

    /// Discard the working tree back to `rev`.
    pub fn reset_hard(&mut self, rev: &Revision) -> Result<(), RepoError> {
        run_git(&self.dir, &["reset", "--hard", rev.as_str()])?;
        Ok(())
    }

    /// Whether `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &Revision, descendant: &Revision) -> Result<bool, RepoError> {
        git_succeeds(
            &self.dir,
            &[
                "merge-base",
                "--is-ancestor",
                ancestor.as_str(),
                descendant.as_str(),
            ],
        )
    }
}

/// A cloned working copy guarded by a reader/writer lock.
pub struct Checkout {
    tree: RwLock<WorkTree>,
    _process_lock: ProcessLock,
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout").finish()
    }
}

impl Checkout {
    /// Clone `config.url` into `workdir` and take the process lock.
    pub fn clone_from(config: &CheckoutConfig, workdir: &Path) -> Result<Self, RepoError> {
        std::fs::create_dir_all(workdir)?;
        let parent = workdir
            .parent()
            .ok_or_else(|| RepoError::Spawn("clone target has no parent".to_owned()))?;
        run_git(
            parent,
            &[
                "clone",
                "-q",
                "--branch",
                &config.branch,
                &config.url,
                &workdir.to_string_lossy(),
            ],
        )?;
        // Provenance notes may not exist yet on a fresh repository.
        let _ = run_git(
            workdir,
            &["fetch", "-q", "origin", &format!("{NOTES_REF}:{NOTES_REF}")],
        );
        info!("cloned {} into {}", config.url, workdir.display());
        Self::open(workdir, &config.branch, config.path.as_deref())
    }

    /// Attach to an existing working copy.
    pub fn open(dir: &Path, branch: &str, path: Option<&str>) -> Result<Self, RepoError> {
        let dir = dir.to_path_buf();
        let manifest_dir = match path {
            Some(sub) => dir.join(sub),
            None => dir.clone(),
        };
        let process_lock = ProcessLock::acquire(&dir.join(".git").join("caravel.lock"))?;
        Ok(Self {
            tree: RwLock::new(WorkTree {
                dir,
                branch: branch.to_owned(),
                manifest_dir,
            }),
            _process_lock: process_lock,
        })
    }

    /// Run `f` with the shared (read) lock held. Generic over the error so
    /// callers can thread their own error type through the guard.
    pub fn with_read<T, E>(&self, f: impl FnOnce(&WorkTree) -> Result<T, E>) -> Result<T, E> {
        let tree = self.tree.read().expect("checkout lock poisoned");
        f(&tree)
    }

    /// Run `f` with the exclusive (write) lock held.
    pub fn with_write<T, E>(&self, f: impl FnOnce(&mut WorkTree) -> Result<T, E>) -> Result<T, E> {
        let mut tree = self.tree.write().expect("checkout lock poisoned");
        f(&mut tree)
    }

    /// Non-blocking variant of [`Checkout::with_write`]; `Ok(None)` when a
    /// reader or writer currently holds the lock.
    pub fn try_with_write<T, E>(
        &self,
        f: impl FnOnce(&mut WorkTree) -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        match self.tree.try_write() {
            Ok(mut tree) => f(&mut tree).map(Some),
            Err(std::sync::TryLockError::WouldBlock) => Ok(None),
            Err(std::sync::TryLockError::Poisoned(_)) => panic!("checkout lock poisoned"),
        }
    }

    pub fn head_revision(&self) -> Result<Revision, RepoError> {
        self.with_read(|tree| tree.head_revision())
    }
}
