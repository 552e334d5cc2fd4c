//! Git adapter over libgit2.
//!
//! Snapshot commits bracket agent work so per-run change summaries can be
//! computed; checkpoint restore and `patch export` ride the same repo
//! handle. Destructive operations (checkout) are explicit.

use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, Repository, Signature};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Files touched since a snapshot, with aggregate line counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileChangeSummary {
    pub files_added: Vec<PathBuf>,
    pub files_modified: Vec<PathBuf>,
    pub files_deleted: Vec<PathBuf>,
    pub total_lines_added: usize,
    pub total_lines_removed: usize,
}

impl FileChangeSummary {
    pub fn total_files(&self) -> usize {
        self.files_added.len() + self.files_modified.len() + self.files_deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_files() == 0
    }
}

pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Initialize a repository if the directory has none yet.
    pub fn init_if_missing(project_dir: &Path) -> Result<Self> {
        let repo = match Repository::open(project_dir) {
            Ok(repo) => repo,
            Err(_) => Repository::init(project_dir).context("Failed to init git repository")?,
        };
        Ok(Self { repo })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now("codeframe", "codeframe@localhost")?)
    }

    /// Commit the full working tree as a labelled snapshot. Handles the
    /// unborn-branch case (fresh repo with no commits).
    pub fn snapshot(&self, label: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let message = format!("[codeframe] snapshot: {label}");

        let commit_id = if let Some(parent) = self.head_commit() {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?
        } else {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?
        };
        Ok(commit_id.to_string())
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Changes between a snapshot commit and the current working tree.
    pub fn compute_changes(&self, snapshot_sha: &str) -> Result<FileChangeSummary> {
        let snapshot = self
            .repo
            .find_commit(git2::Oid::from_str(snapshot_sha)?)
            .context("Snapshot commit not found")?;
        let diff = self.diff_since(&snapshot)?;

        let mut summary = FileChangeSummary::default();
        for delta in diff.deltas() {
            // Deletions only carry the old side of the pair.
            let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) else {
                continue;
            };
            let bucket = match delta.status() {
                Delta::Added | Delta::Untracked => &mut summary.files_added,
                Delta::Modified => &mut summary.files_modified,
                Delta::Deleted => &mut summary.files_deleted,
                _ => continue,
            };
            bucket.push(path.to_path_buf());
        }

        let line_stats = diff.stats()?;
        summary.total_lines_added = line_stats.insertions();
        summary.total_lines_removed = line_stats.deletions();
        Ok(summary)
    }

    /// Diff from a snapshot commit's tree to the working tree, untracked
    /// files included.
    fn diff_since<'repo>(
        &'repo self,
        snapshot: &git2::Commit<'repo>,
    ) -> Result<git2::Diff<'repo>> {
        let mut options = DiffOptions::new();
        options.include_untracked(true).show_untracked_content(true);
        Ok(self
            .repo
            .diff_tree_to_workdir_with_index(Some(&snapshot.tree()?), Some(&mut options))?)
    }

    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head().context("Repository has no HEAD")?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    pub fn create_branch(&self, name: &str) -> Result<()> {
        let commit = self
            .head_commit()
            .context("Cannot branch from an unborn HEAD")?;
        self.repo.branch(name, &commit, false)?;
        self.repo.set_head(&format!("refs/heads/{name}"))?;
        Ok(())
    }

    /// Commit all pending changes; returns the new commit hash.
    pub fn commit(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;

        let commit_id = if let Some(parent) = self.head_commit() {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?
        } else {
            self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?
        };
        Ok(commit_id.to_string())
    }

    /// Export the diff between HEAD and the working tree as a patch file.
    pub fn export_patch(&self, out_path: &Path) -> Result<PathBuf> {
        let mut opts = DiffOptions::new();
        opts.include_untracked(true).show_untracked_content(true);

        let head_tree = self.head_commit().map(|c| c.tree()).transpose()?;
        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?;

        let mut patch = Vec::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => patch.push(line.origin() as u8),
                _ => {}
            }
            patch.extend_from_slice(line.content());
            true
        })?;

        std::fs::write(out_path, &patch)
            .with_context(|| format!("Failed to write patch to {}", out_path.display()))?;
        Ok(out_path.to_path_buf())
    }

    /// Hard checkout of a ref or commit sha. Destructive: discards working
    /// tree changes.
    pub fn checkout(&self, reference: &str) -> Result<()> {
        let (object, refname) = self
            .repo
            .revparse_ext(reference)
            .with_context(|| format!("Unknown git reference '{reference}'"))?;

        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        self.repo.checkout_tree(&object, Some(&mut checkout))?;

        match refname {
            Some(r) => self.repo.set_head(r.name().context("Invalid ref name")?)?,
            None => self.repo.set_head_detached(object.id())?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo_fixture() -> (TempDir, GitTracker) {
        let dir = TempDir::new().unwrap();
        let tracker = GitTracker::init_if_missing(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        tracker.snapshot("initial").unwrap();
        (dir, tracker)
    }

    #[test]
    fn snapshot_and_change_summary() {
        let (dir, tracker) = repo_fixture();
        let before = tracker.snapshot("before work").unwrap();

        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "new file\n").unwrap();

        let changes = tracker.compute_changes(&before).unwrap();
        assert_eq!(changes.files_modified, vec![PathBuf::from("a.txt")]);
        assert_eq!(changes.files_added, vec![PathBuf::from("b.txt")]);
        assert!(changes.total_lines_added >= 2);
        assert_eq!(changes.total_files(), 2);
    }

    #[test]
    fn branch_create_and_current() {
        let (_dir, tracker) = repo_fixture();
        tracker.create_branch("feature/auth").unwrap();
        assert_eq!(tracker.current_branch().unwrap(), "feature/auth");
    }

    #[test]
    fn commit_then_checkout_restores_content() {
        let (dir, tracker) = repo_fixture();
        let first = tracker.commit("first state").unwrap();

        std::fs::write(dir.path().join("a.txt"), "changed\n").unwrap();
        tracker.commit("second state").unwrap();

        tracker.checkout(&first).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\n"
        );
    }

    #[test]
    fn export_patch_captures_working_changes() {
        let (dir, tracker) = repo_fixture();
        std::fs::write(dir.path().join("a.txt"), "one\npatched\n").unwrap();

        let out = dir.path().join("work.patch");
        tracker.export_patch(&out).unwrap();
        let patch = std::fs::read_to_string(&out).unwrap();
        assert!(patch.contains("+patched"));
        assert!(patch.contains("a.txt"));
    }
}
