//! `list_files`: sorted directory entries, optionally glob-filtered. Large
//! directories are summarized as a tree of per-directory counts instead of
//! an unbounded listing.

use super::{AgentTool, ToolContext, ToolOutcome, relative_to_root, resolve_path};
use crate::errors::ToolError;
use crate::provider::ToolSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

const MAX_ENTRIES: usize = 500;

/// Directories that are never useful to the agent.
pub(crate) const IGNORED_DIRS: [&str; 8] = [
    ".git",
    ".codeframe",
    "node_modules",
    "target",
    ".venv",
    "venv",
    "__pycache__",
    "dist",
];

pub(crate) fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
    })
}

pub struct ListFilesTool;

#[async_trait]
impl AgentTool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_files".into(),
            description: "List files under a directory, sorted. Supports an optional glob filter \
                          (e.g. **/*.py)."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory, default workspace root" },
                    "glob": { "type": "string", "description": "Glob pattern applied to relative paths" }
                }
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let raw_path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let dir = resolve_path(&ctx.workspace.root, raw_path)?;
        if !dir.is_dir() {
            return Err(ToolError::NotADirectory { path: dir });
        }

        let pattern = match args.get("glob").and_then(|v| v.as_str()) {
            Some(g) => Some(glob::Pattern::new(g).map_err(|e| ToolError::InvalidArgs {
                tool: "list_files",
                message: format!("bad glob: {e}"),
            })?),
            None => None,
        };

        let mut entries: Vec<String> = Vec::new();
        let mut total = 0usize;
        for entry in WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|e| !is_ignored(e.path()))
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_to_root(&ctx.workspace.root, entry.path());
            if let Some(p) = &pattern {
                if !p.matches(&rel) {
                    continue;
                }
            }
            total += 1;
            if entries.len() < MAX_ENTRIES {
                entries.push(rel);
            }
        }
        entries.sort();

        if total > MAX_ENTRIES {
            return Ok(ToolOutcome::text(format!(
                "{total} files (showing directory summary; narrow with a glob)\n{}",
                tree_summary(&dir, &ctx.workspace.root)
            )));
        }
        if entries.is_empty() {
            return Ok(ToolOutcome::text("(no matching files)"));
        }
        Ok(ToolOutcome::text(entries.join("\n")))
    }
}

/// Per-directory file counts, two levels deep.
fn tree_summary(dir: &Path, root: &Path) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_ignored(e.path()))
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let bucket: Vec<_> = rel.components().take(2).collect();
        let key = if bucket.len() > 1 {
            bucket[0].as_os_str().to_string_lossy().to_string() + "/"
        } else {
            ".".to_string()
        };
        *counts.entry(key).or_default() += 1;
    }
    let base = relative_to_root(root, dir);
    counts
        .into_iter()
        .map(|(k, n)| format!("{base}/{k}  ({n} files)"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateSet;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    async fn list(dir: &TempDir, args: serde_json::Value) -> ToolOutcome {
        let workspace = Workspace::init(dir.path()).unwrap();
        let ctx = ToolContext::new(workspace, GateSet::standard());
        ListFilesTool.call(args, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn lists_sorted_and_skips_internal_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/b.py"), "").unwrap();
        std::fs::write(dir.path().join("src/a.py"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let outcome = list(&dir, serde_json::json!({})).await;
        let lines: Vec<&str> = outcome.text.lines().collect();
        // Workspace init drops a .gitignore at the root.
        assert_eq!(lines, vec![".gitignore", "README.md", "src/a.py", "src/b.py"]);
        assert!(!outcome.text.contains(".codeframe"));
    }

    #[tokio::test]
    async fn glob_filters_relative_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "").unwrap();
        std::fs::write(dir.path().join("src/a.js"), "").unwrap();

        let outcome = list(&dir, serde_json::json!({"glob": "**/*.py"})).await;
        assert_eq!(outcome.text, "src/a.py");
    }

    #[tokio::test]
    async fn large_directories_become_a_tree_summary() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("gen")).unwrap();
        for i in 0..600 {
            std::fs::write(dir.path().join(format!("gen/f{i}.txt")), "").unwrap();
        }
        let outcome = list(&dir, serde_json::json!({})).await;
        // 600 generated files plus the workspace .gitignore.
        assert!(outcome.text.contains("601 files"));
        assert!(outcome.text.contains("(600 files)"));
        assert!(outcome.text.lines().count() < 20);
    }
}
