//! `search_codebase`: regex search with matches grouped by file, capped at
//! 50 hits; files past the cap are reported with per-file counts only.

use super::list_files::is_ignored;
use super::{AgentTool, ToolContext, ToolOutcome, relative_to_root, required_str, resolve_path};
use crate::errors::ToolError;
use crate::provider::ToolSpec;
use async_trait::async_trait;
use regex::Regex;
use walkdir::WalkDir;

const MAX_HITS: usize = 50;
const MAX_FILE_SIZE: u64 = 1024 * 1024;

pub struct SearchCodebaseTool;

#[async_trait]
impl AgentTool for SearchCodebaseTool {
    fn name(&self) -> &'static str {
        "search_codebase"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_codebase".into(),
            description: "Search file contents with a regular expression. Results are grouped by \
                          file and capped; use path_prefix to narrow."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression" },
                    "path_prefix": { "type": "string", "description": "Restrict to this subtree" }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let pattern = required_str(&args, "pattern", "search_codebase")?;
        let regex = Regex::new(pattern).map_err(|e| ToolError::InvalidArgs {
            tool: "search_codebase",
            message: format!("invalid regex: {e}"),
        })?;

        let base = match args.get("path_prefix").and_then(|v| v.as_str()) {
            Some(prefix) => resolve_path(&ctx.workspace.root, prefix)?,
            None => ctx.workspace.root.clone(),
        };

        let mut shown = 0usize;
        let mut grouped: Vec<(String, Vec<String>, usize)> = Vec::new();

        for entry in WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_ignored(e.path()))
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };

            let mut lines = Vec::new();
            let mut count = 0usize;
            for (number, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    count += 1;
                    if shown < MAX_HITS {
                        lines.push(format!("  {}: {}", number + 1, line.trim_end()));
                        shown += 1;
                    }
                }
            }
            if count > 0 {
                grouped.push((
                    relative_to_root(&ctx.workspace.root, entry.path()),
                    lines,
                    count,
                ));
            }
        }

        if grouped.is_empty() {
            return Ok(ToolOutcome::text(format!("No matches for /{pattern}/")));
        }

        let total: usize = grouped.iter().map(|(_, _, n)| n).sum();
        let mut out = String::new();
        for (file, lines, count) in &grouped {
            if lines.is_empty() {
                out.push_str(&format!("{file}  ({count} matches, not shown)\n"));
            } else if *count > lines.len() {
                out.push_str(&format!("{file}  ({count} matches, first {} shown)\n", lines.len()));
                out.push_str(&lines.join("\n"));
                out.push('\n');
            } else {
                out.push_str(&format!("{file}\n"));
                out.push_str(&lines.join("\n"));
                out.push('\n');
            }
        }
        if total > MAX_HITS {
            out.push_str(&format!("({total} total matches; showing first {MAX_HITS})\n"));
        }
        Ok(ToolOutcome::text(out.trim_end().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateSet;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    async fn search(dir: &TempDir, args: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        let workspace = Workspace::init(dir.path()).unwrap();
        let ctx = ToolContext::new(workspace, GateSet::standard());
        SearchCodebaseTool.call(args, &ctx).await
    }

    #[tokio::test]
    async fn groups_matches_by_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "import os\nimport sys\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "import os\n").unwrap();

        let outcome = search(&dir, serde_json::json!({"pattern": r"^import"})).await.unwrap();
        assert!(outcome.text.contains("a.py"));
        assert!(outcome.text.contains("b.py"));
        assert!(outcome.text.contains("1: import os"));
    }

    #[tokio::test]
    async fn caps_hits_and_reports_counts() {
        let dir = TempDir::new().unwrap();
        let body: String = (0..80).map(|i| format!("match_{i}\n")).collect();
        std::fs::write(dir.path().join("many.txt"), &body).unwrap();

        let outcome = search(&dir, serde_json::json!({"pattern": "match_"})).await.unwrap();
        assert!(outcome.text.contains("80 matches, first 50 shown"));
        assert!(outcome.text.contains("80 total matches"));
    }

    #[tokio::test]
    async fn invalid_regex_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = search(&dir, serde_json::json!({"pattern": "("})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
    }

    #[tokio::test]
    async fn path_prefix_narrows_search() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "needle\n").unwrap();
        std::fs::write(dir.path().join("docs/b.md"), "needle\n").unwrap();

        let outcome = search(
            &dir,
            serde_json::json!({"pattern": "needle", "path_prefix": "src"}),
        )
        .await
        .unwrap();
        assert!(outcome.text.contains("src/a.py"));
        assert!(!outcome.text.contains("docs/b.md"));
    }
}
