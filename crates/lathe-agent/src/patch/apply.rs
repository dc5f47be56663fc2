use super::types::{Hunk, HunkLine, PatchOperation};
use crate::{ExecutionEnvironment, ToolError};
use std::sync::Arc;

/// Replay parsed operations against the environment and return a summary
/// line per file.
///
/// Deletions are recorded in the summary without touching the
/// filesystem. A hunk whose context cannot be located is skipped rather
/// than failing the whole patch.
pub async fn apply_patch_operations(
    operations: &[PatchOperation],
    env: Arc<dyn ExecutionEnvironment>,
) -> Result<String, ToolError> {
    let mut summary = Vec::new();

    for operation in operations {
        match operation {
            PatchOperation::AddFile { path, lines } => {
                env.write_file(path, &lines.join("\n")).await.map_err(|error| {
                    ToolError::Execution(format!("failed to create {path}: {error}"))
                })?;
                summary.push(format!("Created: {path}"));
            }
            PatchOperation::DeleteFile { path } => {
                summary.push(format!("Deleted: {path}"));
            }
            PatchOperation::UpdateFile {
                path,
                move_to,
                hunks,
            } => {
                let content = env.read_file_raw(path).await.map_err(|error| {
                    ToolError::Execution(format!("cannot read {path} for update: {error}"))
                })?;
                let updated = apply_hunks(&content, hunks);

                let target = move_to.as_deref().unwrap_or(path);
                env.write_file(target, &updated).await.map_err(|error| {
                    ToolError::Execution(format!("failed to write {target}: {error}"))
                })?;

                if let Some(new_path) = move_to {
                    summary.push(format!("Updated and moved: {path} -> {new_path}"));
                } else {
                    summary.push(format!("Updated: {path}"));
                }
            }
        }
    }

    if summary.is_empty() {
        return Ok("No operations performed.".to_string());
    }
    Ok(summary.join("\n"))
}

fn apply_hunks(content: &str, hunks: &[Hunk]) -> String {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines = split_lines(content);

    for hunk in hunks {
        let anchor = anchor_lines(hunk);
        let Some(position) = find_anchor(&lines, &anchor) else {
            tracing::debug!(header = %hunk.header, "hunk context not found; skipping");
            continue;
        };

        let mut rebuilt: Vec<String> = lines[..position].to_vec();
        let mut cursor = position;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(_) => {
                    if cursor < lines.len() {
                        rebuilt.push(lines[cursor].clone());
                        cursor += 1;
                    }
                }
                HunkLine::Delete(_) => cursor += 1,
                HunkLine::Add(content) => rebuilt.push(content.clone()),
                HunkLine::EndOfFile => {}
            }
        }
        rebuilt.extend_from_slice(&lines[cursor.min(lines.len())..]);
        lines = rebuilt;
    }

    let mut updated = lines.join("\n");
    if had_trailing_newline && !updated.is_empty() {
        updated.push('\n');
    }
    updated
}

/// Lines that locate a hunk in the file: the leading run of context and
/// delete lines.
fn anchor_lines(hunk: &Hunk) -> Vec<&str> {
    let mut anchor = Vec::new();
    for line in &hunk.lines {
        match line {
            HunkLine::Context(text) | HunkLine::Delete(text) => anchor.push(text.as_str()),
            HunkLine::Add(_) | HunkLine::EndOfFile => break,
        }
    }
    anchor
}

/// First position whose lines match the anchor, comparing with trailing
/// whitespace trimmed.
fn find_anchor(lines: &[String], anchor: &[&str]) -> Option<usize> {
    if anchor.is_empty() {
        return None;
    }
    let trim = |s: &str| s.trim_end_matches([' ', '\t']).to_string();
    let wanted: Vec<String> = anchor.iter().map(|line| trim(line)).collect();

    (0..=lines.len().checked_sub(anchor.len())?).find(|&start| {
        wanted
            .iter()
            .enumerate()
            .all(|(offset, expected)| trim(&lines[start + offset]) == *expected)
    })
}

fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    if content.ends_with('\n') {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::parse_patch;
    use crate::LocalExecutionEnvironment;
    use tempfile::tempdir;

    fn hunk(lines: Vec<HunkLine>) -> Hunk {
        Hunk {
            header: "@@ test".to_string(),
            lines,
        }
    }

    #[test]
    fn replaces_matched_lines_in_place() {
        let hunks = vec![hunk(vec![
            HunkLine::Context("fn main() {".to_string()),
            HunkLine::Delete("    old();".to_string()),
            HunkLine::Add("    new();".to_string()),
        ])];
        let updated = apply_hunks("fn main() {\n    old();\n}\n", &hunks);
        assert_eq!(updated, "fn main() {\n    new();\n}\n");
    }

    #[test]
    fn unmatched_hunk_is_skipped_not_fatal() {
        let hunks = vec![
            hunk(vec![
                HunkLine::Delete("not present".to_string()),
                HunkLine::Add("replacement".to_string()),
            ]),
            hunk(vec![
                HunkLine::Delete("b".to_string()),
                HunkLine::Add("B".to_string()),
            ]),
        ];
        let updated = apply_hunks("a\nb\nc\n", &hunks);
        // First hunk found no anchor; second still applied.
        assert_eq!(updated, "a\nB\nc\n");
    }

    #[test]
    fn anchor_comparison_ignores_trailing_whitespace() {
        let hunks = vec![hunk(vec![
            HunkLine::Delete("line one".to_string()),
            HunkLine::Add("line 1".to_string()),
        ])];
        let updated = apply_hunks("line one   \nline two\n", &hunks);
        assert_eq!(updated, "line 1\nline two\n");
    }

    #[tokio::test]
    async fn full_patch_round_trip_through_the_environment() {
        let dir = tempdir().expect("tempdir");
        let env: Arc<dyn ExecutionEnvironment> =
            Arc::new(LocalExecutionEnvironment::new(dir.path()));
        env.write_file("greet.py", "def greet():\n    print('hi')\n")
            .await
            .expect("write");

        let patch = "\
*** Begin Patch
*** Add File: notes.txt
+remember
*** Update File: greet.py
@@ greeting
 def greet():
-    print('hi')
+    print('hello')
*** Delete File: obsolete.txt
*** End Patch";

        let operations = parse_patch(patch).expect("parse");
        let summary = apply_patch_operations(&operations, env.clone())
            .await
            .expect("apply");

        assert_eq!(
            summary,
            "Created: notes.txt\nUpdated: greet.py\nDeleted: obsolete.txt"
        );
        assert_eq!(
            env.read_file_raw("greet.py").await.expect("read"),
            "def greet():\n    print('hello')\n"
        );
        assert_eq!(env.read_file_raw("notes.txt").await.expect("read"), "remember");
        // Delete is summary-only.
        assert!(!env.file_exists("obsolete.txt").await);
    }

    #[tokio::test]
    async fn update_with_move_writes_the_new_path() {
        let dir = tempdir().expect("tempdir");
        let env: Arc<dyn ExecutionEnvironment> =
            Arc::new(LocalExecutionEnvironment::new(dir.path()));
        env.write_file("old_name.txt", "payload\n").await.expect("write");

        let patch = "\
*** Begin Patch
*** Update File: old_name.txt
*** Move to: new_name.txt
@@ payload
-payload
+payload v2
*** End Patch";

        let operations = parse_patch(patch).expect("parse");
        let summary = apply_patch_operations(&operations, env.clone())
            .await
            .expect("apply");
        assert_eq!(summary, "Updated and moved: old_name.txt -> new_name.txt");
        assert_eq!(
            env.read_file_raw("new_name.txt").await.expect("read"),
            "payload v2\n"
        );
    }
}
