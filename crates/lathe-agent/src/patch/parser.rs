use super::types::{Hunk, HunkLine, PatchOperation};
use crate::ToolError;

const BEGIN_MARKER: &str = "*** Begin Patch";
const END_MARKER: &str = "*** End Patch";
const ADD_PREFIX: &str = "*** Add File: ";
const DELETE_PREFIX: &str = "*** Delete File: ";
const UPDATE_PREFIX: &str = "*** Update File: ";
const MOVE_PREFIX: &str = "*** Move to: ";
const EOF_SENTINEL: &str = "*** End of File";

/// Parse a v4a patch into an ordered list of file operations.
///
/// Framing is strict (`*** Begin Patch` / `*** End Patch` required);
/// application-level leniency (skipping unmatched hunks) lives in the
/// applier, not here.
pub fn parse_patch(patch: &str) -> Result<Vec<PatchOperation>, ToolError> {
    let lines: Vec<&str> = patch.lines().collect();
    if lines.first().map(|line| line.trim()) != Some(BEGIN_MARKER) {
        return Err(ToolError::Validation(format!(
            "patch must start with '{BEGIN_MARKER}'"
        )));
    }
    if lines.last().map(|line| line.trim()) != Some(END_MARKER) {
        return Err(ToolError::Validation(format!(
            "patch must end with '{END_MARKER}'"
        )));
    }

    let body = &lines[1..lines.len() - 1];
    let mut operations = Vec::new();
    let mut index = 0usize;

    while index < body.len() {
        let line = body[index];
        if line.trim().is_empty() {
            index += 1;
            continue;
        }

        if let Some(path) = line.strip_prefix(ADD_PREFIX) {
            index += 1;
            let mut added = Vec::new();
            while index < body.len() && !is_operation_start(body[index]) {
                let Some(content) = body[index].strip_prefix('+') else {
                    return Err(ToolError::Validation(format!(
                        "invalid add-file line: '{}'",
                        body[index]
                    )));
                };
                added.push(content.to_string());
                index += 1;
            }
            operations.push(PatchOperation::AddFile {
                path: path.trim().to_string(),
                lines: added,
            });
            continue;
        }

        if let Some(path) = line.strip_prefix(DELETE_PREFIX) {
            operations.push(PatchOperation::DeleteFile {
                path: path.trim().to_string(),
            });
            index += 1;
            continue;
        }

        if let Some(path) = line.strip_prefix(UPDATE_PREFIX) {
            index += 1;
            let mut move_to = None;
            if index < body.len() {
                if let Some(target) = body[index].strip_prefix(MOVE_PREFIX) {
                    move_to = Some(target.trim().to_string());
                    index += 1;
                }
            }

            let (hunks, consumed) = parse_hunks(&body[index..], path)?;
            index += consumed;
            operations.push(PatchOperation::UpdateFile {
                path: path.trim().to_string(),
                move_to,
                hunks,
            });
            continue;
        }

        return Err(ToolError::Validation(format!(
            "unrecognized patch line: '{line}'"
        )));
    }

    if operations.is_empty() {
        return Err(ToolError::Validation(
            "patch contains no operations".to_string(),
        ));
    }
    Ok(operations)
}

fn parse_hunks<'a>(body: &[&'a str], path: &str) -> Result<(Vec<Hunk>, usize), ToolError> {
    let mut hunks = Vec::new();
    let mut index = 0usize;

    while index < body.len() && !is_operation_start(body[index]) {
        let header = body[index];
        if header.trim().is_empty() {
            index += 1;
            continue;
        }
        if !header.starts_with("@@") {
            return Err(ToolError::Validation(format!(
                "expected '@@' hunk header in update of '{path}', found '{header}'"
            )));
        }
        index += 1;

        let mut hunk_lines = Vec::new();
        while index < body.len()
            && !is_operation_start(body[index])
            && !body[index].starts_with("@@")
        {
            let line = body[index];
            if line == EOF_SENTINEL {
                hunk_lines.push(HunkLine::EndOfFile);
                index += 1;
                continue;
            }
            let parsed = match line.chars().next() {
                Some(' ') => HunkLine::Context(line[1..].to_string()),
                Some('-') => HunkLine::Delete(line[1..].to_string()),
                Some('+') => HunkLine::Add(line[1..].to_string()),
                // A fully blank line inside a hunk is empty context.
                None => HunkLine::Context(String::new()),
                Some(other) => {
                    return Err(ToolError::Validation(format!(
                        "invalid hunk line prefix '{other}' in update of '{path}'"
                    )));
                }
            };
            hunk_lines.push(parsed);
            index += 1;
        }

        if hunk_lines.is_empty() {
            return Err(ToolError::Validation(format!(
                "empty hunk in update of '{path}'"
            )));
        }
        hunks.push(Hunk {
            header: header.to_string(),
            lines: hunk_lines,
        });
    }

    if hunks.is_empty() {
        return Err(ToolError::Validation(format!(
            "update of '{path}' has no hunks"
        )));
    }
    Ok((hunks, index))
}

fn is_operation_start(line: &str) -> bool {
    line.starts_with(ADD_PREFIX) || line.starts_with(DELETE_PREFIX) || line.starts_with(UPDATE_PREFIX)
}
