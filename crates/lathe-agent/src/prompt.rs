//! System prompt assembly: environment and git context blocks, tool
//! descriptions, and project instruction discovery.

use crate::ExecutionEnvironment;
use lathe_llm::ToolDefinition;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Total byte budget for project instruction files.
pub const PROJECT_DOC_BYTE_BUDGET: usize = 32 * 1024;
const PROJECT_DOC_TRUNCATION_MARKER: &str = "[Project instructions truncated at 32KB]";

/// Instruction file loaded for every provider.
const SHARED_INSTRUCTION_FILE: &str = "AGENTS.md";

/// Assemble the full system prompt document: base instructions,
/// environment block, git context, tool descriptions, then project
/// instructions.
pub fn assemble_system_prompt(
    base_prompt: &str,
    env: &dyn ExecutionEnvironment,
    model: &str,
    tool_definitions: &[ToolDefinition],
    project_docs: &str,
) -> String {
    let mut prompt = String::with_capacity(base_prompt.len() + 2_048);
    prompt.push_str(base_prompt);
    prompt.push_str("\n\n");
    prompt.push_str(&build_environment_block(env, model));
    prompt.push_str("\n\n");

    if let Some(git_context) = build_git_context(env.working_directory()) {
        prompt.push_str(&git_context);
        prompt.push_str("\n\n");
    }

    prompt.push_str("# Available Tools\n\n");
    for definition in tool_definitions {
        let _ = writeln!(prompt, "## {}\n{}\n", definition.name, definition.description);
    }

    if !project_docs.is_empty() {
        prompt.push_str("# Project Instructions\n\n");
        prompt.push_str(project_docs);
        prompt.push_str("\n\n");
    }

    prompt
}

/// The `<environment>` block: working directory, git flag and branch,
/// platform, OS, date, and model.
pub fn build_environment_block(env: &dyn ExecutionEnvironment, model: &str) -> String {
    let working_dir = env.working_directory();
    let repository_root = find_git_root(working_dir);

    let mut block = String::from("<environment>\n");
    let _ = writeln!(block, "Working directory: {}", working_dir.display());
    let _ = writeln!(block, "Is git repository: {}", repository_root.is_some());
    if let Some(branch) = repository_root.as_deref().and_then(git_branch) {
        let _ = writeln!(block, "Git branch: {branch}");
    }
    let _ = writeln!(block, "Platform: {}", env.platform());
    let _ = writeln!(block, "OS version: {}", env.os_version());
    let _ = writeln!(block, "Today's date: {}", current_date());
    if !model.is_empty() {
        let _ = writeln!(block, "Model: {model}");
    }
    block.push_str("</environment>");
    block
}

/// The `<git_context>` block, or None outside a repository.
pub fn build_git_context(working_dir: &Path) -> Option<String> {
    let root = find_git_root(working_dir)?;

    let mut block = String::from("<git_context>\n");
    if let Some(branch) = git_branch(&root) {
        let _ = writeln!(block, "Branch: {branch}");
    }
    if let Some(status) = run_git(&root, &["status", "--short"]) {
        let changed = status.lines().filter(|line| !line.trim().is_empty()).count();
        let _ = writeln!(block, "Modified/untracked files: {changed}");
    }
    if let Some(log) = run_git(&root, &["log", "--oneline", "-10"]) {
        if !log.trim().is_empty() {
            block.push_str("Recent commits:\n");
            block.push_str(log.trim_end());
            block.push('\n');
        }
    }
    block.push_str("</git_context>");
    Some(block)
}

/// Load project instruction files walking from the git root (or the
/// working directory when there is no repository) down to the working
/// directory. `AGENTS.md` always loads; `provider_file` adds the
/// provider's own file. The combined content is capped at 32 KiB.
pub fn discover_project_docs(working_dir: &Path, provider_file: Option<&str>) -> String {
    let root = find_git_root(working_dir).unwrap_or_else(|| working_dir.to_path_buf());

    let mut instruction_files = vec![SHARED_INSTRUCTION_FILE.to_string()];
    if let Some(file) = provider_file {
        instruction_files.push(file.to_string());
    }

    let mut sections = Vec::new();
    let mut used_bytes = 0usize;

    for directory in path_chain(&root, working_dir) {
        for file_name in &instruction_files {
            let candidate = directory.join(file_name);
            let Ok(content) = std::fs::read_to_string(&candidate) else {
                continue;
            };

            let remaining = PROJECT_DOC_BYTE_BUDGET.saturating_sub(used_bytes);
            if remaining == 0 {
                sections.push(PROJECT_DOC_TRUNCATION_MARKER.to_string());
                return sections.join("\n\n---\n\n");
            }

            let mut text = content;
            if text.len() > remaining {
                text = format!(
                    "{}\n{}",
                    truncate_to_byte_boundary(&text, remaining),
                    PROJECT_DOC_TRUNCATION_MARKER
                );
            }
            used_bytes += text.len();
            sections.push(format!(
                "# {} (from {})\n\n{}",
                file_name,
                directory.display(),
                text
            ));
        }
    }

    sections.join("\n\n---\n\n")
}

/// Directories from `root` down to `target`, both inclusive. Falls back
/// to just `target` when it is not under `root`.
fn path_chain(root: &Path, target: &Path) -> Vec<PathBuf> {
    let root = canonicalize_or_self(root);
    let target = canonicalize_or_self(target);
    if root == target {
        return vec![root];
    }
    if !target.starts_with(&root) {
        return vec![target];
    }

    let mut chain = Vec::new();
    let mut current = target.as_path();
    loop {
        chain.push(current.to_path_buf());
        if current == root {
            break;
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return vec![target],
        }
    }
    chain.reverse();
    chain
}

fn canonicalize_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn truncate_to_byte_boundary(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let start = canonicalize_or_self(start);
    start
        .ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}

fn git_branch(root: &Path) -> Option<String> {
    run_git(root, &["rev-parse", "--abbrev-ref", "HEAD"]).map(|branch| branch.trim().to_string())
}

fn run_git(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

fn current_date() -> String {
    #[cfg(not(windows))]
    let command = ("date", ["+%Y-%m-%d"]);
    #[cfg(windows)]
    let command = ("cmd", ["/C", "echo %date%"]);

    if let Ok(output) = Command::new(command.0).args(command.1).output() {
        if output.status.success() {
            let date = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !date.is_empty() {
                return date;
            }
        }
    }
    "1970-01-01".to_string()
}
