use crate::SessionConfig;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TruncationMode {
    HeadTail,
    Tail,
}

const FALLBACK_CHAR_LIMIT: usize = 30_000;

fn builtin_char_limits() -> &'static HashMap<&'static str, usize> {
    static LIMITS: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    LIMITS.get_or_init(|| {
        HashMap::from([
            ("read_file", 50_000),
            ("shell", 30_000),
            ("grep", 20_000),
            ("glob", 20_000),
            ("edit_file", 10_000),
            ("apply_patch", 10_000),
            ("write_file", 1_000),
            ("spawn_agent", 20_000),
        ])
    })
}

fn builtin_line_limits() -> &'static HashMap<&'static str, usize> {
    static LIMITS: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    LIMITS.get_or_init(|| HashMap::from([("shell", 256), ("grep", 200), ("glob", 500)]))
}

pub fn truncation_mode_for_tool(tool_name: &str) -> TruncationMode {
    match tool_name {
        "grep" | "glob" | "edit_file" | "apply_patch" | "write_file" => TruncationMode::Tail,
        _ => TruncationMode::HeadTail,
    }
}

/// Two-stage shrink applied to every raw tool output before it becomes a
/// tool result: characters first (the hard bound), then lines.
pub fn truncate_tool_output(output: &str, tool_name: &str, config: &SessionConfig) -> String {
    let max_chars = config
        .tool_char_limits
        .get(tool_name)
        .copied()
        .or_else(|| builtin_char_limits().get(tool_name).copied())
        .unwrap_or(FALLBACK_CHAR_LIMIT);
    let mode = truncation_mode_for_tool(tool_name);
    let result = truncate_chars(output, max_chars, mode);

    let max_lines = config
        .tool_line_limits
        .get(tool_name)
        .copied()
        .or_else(|| builtin_line_limits().get(tool_name).copied());
    match max_lines {
        Some(limit) => truncate_lines(&result, limit),
        None => result,
    }
}

/// Character truncation. `HeadTail` keeps both ends around a marker;
/// `Tail` keeps the end. Counts are `char`-based so multi-byte content
/// never splits mid-scalar.
pub fn truncate_chars(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let removed = total - max_chars;

    match mode {
        TruncationMode::HeadTail => {
            let head = max_chars / 2;
            let tail = max_chars - head;
            format!(
                "{}\n\n[WARNING: Tool output was truncated. {} characters were removed from the middle. The full output is available in the event stream. If you need to see specific parts, re-run the tool with more targeted parameters.]\n\n{}",
                head_chars(output, head),
                removed,
                tail_chars(output, tail),
            )
        }
        TruncationMode::Tail => format!(
            "[WARNING: Tool output was truncated. First {} characters were removed. The full output is available in the event stream.]\n\n{}",
            removed,
            tail_chars(output, max_chars),
        ),
    }
}

/// Line truncation: keep the first `limit/2` and last `limit - limit/2`
/// lines around an omission marker.
pub fn truncate_lines(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= max_lines {
        return output.to_string();
    }

    let head = max_lines / 2;
    let tail = max_lines - head;
    let omitted = lines.len() - head - tail;
    format!(
        "{}\n[... {} lines omitted ...]\n{}",
        lines[..head].join("\n"),
        omitted,
        lines[lines.len() - tail..].join("\n"),
    )
}

fn head_chars(input: &str, count: usize) -> String {
    input.chars().take(count).collect()
}

fn tail_chars(input: &str, count: usize) -> String {
    let total = input.chars().count();
    input.chars().skip(total.saturating_sub(count)).collect()
}
