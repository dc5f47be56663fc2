use crate::turn::Turn;
use lathe_llm::ToolCall;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Deterministic signature for a tool call: the tool name plus a short
/// hash of its canonical argument JSON.
pub fn tool_call_signature(call: &ToolCall) -> String {
    let digest = Sha256::digest(call.arguments_json().as_bytes());
    let mut signature = String::with_capacity(call.name.len() + 17);
    signature.push_str(&call.name);
    signature.push(':');
    for byte in &digest[..8] {
        let _ = write!(signature, "{byte:02x}");
    }
    signature
}

/// The last `count` tool-call signatures in chronological order, reading
/// backward through assistant turns.
fn recent_signatures(history: &[Turn], count: usize) -> Vec<String> {
    let mut signatures = Vec::with_capacity(count);
    for turn in history.iter().rev() {
        if signatures.len() >= count {
            break;
        }
        if let Turn::Assistant(turn) = turn {
            for call in turn.tool_calls.iter().rev() {
                if signatures.len() >= count {
                    break;
                }
                signatures.push(tool_call_signature(call));
            }
        }
    }
    signatures.reverse();
    signatures
}

/// True when the last `window_size` tool calls repeat a pattern of
/// length 1, 2, or 3. Fewer than `window_size` calls never trips.
pub fn detect_loop(history: &[Turn], window_size: usize) -> bool {
    if window_size == 0 {
        return false;
    }

    let signatures = recent_signatures(history, window_size);
    if signatures.len() < window_size {
        return false;
    }

    for pattern_len in 1..=3usize {
        if window_size % pattern_len != 0 {
            continue;
        }
        let pattern = &signatures[..pattern_len];
        if signatures
            .chunks(pattern_len)
            .all(|chunk| chunk == pattern)
        {
            return true;
        }
    }
    false
}
