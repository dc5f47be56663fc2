//! v4a patch engine: a pure parser over the `*** Begin Patch` framing and
//! an applier that replays the parsed operations against an execution
//! environment.

mod apply;
mod parser;
mod types;

pub use apply::apply_patch_operations;
pub use parser::parse_patch;
pub use types::{Hunk, HunkLine, PatchOperation};
