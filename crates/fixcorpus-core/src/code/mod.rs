//! Source-level analysis: diffs, tokens, spans and function extents.

pub mod extent;
pub mod patch;
pub mod span;
pub mod tokenizer;

pub use extent::{enclosing_function, find_function, function_extents, scrub, FunctionExtent};
pub use patch::{parse_patch, PatchError};
pub use span::{find_verbatim, normalize_candidate, span_at, span_from_lines, LineIndex, SpanMatch};
pub use tokenizer::{count_tokens, normalize_whitespace, same_token_stream, strip_comments, tokens};
