//! Channel layer: session primitives and prompt detection.
//!
//! This module handles the interactive session seam and decides when a
//! command's output has finished, including ANSI stripping.

mod buffer;
mod detector;
mod patterns;
mod session;

pub use buffer::PatternBuffer;
pub use detector::{
    CompletionPolicy, Detection, DetectorState, PollBackoff, PromptDetector, StreamingHeuristic,
};
pub use patterns::{DEFAULT_TERMINATOR, PromptGrammar, RegexGrammar, compile_prompt_pattern};
pub use session::{Connector, SessionChannel};
