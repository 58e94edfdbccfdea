//! Command Module - Intercepted command representation
//!
//! Raw command + execution context in, immutable `CommandEvent` and a
//! structured `ParsedCommand` out.

pub mod event;
pub mod parser;

pub use event::{
    detect_git_branch, CommandEvent, CommandRequest, EnvironmentFingerprint, ExecutionContext,
};
pub use parser::{parse, Operator, ParseAnomaly, ParsedCommand, Redirect, Segment};
