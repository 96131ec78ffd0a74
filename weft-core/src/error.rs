//! The two error universes the engine distinguishes: structural failures
//! that prevent a document from being evaluated at all, and value-level
//! errors that flow through evaluation as ordinary `Value`s.

use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// The closed set of codes a [`crate::value::Value::Error`] may carry.
///
/// This is the complete list from the engine's external error-code
/// surface; nothing evaluates to an error outside this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    UnboundIdentifier,
    UnknownOperator,
    ArityError,
    TypeError,
    DomainError,
    DivideByZero,
    NonTermination,
    ValidationError,
    SelectTimeout,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::UnboundIdentifier => "UnboundIdentifier",
            ErrorCode::UnknownOperator => "UnknownOperator",
            ErrorCode::ArityError => "ArityError",
            ErrorCode::TypeError => "TypeError",
            ErrorCode::DomainError => "DomainError",
            ErrorCode::DivideByZero => "DivideByZero",
            ErrorCode::NonTermination => "NonTermination",
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::SelectTimeout => "SelectTimeout",
        };
        f.write_str(s)
    }
}

/// Structural failures: malformed documents, bad lowering input, missing
/// ids. These never occur mid-evaluation — evaluation only ever produces
/// `Value`s, including `Value::Error`. `WeftError` is for the boundary
/// that parses and validates a document before execution starts.
#[derive(Debug, thiserror::Error)]
pub enum WeftError {
    #[error("node {0} referenced but not defined")]
    UnknownNode(compact_str::CompactString),

    #[error("block {0} referenced but not defined in node {1}")]
    UnknownBlock(compact_str::CompactString, compact_str::CompactString),

    #[error("airDef {0} referenced but not defined")]
    UnknownAirDef(compact_str::CompactString),

    #[error("document result node {0} does not exist")]
    MissingResult(compact_str::CompactString),

    #[error("PIR document must declare major version 2, found {0}")]
    WrongPirVersion(u64),

    #[error("cycle detected among AIR definitions: {0}")]
    Cycle(compact_str::CompactString),

    #[error("malformed document: {0}")]
    Malformed(compact_str::CompactString),
}
