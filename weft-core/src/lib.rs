//! `weft-core`: the document model, expression evaluator, CFG (LIR)
//! evaluator, and EIR→LIR lowering pass for the Weft intermediate
//! representation execution engine.
//!
//! This crate is self-sufficient for AIR/CIR/EIR/LIR documents. PIR
//! documents (the async extension) parse and validate here, but their
//! async instructions/terminators only *run* once paired with an
//! [`cfg::AsyncHost`] — see `weft-rt`, which owns the scheduler, channel
//! store, and race/deadlock detectors.

pub mod cfg;
pub mod doc;
pub mod env;
pub mod error;
pub mod expr;
pub mod lower;
pub mod orchestrate;
pub mod registry;
pub mod validate;
pub mod value;

pub use doc::Document;
pub use error::{ErrorCode, WeftError};
pub use value::Value;
