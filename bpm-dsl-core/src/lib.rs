//! bpm-dsl-core: compiler for the text-based BPM process DSL.
//!
//! Pipeline, strictly one-way:
//!
//! ```text
//! source text → parser → AST → validator → emitter → BPMN 2.0 XML
//!                                             │
//!                                             └── layout engine (positions + waypoints)
//! ```
//!
//! Parsing produces an immutable AST; validation is read-only and returns
//! a diagnostics batch; emission expands ProcessEntity sugar in a private
//! working buffer and renders deterministic, Zeebe-compatible XML with a
//! full diagram section. Every invocation is synchronous and shares
//! nothing, so callers may run compiles on as many threads as they like.

pub mod ast;
pub mod diagnostics;
pub mod emitter;
pub mod error;
pub mod layout;
pub mod parser;
pub mod sidecar;
pub mod validator;

// Re-export the types most callers need.
pub use ast::{Element, Flow, Process, ProcessGraph};
pub use diagnostics::{Diagnostic, DiagnosticCode, Report, Severity};
pub use emitter::{emit, emit_with, EmitterConfig};
pub use error::{CompileError, ParseError};
pub use layout::LayoutConfig;
pub use parser::{parse_file, parse_str};
pub use sidecar::OpenApiSidecar;
pub use validator::{validate, validate_with, ValidationOptions};
