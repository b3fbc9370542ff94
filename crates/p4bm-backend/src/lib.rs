//! JSON back end for the behavioral-model software switch.
//!
//! Lowers a typed program (see the `p4bm-ir` crate) into the JSON
//! configuration document the runtime consumes. Conversion runs three
//! phases over the immutable input:
//!
//! 1. checksum-block copy propagation, folding temporaries the runtime's
//!    side-effect-free checksum extern cannot express;
//! 2. program-wide expression lowering (slices, concatenations, negation,
//!    bool<->bit casts, shift-amount limits);
//! 3. single-pass emission of headers, parser, pipelines, actions,
//!    deparser, checksums, and the extern arrays.
//!
//! User errors accumulate in a diagnostics sink; the orchestrator checks
//! the count at fixed checkpoints and aborts the emit once it is non-zero.

pub mod arith;
pub mod cfg;
pub mod checksum;
pub mod control;
pub mod deparser;
pub mod diag;
pub mod expression;
pub mod json;
pub mod lower;
pub mod method;
pub mod parser;
pub mod program;
pub mod table;

use serde_json::Value;

use p4bm_ir::{Program, RefMap, SwitchModel, TypeMap};

pub use diag::{ConvertError, Diagnostic, Diagnostics, Warning};
pub use program::ProgramConverter;

/// Knobs of one conversion. File handling lives with the embedder; the
/// back end only records the source path in the output document.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Source file recorded under the `program` key.
    pub source: Option<String>,
}

/// Converts a program to the runtime's JSON configuration.
///
/// # Errors
///
/// Returns [`ConvertError::Failed`] carrying every accumulated diagnostic
/// when the input uses constructs the target cannot express.
pub fn convert(
    program: &mut Program,
    refs: &mut RefMap,
    types: &mut TypeMap,
    model: &SwitchModel,
    options: &BackendOptions,
) -> Result<Value, ConvertError> {
    let mut diags = Diagnostics::new();

    checksum::fixup_checksum(program, refs, types, &mut diags);
    lower::lower_program(program, refs, types, model, &mut diags);
    if diags.error_count() > 0 {
        let (errors, warnings) = diags.into_parts();
        return Err(ConvertError::Failed { errors, warnings });
    }

    ProgramConverter::new(program, refs, types, model, options, diags).convert()
}
