//! Data model for progressive document processing.
//!
//! A source document is split into [`Unit`]s, each unit yields typed
//! [`SubElement`]s, and everything is aggregated into a single
//! [`ProgressiveSchema`] that later stages only ever add to.

mod element;
mod outline;
mod schema;
mod status;
mod unit;

pub use element::{
    bounded_snippet, context_window, is_confined, ElementKind, MediaDescription, Payload,
    SubElement, CONTEXT_SNIPPET_MAX,
};
pub use outline::{root_node, validate_outline, StructuralNode};
pub use schema::{
    ChapterSummary, DerivedQuestion, DocumentSummary, ProgressiveSchema, UnitRecord,
    SCHEMA_VERSION,
};
pub use status::ProcessingStatus;
pub use unit::{
    unit_workdir, ElementIds, FailureKind, Unit, UnitFailure, UnitOutput, UnitSource,
};
