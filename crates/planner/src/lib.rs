//! Planner-side boundary types shipped with execution node descriptors.
//!
//! Key modules:
//! - [`projection`]: top-N projection and the projection envelope
//! - [`symbol`]: sort-key expressions
//! - [`stream`]: the variable-length binary stream both are written to

pub mod projection;
pub mod stream;
pub mod symbol;

pub use projection::{
    Limit, OrderBy, Projection, ProjectionType, TopNProjection, read_projections,
    write_projections,
};
pub use stream::{StreamInput, StreamOutput};
pub use symbol::{LiteralValue, Symbol};
