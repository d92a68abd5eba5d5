//! Type registry: field kinds with documentation, storage and coercion projections.

mod coerce;
mod descriptor;
mod storage;

pub use coerce::Coerced;
pub use descriptor::*;
pub use storage::*;
