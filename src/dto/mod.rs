//! Value objects: named field sets that shape rows for output and build storage queries.

mod field;
mod query;
mod value_object;

pub use field::{Expression, ExpressionContext, ExpressionFn, FieldSpec, RenderFn};
pub use query::{Attribute, Filters, Include, QueryOptions, Row, SortDirection};
pub use value_object::{QueryHook, QueryScope, ValueObject};
