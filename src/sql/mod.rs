//! PostgreSQL statements for declared entities. Identifiers come from declarations and are
//! quoted; every value is a bound parameter.

mod builder;
mod params;

pub(crate) use builder::{count, create_table, delete, foreign_keys, insert, quoted, select, update, QueryBuf};
pub(crate) use params::PgBindValue;
