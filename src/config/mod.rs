//! Server configuration: option types and environment loading.

mod loader;
mod types;

pub use types::*;
