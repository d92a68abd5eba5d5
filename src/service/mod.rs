//! Transactional repository: business functions run against one transaction each.

mod paging;
mod repository;
mod transactional;

pub use paging::{Page, PageRequest, DEFAULT_PAGE_LIMIT, DEFAULT_PAGE_SORT};
pub use repository::Repository;
pub use transactional::{Transactional, Wrapped};
