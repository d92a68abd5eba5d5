//! Page request and page envelope for list reads.

use crate::dto::{Row, SortDirection};
use crate::types::{Coerced, TypeDescriptor};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u64 = 30;
pub const DEFAULT_PAGE_SORT: &str = "created_at";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default)]
    pub dir: SortDirection,
}

fn default_limit() -> u64 {
    DEFAULT_PAGE_LIMIT
}

fn default_sort() -> String {
    DEFAULT_PAGE_SORT.to_string()
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 0,
            limit: DEFAULT_PAGE_LIMIT,
            sort: default_sort(),
            dir: SortDirection::Desc,
        }
    }
}

impl PageRequest {
    /// Read `page`, `limit`, `sort` and `dir` from raw query parameters; anything missing or
    /// unparsable falls back to its default.
    pub fn from_params(params: &Row) -> Self {
        let defaults = PageRequest::default();
        let int = |key: &str| match params.get(key).map(|v| TypeDescriptor::long().coerce(v)) {
            Some(Coerced::Value(v)) => v.as_i64(),
            _ => None,
        };
        PageRequest {
            page: int("page").filter(|n| *n >= 0).map(|n| n as u64).unwrap_or(defaults.page),
            limit: int("limit").filter(|n| *n > 0).map(|n| n as u64).unwrap_or(defaults.limit),
            sort: params
                .get("sort")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or(defaults.sort),
            dir: params
                .get("dir")
                .and_then(|v| v.as_str())
                .and_then(SortDirection::parse)
                .unwrap_or(defaults.dir),
        }
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.limit)
    }
}

/// Page envelope. Ties on the sort column are not broken, so rows sharing a sort value may
/// move between pages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub page_size: u64,
    pub max_page: i64,
    pub has_prev: bool,
    pub has_next: bool,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: &PageRequest, total: u64) -> Self {
        let limit = request.limit.max(1);
        let max_page = total.div_ceil(limit) as i64 - 1;
        Page {
            items,
            page: request.page,
            page_size: request.limit,
            max_page,
            has_prev: request.page > 0,
            has_next: (request.page as i64) < max_page,
            total_elements: total,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            max_page: self.max_page,
            has_prev: self.has_prev,
            has_next: self.has_next,
            total_elements: self.total_elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(page: u64) -> PageRequest {
        PageRequest {
            page,
            ..PageRequest::default()
        }
    }

    #[test]
    fn page_math() {
        let last = Page::<()>::new(vec![], &request(2), 95);
        assert_eq!(last.max_page, 2);
        assert!(!last.has_next);
        assert!(last.has_prev);
        let first = Page::<()>::new(vec![], &request(0), 95);
        assert!(!first.has_prev);
        assert!(first.has_next);
        assert_eq!(first.page_size, 30);
        let empty = Page::<()>::new(vec![], &request(0), 0);
        assert_eq!(empty.max_page, -1);
        assert!(!empty.has_next);
    }

    #[test]
    fn request_from_query_strings() {
        let params = json!({"page": "3", "limit": "10", "dir": "ASC"});
        let req = PageRequest::from_params(params.as_object().unwrap());
        assert_eq!(req.page, 3);
        assert_eq!(req.limit, 10);
        assert_eq!(req.sort, "created_at");
        assert_eq!(req.dir, SortDirection::Asc);
        assert_eq!(req.offset(), 30);

        let junk = json!({"page": "x", "limit": "0", "dir": "up"});
        assert_eq!(PageRequest::from_params(junk.as_object().unwrap()), PageRequest::default());
    }

    #[test]
    fn envelope_field_names() {
        let page = Page::new(vec![1], &request(0), 1);
        let v = serde_json::to_value(&page).unwrap();
        assert_eq!(
            v,
            json!({
                "items": [1], "page": 0, "page_size": 30, "max_page": 0,
                "has_prev": false, "has_next": false, "total_elements": 1
            })
        );
    }
}
