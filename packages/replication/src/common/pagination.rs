//! Canonical page envelope rendered by the authorized history view.
//!
//! Webhook payloads reuse the exact shape the live read API returns, so a
//! subscriber cannot tell a delivered page from a page it fetched itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// One page of rendered history results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub count: i64,
    pub pages: i64,
    pub page_size: i64,
    pub page: i64,
    pub page_next: Option<i64>,
    pub page_previous: Option<i64>,
    pub results: Vec<Value>,
}

impl Page {
    /// Build a single-page envelope around already-rendered results.
    pub fn single(results: Vec<Value>) -> Self {
        let count = results.len() as i64;
        Self {
            count,
            pages: 1,
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
            page_next: None,
            page_previous: None,
            results,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
