use crate::enums::{CoinSort, SortOrder};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A requested window into a list view. Out-of-range values are clamped by
/// [`PageRequest::normalized`] rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }.normalized()
    }

    /// A page below 1 becomes 1; a limit outside `1..=100` falls back to the default.
    pub fn normalized(self) -> Self {
        let page = self.page.max(1);
        let limit = if (1..=MAX_PAGE_LIMIT).contains(&self.limit) {
            self.limit
        } else {
            DEFAULT_PAGE_LIMIT
        };
        Self { page, limit }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// How a coin listing is ordered. Defaults to market cap, largest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinOrdering {
    #[serde(default)]
    pub sort: CoinSort,
    #[serde(default)]
    pub order: SortOrder,
}

impl CoinOrdering {
    pub fn new(sort: CoinSort, order: SortOrder) -> Self {
        Self { sort, order }
    }
}

/// One page of a list view plus the totals a client needs to navigate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        let limit = u64::from(request.limit.max(1));
        Self {
            items,
            page: request.page,
            limit: request.limit,
            total,
            pages: total.div_ceil(limit),
        }
    }

    /// Slices an already materialized, already ordered list.
    pub fn from_full(all: Vec<T>, request: PageRequest) -> Self {
        let request = request.normalized();
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(usize::try_from(request.offset()).unwrap_or(usize::MAX))
            .take(request.limit as usize)
            .collect();
        Self::new(items, request, total)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total: self.total,
            pages: self.pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_out_of_range_requests() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, limit: 20 });
        assert_eq!(PageRequest::new(3, 101), PageRequest { page: 3, limit: 20 });
        assert_eq!(PageRequest::new(2, 50).offset(), 50);
    }

    #[test]
    fn page_count_rounds_up() {
        let page = Page::new(vec![1, 2], PageRequest::new(1, 2), 5);
        assert_eq!(page.pages, 3);
        let empty: Page<u8> = Page::new(vec![], PageRequest::default(), 0);
        assert_eq!(empty.pages, 0);
    }

    #[test]
    fn from_full_slices_the_requested_window() {
        let page = Page::from_full((1..=7).collect::<Vec<_>>(), PageRequest::new(2, 3));
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.pages, 3);
    }
}
