//! Position-based pages of query results.
//!
//! Entities staged with pagination enabled carry a monotonic `documentPosition`
//! starting at 1. A [`PageRequest`] maps a 1-indexed page number onto a start cursor
//! over that position and a result budget.

use serde::{Deserialize, Serialize};

/// A single page of results.
///
/// # Example
///
/// ```ignore
/// use docset::page::Page;
///
/// let page: Page<String> = Page::builder(vec!["item1".to_string()])
///     .with_next_page(Some(2))
///     .build();
///
/// assert_eq!(page.items.len(), 1);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// The 1-indexed number of this page.
    pub page: usize,
    /// The next page number, when this page was full.
    pub next_page: Option<usize>,
    /// The previous page number (if this is not the first page).
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Transforms the items, keeping the navigation metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for constructing [`Page`] instances.
pub struct PageBuilder<T> {
    items: Vec<T>,
    page: usize,
    next_page: Option<usize>,
    previous_page: Option<usize>,
}

impl<T> PageBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            page: 1,
            next_page: None,
            previous_page: None,
        }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn with_next_page(mut self, next_page: Option<usize>) -> Self {
        self.next_page = next_page;
        self
    }

    pub fn with_previous_page(mut self, previous_page: Option<usize>) -> Self {
        self.previous_page = previous_page;
        self
    }

    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            page: self.page,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Which page to read and how large pages are. Pages are 1-indexed.
///
/// ```ignore
/// let request = PageRequest::new(3, 20);
/// assert_eq!(request.start_position(), 41);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    /// Creates a request; a page number of 0 is read as 1.
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page,
        }
    }

    /// Number of positions before the first item of this page.
    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1) * self.per_page
    }

    /// First `documentPosition` of this page.
    pub fn start_position(&self) -> i64 {
        self.offset() as i64 + 1
    }

    /// Wraps one page worth of items with navigation metadata.
    pub fn to_page<T>(&self, items: Vec<T>) -> Page<T> {
        let full = self.per_page > 0 && items.len() >= self.per_page;

        Page::builder(items)
            .with_page(self.page)
            .with_next_page(full.then_some(self.page + 1))
            .with_previous_page((self.page > 1).then(|| self.page - 1))
            .build()
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}
