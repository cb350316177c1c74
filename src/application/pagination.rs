//! Offset pagination helpers.

use serde::Serialize;
use thiserror::Error;

/// Upper bound for a single page; larger requests are clamped.
pub const MAX_PER_PAGE: u32 = 1000;

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Result<Self, PaginationError> {
        if page == 0 {
            return Err(PaginationError::ZeroPage);
        }
        if per_page == 0 {
            return Err(PaginationError::ZeroPerPage);
        }
        Ok(Self {
            page,
            per_page: per_page.min(MAX_PER_PAGE),
        })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

/// Number of pages needed for `total` rows, `ceil(total / per_page)`.
pub fn total_pages(total: u64, per_page: u32) -> u64 {
    total.div_ceil(u64::from(per_page.max(1)))
}

/// Paginated result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            data,
            total,
            page: request.page(),
            per_page: request.per_page(),
            total_pages: total_pages(total, request.per_page()),
        }
    }
}

/// Expected length of a fully populated page: `min(per_page, total - offset)`.
pub fn expected_page_len(total: u64, request: PageRequest) -> u64 {
    total
        .saturating_sub(request.offset())
        .min(request.limit())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("page numbers start at 1")]
    ZeroPage,
    #[error("per_page must be greater than zero")]
    ZeroPerPage,
}
