use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

/// Which page of a listing to return. Out-of-range values are clamped
/// rather than rejected: pages start at 1 and hold between 1 and
/// [`MAX_PAGE_SIZE`] items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page_num: usize,
    page_size: usize,
}

impl Pagination {
    pub fn new(page_num: usize, page_size: usize) -> Self {
        Self {
            page_num: page_num.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page_num(&self) -> usize {
        self.page_num
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// How many items precede this page. Saturates at the largest skip the
    /// database accepts, so an absurd page number yields an empty page.
    pub fn skip(&self) -> u64 {
        let skip = (self.page_num as u64 - 1).saturating_mul(self.page_size as u64);
        skip.min(i64::MAX as u64)
    }

    pub fn result(self, total: usize) -> PaginationResult {
        PaginationResult {
            page_num: self.page_num,
            page_size: self.page_size,
            total,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Pagination {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let page_num = if let Ok(page_num) = req.query_value::<usize>("page_num").unwrap_or(Ok(1)) {
            page_num
        } else {
            return request::Outcome::Failure((Status::BadRequest, ()));
        };
        let page_size = if let Ok(page_size) = req
            .query_value::<usize>("page_size")
            .unwrap_or(Ok(DEFAULT_PAGE_SIZE))
        {
            page_size
        } else {
            return request::Outcome::Failure((Status::BadRequest, ()));
        };
        request::Outcome::Success(Self::new(page_num, page_size))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationResult {
    pub page_num: usize,
    pub page_size: usize,
    pub total: usize,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PaginationResult,
}
