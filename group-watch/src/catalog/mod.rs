//! Movie catalog abstraction
//!
//! The turn controller pulls candidate batches from here and the aggregator pulls enrichment
//! batches. Every operation is a single round-trip; callers decide whether a failure is fatal.

use async_trait::async_trait;

use crate::{
    error::FetchError,
    models::{Genre, PagedItems, TagId},
};

pub mod tmdb;

pub use tmdb::TmdbCatalog;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Popular titles, one page
    async fn fetch_popular(&self, page: u32) -> Result<PagedItems, FetchError>;

    /// Titles carrying the given genre, one page
    async fn fetch_by_tag(&self, tag: TagId, page: u32) -> Result<PagedItems, FetchError>;

    /// A shuffled batch of at most `count` titles from a random page.
    ///
    /// The underlying page size is fixed, so the batch can be shorter than `count`.
    async fn fetch_random_batch(&self, count: usize) -> Result<PagedItems, FetchError>;

    /// The genre vocabulary
    async fn fetch_genres(&self) -> Result<Vec<Genre>, FetchError>;
}
