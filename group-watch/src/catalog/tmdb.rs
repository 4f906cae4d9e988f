//! TMDB catalog client
//!
//! Endpoints used:
//! - `/movie/popular?page=` for popular titles and random batches
//! - `/discover/movie?with_genres=&page=` for titles by genre
//! - `/genre/movie/list` for the genre vocabulary

use async_trait::async_trait;
use rand::{Rng, seq::SliceRandom};
use reqwest::Client as HttpClient;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, instrument};

use super::Catalog;
use crate::{
    error::FetchError,
    models::{Genre, PagedItems, TagId},
};

#[derive(Deserialize)]
struct GenreList {
    genres: Vec<Genre>,
}

#[derive(Clone)]
pub struct TmdbCatalog {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    /// Random batches are drawn from pages `1..=random_page_span`
    random_page_span: u32,
}

impl TmdbCatalog {
    pub fn new(api_key: String, api_url: String, random_page_span: u32) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            random_page_span: random_page_span.max(1),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.api_url, path);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                service: "catalog",
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

/// Shuffle a fetched page and keep at most `count` results.
fn into_random_batch(mut paged: PagedItems, count: usize) -> PagedItems {
    paged.results.shuffle(&mut rand::rng());
    paged.results.truncate(count);
    paged
}

#[async_trait]
impl Catalog for TmdbCatalog {
    #[instrument(skip(self))]
    async fn fetch_popular(&self, page: u32) -> Result<PagedItems, FetchError> {
        self.get_json("/movie/popular", &[("page", page.to_string())])
            .await
    }

    #[instrument(skip(self))]
    async fn fetch_by_tag(&self, tag: TagId, page: u32) -> Result<PagedItems, FetchError> {
        self.get_json(
            "/discover/movie",
            &[("with_genres", tag.to_string()), ("page", page.to_string())],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn fetch_random_batch(&self, count: usize) -> Result<PagedItems, FetchError> {
        let (page, sort_by) = {
            let mut rng = rand::rng();
            let page = rng.random_range(1..=self.random_page_span);
            let sort_by = if rng.random_bool(0.5) {
                "popularity.desc"
            } else {
                "vote_count.desc"
            };
            (page, sort_by)
        };
        debug!(page, sort_by, "fetching random batch");

        let paged: PagedItems = self
            .get_json(
                "/movie/popular",
                &[("page", page.to_string()), ("sort_by", sort_by.to_string())],
            )
            .await?;

        Ok(into_random_batch(paged, count))
    }

    #[instrument(skip(self))]
    async fn fetch_genres(&self) -> Result<Vec<Genre>, FetchError> {
        let list: GenreList = self.get_json("/genre/movie/list", &[]).await?;
        Ok(list.genres)
    }
}
