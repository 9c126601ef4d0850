use crate::error::TzktError;
use crate::models::{LevelFilter, RawDelegation};
use async_trait::async_trait;
use log::info;
use reqwest::StatusCode;
use std::time::Duration;

/// Paged read access to delegation operations.
#[async_trait]
pub trait DelegationSource: Send + Sync {
    /// Number of items requested per page; also the offset step.
    fn page_size(&self) -> u64;

    /// One page starting at `offset`. An empty page means there is no more data.
    async fn fetch_page(
        &self,
        offset: u64,
        filter: LevelFilter,
    ) -> Result<Vec<RawDelegation>, TzktError>;
}

pub struct TzktClient {
    client: reqwest::Client,
    base_url: String,
    page_size: u64,
}

impl TzktClient {
    pub fn new(base_url: &str, page_size: u64, timeout: Duration) -> Result<Self, TzktError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size,
        })
    }

    fn page_url(&self, offset: u64, filter: LevelFilter) -> String {
        let mut url = format!(
            "{}/v1/operations/delegations?limit={}&offset={}",
            self.base_url, self.page_size, offset
        );
        for (key, level) in filter.query_params() {
            url.push_str(&format!("&{}={}", key, level));
        }
        url
    }
}

#[async_trait]
impl DelegationSource for TzktClient {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    async fn fetch_page(
        &self,
        offset: u64,
        filter: LevelFilter,
    ) -> Result<Vec<RawDelegation>, TzktError> {
        let url = self.page_url(offset, filter);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TzktError::NotFound);
        }
        if status != StatusCode::OK {
            return Err(TzktError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Walks pages from offset 0 until the source returns an empty page.
///
/// A full page is never taken as the last one. Any error aborts the walk and
/// discards what was accumulated.
pub async fn fetch_all_delegations(
    source: &dyn DelegationSource,
    filter: LevelFilter,
) -> Result<Vec<RawDelegation>, TzktError> {
    let mut all_delegations = Vec::new();
    let mut offset = 0;

    loop {
        let page = source.fetch_page(offset, filter).await?;
        if page.is_empty() {
            break;
        }
        info!(
            "Fetched {} delegations at offset {} ({:?})",
            page.len(),
            offset,
            filter
        );
        all_delegations.extend(page);
        offset += source.page_size();
    }

    Ok(all_delegations)
}
