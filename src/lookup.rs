//! # Citation Lookup
//!
//! The slow fallback used by the identifier extractor when a link is not a
//! recognized resolver URL: a remote citation-metadata service that turns an
//! arbitrary landing page into DOI/PMID/PMCID candidates.

use crate::config::LookupConfig;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

/// One citation returned by the lookup service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationMetadata {
    #[serde(rename = "DOI", default)]
    pub doi: Option<String>,
    #[serde(rename = "PMID", default)]
    pub pmid: Option<String>,
    #[serde(rename = "PMCID", default)]
    pub pmcid: Option<String>,
}

/// Citation-metadata collaborator. Zero, one or many results per link.
#[async_trait]
pub trait CitationLookup: Send + Sync {
    async fn lookup(&self, link: &str) -> Result<Vec<CitationMetadata>>;
}

/// HTTP client for the Wikimedia citation REST endpoint.
#[derive(Debug, Clone)]
pub struct CitoidClient {
    http: Client,
    endpoint: Url,
}

impl CitoidClient {
    pub fn new(config: &LookupConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()?;
        let endpoint = Url::parse(&config.endpoint)?;
        if endpoint.cannot_be_a_base() {
            bail!("lookup endpoint cannot be a base URL: {}", config.endpoint);
        }
        Ok(Self { http, endpoint })
    }

    /// The request URL for `link`, which is sent as one encoded path segment.
    pub fn request_url(&self, link: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("lookup endpoint cannot be a base URL"))?
            .pop_if_empty()
            .push(link);
        Ok(url)
    }
}

#[async_trait]
impl CitationLookup for CitoidClient {
    async fn lookup(&self, link: &str) -> Result<Vec<CitationMetadata>> {
        let url = self.request_url(link)?;
        let response = self.http.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => Ok(response.json().await?),
            status => bail!("citation lookup returned {}", status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_encodes_link_as_segment() {
        let client = CitoidClient::new(&LookupConfig::default()).unwrap();
        let url = client
            .request_url("https://example.org/report?id=7")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://en.wikipedia.org/api/rest_v1/data/citation/mediawiki/https:%2F%2Fexample.org%2Freport%3Fid=7"
        );
    }

    #[test]
    fn test_metadata_deserializes_service_keys() {
        let raw = r#"[{"itemType": "journalArticle", "DOI": "10.1/abc", "PMID": "123", "title": "x"}]"#;
        let parsed: Vec<CitationMetadata> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].doi.as_deref(), Some("10.1/abc"));
        assert_eq!(parsed[0].pmid.as_deref(), Some("123"));
        assert_eq!(parsed[0].pmcid, None);
    }
}
