//! GitLab repository access over the v4 REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};

use super::RepositoryClient;

const PRIVATE_TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const TREE_PAGE_SIZE: &str = "100";

/// One entry of the `repository/tree` response.
#[derive(Debug, Deserialize)]
struct TreeEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

pub struct GitLabClient {
    client: Client,
    api_base: Url,
    token: String,
    git_ref: String,
}

impl GitLabClient {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base = Url::parse(&config.base_url)?;
        let mut api_base = base.join("api/v4/projects/")?;
        // The project path is a single URL segment in the API, so the
        // slashes inside it must stay percent-encoded.
        api_base
            .path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid base URL: {}", config.base_url)))?
            .pop_if_empty()
            .push(&config.project);

        Ok(Self {
            client,
            api_base,
            token: config.token.clone(),
            git_ref: config.git_ref.clone(),
        })
    }

    fn tree_url(&self, path: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config("Invalid API base URL".to_string()))?
            .extend(["repository", "tree"]);
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("ref", &self.git_ref)
            .append_pair("per_page", TREE_PAGE_SIZE);
        Ok(url)
    }

    fn raw_file_url(&self, path: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config("Invalid API base URL".to_string()))?
            .extend(["repository", "files", path, "raw"]);
        url.query_pairs_mut().append_pair("ref", &self.git_ref);
        Ok(url)
    }
}

#[async_trait]
impl RepositoryClient for GitLabClient {
    async fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        let url = self.tree_url(path)?;
        tracing::debug!("Listing repository tree: {}", path);

        let response = self
            .client
            .get(url)
            .header(PRIVATE_TOKEN_HEADER, &self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let entries: Vec<TreeEntry> = response.json().await?;
                Ok(entries
                    .into_iter()
                    .filter(|e| e.kind == "tree")
                    .map(|e| e.name)
                    .collect())
            }
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => Err(Error::Repository(format!(
                "Tree listing of '{}' failed with status {}",
                path, status
            ))),
        }
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let url = self.raw_file_url(path)?;
        tracing::debug!("Fetching repository file: {}", path);

        let response = self
            .client
            .get(url)
            .header(PRIVATE_TOKEN_HEADER, &self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().await?.to_vec())),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::Repository(format!(
                "Fetch of '{}' failed with status {}",
                path, status
            ))),
        }
    }
}
