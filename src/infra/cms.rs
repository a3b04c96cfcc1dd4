//! HTTP client for the CMS content export API.

use std::time::Duration;

use async_trait::async_trait;
use contentproxy_api_types::ExportDocument;
use reqwest::{Client, StatusCode, Url, header};
use tracing::debug;

use crate::cache::{Content, ContentLoader, LoaderError, NodeKey};

use super::error::InfraError;

const EXPORT_PATH: &str = "contentserver/export";
const ERROR_BODY_LIMIT: usize = 256;

/// Loads renderings from `{base}/contentserver/export/{dimension}/{id}?workspace={workspace}`.
#[derive(Clone, Debug)]
pub struct CmsClient {
    client: Client,
    base: Url,
}

impl CmsClient {
    pub fn new(base: Url) -> Result<Self, InfraError> {
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self::with_client(client, base))
    }

    pub fn with_client(client: Client, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn user_agent() -> &'static str {
        concat!("contentproxy/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn export_url(&self, node: &NodeKey) -> Result<Url, LoaderError> {
        let mut url = self
            .base
            .join(EXPORT_PATH)
            .map_err(|err| LoaderError::Request(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| LoaderError::Request(format!("`{}` cannot be a base", self.base)))?
            .push(&node.dimension)
            .push(&node.id);
        url.query_pairs_mut()
            .clear()
            .append_pair("workspace", &node.workspace);
        Ok(url)
    }
}

#[async_trait]
impl ContentLoader for CmsClient {
    async fn get_content(
        &self,
        node: &NodeKey,
        deadline: Duration,
    ) -> Result<Content, LoaderError> {
        let url = self.export_url(node)?;
        debug!(node = %node, url = %url, "Requesting content export");

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .timeout(deadline)
            .send()
            .await
            .map_err(|err| transport_error(err, deadline))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, node, truncate(&body)));
        }

        let document: ExportDocument = response
            .json()
            .await
            .map_err(|err| transport_error(err, deadline))?;

        Ok(Content {
            html: document.html,
            dependencies: document.cache_dependencies,
            valid_until: document.valid_until,
        })
    }
}

fn transport_error(err: reqwest::Error, deadline: Duration) -> LoaderError {
    if err.is_timeout() {
        LoaderError::Timeout(deadline)
    } else if err.is_builder() {
        LoaderError::Request(err.to_string())
    } else {
        LoaderError::Response(err.to_string())
    }
}

pub(crate) fn classify_status(status: StatusCode, node: &NodeKey, body: &str) -> LoaderError {
    match status {
        StatusCode::NOT_FOUND => LoaderError::NotFound(node.to_string()),
        StatusCode::BAD_REQUEST => LoaderError::BadRequest(format!("{node}: {body}")),
        StatusCode::SERVICE_UNAVAILABLE => LoaderError::Maintenance(body.to_string()),
        StatusCode::INTERNAL_SERVER_ERROR => {
            LoaderError::Response(format!("internal server error: {body}"))
        }
        other => LoaderError::Response(format!("status {other}: {body}")),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
