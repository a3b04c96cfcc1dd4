//! Fan-out of invalidation results to external notifiers.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use contentproxy_api_types::InvalidationNotice;
use reqwest::{Client, Url, redirect::Policy};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{InvalidationResult, Observer};
use crate::config::ObserverSettings;

use super::error::InfraError;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notifier answered with status {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Whether results from `workspace` should reach this notifier.
    fn accepts(&self, _workspace: &str) -> bool {
        true
    }

    async fn send(&self, notice: &InvalidationNotice) -> Result<(), NotifyError>;
}

pub fn notice_from(result: &InvalidationResult) -> InvalidationNotice {
    let item = &result.item;
    InvalidationNotice {
        id: item.id.clone(),
        dimension: item.dimension.clone(),
        workspace: item.workspace.clone(),
        hash: item.hash.clone(),
        etag: item.etag().into_owned(),
        duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
    }
}

/// [`Observer`] that forwards every result to the registered notifiers.
///
/// Each delivery runs on its own task, so a slow endpoint never holds up the
/// worker that produced the result.
#[derive(Clone, Default)]
pub struct ObserverBroker {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl ObserverBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(observers: &[ObserverSettings]) -> Result<Self, InfraError> {
        let client = WebhookNotifier::client()?;
        let mut broker = Self::new();
        for observer in observers {
            broker.register(Arc::new(WebhookNotifier::new(client.clone(), observer)));
        }
        Ok(broker)
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Observer for ObserverBroker {
    fn notify(&self, result: InvalidationResult) {
        if self.notifiers.is_empty() {
            return;
        }

        let notice = Arc::new(notice_from(&result));
        for notifier in &self.notifiers {
            if !notifier.accepts(&notice.workspace) {
                continue;
            }
            let notifier = Arc::clone(notifier);
            let notice = Arc::clone(&notice);
            tokio::spawn(async move {
                match notifier.send(&notice).await {
                    Ok(()) => debug!(
                        notifier = notifier.name(),
                        hash = %notice.hash,
                        "Invalidation notice delivered"
                    ),
                    Err(err) => warn!(
                        notifier = notifier.name(),
                        hash = %notice.hash,
                        error = %err,
                        "Invalidation notice failed"
                    ),
                }
            });
        }
    }
}

/// POSTs an [`InvalidationNotice`] as JSON to a fixed endpoint.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    name: String,
    url: Url,
    token: Option<String>,
    workspace: Option<String>,
    client: Client,
}

impl WebhookNotifier {
    /// Shared client for webhook deliveries; redirects are not followed.
    pub fn client() -> Result<Client, InfraError> {
        Ok(Client::builder()
            .user_agent(concat!("contentproxy/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::none())
            .timeout(WEBHOOK_TIMEOUT)
            .build()?)
    }

    pub fn new(client: Client, settings: &ObserverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            url: settings.url.clone(),
            token: settings.token.clone(),
            workspace: settings.workspace.clone(),
            client,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, workspace: &str) -> bool {
        self.workspace
            .as_deref()
            .is_none_or(|filter| filter == workspace)
    }

    async fn send(&self, notice: &InvalidationNotice) -> Result<(), NotifyError> {
        let mut request = self.client.post(self.url.clone()).json(notice);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}
