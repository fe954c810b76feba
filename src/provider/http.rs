//! HTTP client for forge-style hosting APIs.
//!
//! Speaks the common `repos/{owner}/{name}` JSON convention with bearer
//! authentication. Creation and key registration check current state first
//! so repeated runs are no-ops.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{Provider, ProviderError, ProviderFuture, RepositoryId, RepositoryVisibility};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Debug, Deserialize)]
struct DeployKey {
    key: String,
}

/// Hosting-provider client for forge-style APIs.
#[derive(Clone, Debug)]
pub struct HostedForge {
    base_url: String,
    token: String,
}

impl HostedForge {
    /// Creates a client for the given API base URL and access token.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut base = base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base_url: base,
            token: token.into(),
        }
    }

    fn repo_url(&self, id: &RepositoryId) -> String {
        format!("{}/repos/{}/{}", self.base_url, id.owner, id.name)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        HTTP_CLIENT.request(method, url).bearer_auth(&self.token)
    }

    async fn repository_exists(&self, id: &RepositoryId) -> Result<bool, ProviderError> {
        let url = self.repo_url(id);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(api_error(status, format!("lookup of {id}"), response).await),
        }
    }

    async fn create_repository(
        &self,
        id: &RepositoryId,
        visibility: RepositoryVisibility,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/user/repos", self.base_url);
        let body = json!({
            "name": id.name,
            "private": visibility == RepositoryVisibility::Private,
        });
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(api_error(status, format!("creation of {id}"), response).await)
        }
    }

    async fn deploy_key_registered(
        &self,
        id: &RepositoryId,
        public_key: &str,
    ) -> Result<bool, ProviderError> {
        let url = format!("{}/keys", self.repo_url(id));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(api_error(status, format!("key listing for {id}"), response).await);
        }

        let keys: Vec<DeployKey> = response.json().await.map_err(|err| {
            ProviderError::Decode {
                message: err.to_string(),
            }
        })?;
        let wanted = public_key.trim();
        Ok(keys.iter().any(|entry| entry.key.trim() == wanted))
    }
}

impl Provider for HostedForge {
    fn ensure_repository_exists<'a>(
        &'a self,
        id: &'a RepositoryId,
        visibility: RepositoryVisibility,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            if self.repository_exists(id).await? {
                return Ok(false);
            }
            self.create_repository(id, visibility).await?;
            Ok(true)
        })
    }

    fn register_deploy_key<'a>(
        &'a self,
        id: &'a RepositoryId,
        title: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            if self.deploy_key_registered(id, public_key).await? {
                return Ok(false);
            }

            let url = format!("{}/keys", self.repo_url(id));
            let body = json!({
                "title": title,
                "key": public_key,
                "read_only": true,
            });
            let response = self
                .request(reqwest::Method::POST, &url)
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;
            if response.status().is_success() {
                Ok(true)
            } else {
                let status = response.status();
                Err(api_error(status, format!("key registration for {id}"), response).await)
            }
        })
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport {
        message: err.to_string(),
    }
}

async fn api_error(
    status: StatusCode,
    operation: String,
    response: reqwest::Response,
) -> ProviderError {
    ProviderError::Api {
        status: status.as_u16(),
        operation,
        message: response.text().await.unwrap_or_default(),
    }
}
