//! REST transport for the environment client.
//!
//! Speaks a plain JSON convention of
//! `{base}/namespaces/{namespace}/{kind-plural}/{name}` with optional bearer
//! authentication. Cluster-scoped kinds omit the namespace segments.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::StatusCode;

use super::{
    ClientFuture, Condition, EnvObject, EnvironmentClient, EnvironmentError, ObjectRef,
    condition_from_manifest,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Environment client backed by the REST convention above.
#[derive(Clone, Debug)]
pub struct RestEnvironmentClient {
    base_url: String,
    token: Option<String>,
}

impl RestEnvironmentClient {
    /// Creates a client for the given API base URL and optional token.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let mut base = base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base_url: base,
            token,
        }
    }

    fn collection_url(&self, kind: &str, namespace: Option<&str>) -> String {
        let collection = kind_collection(kind);
        match namespace {
            Some(namespace) => {
                format!("{}/namespaces/{namespace}/{collection}", self.base_url)
            }
            None => format!("{}/{collection}", self.base_url),
        }
    }

    fn object_url(&self, reference: &ObjectRef) -> String {
        format!(
            "{}/{}",
            self.collection_url(&reference.kind, reference.namespace.as_deref()),
            reference.name
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = HTTP_CLIENT.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn write(
        &self,
        method: reqwest::Method,
        url: String,
        object: &EnvObject,
    ) -> Result<(), EnvironmentError> {
        let response = self
            .request(method, &url)
            .json(&object.manifest)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(EnvironmentError::Conflict {
                reference: object.reference.clone(),
                message: body_text(response).await,
            }),
            StatusCode::NOT_FOUND => Err(EnvironmentError::NotFound {
                reference: object.reference.clone(),
            }),
            status => Err(EnvironmentError::Transport {
                message: format!("{url} returned {status}"),
            }),
        }
    }
}

impl EnvironmentClient for RestEnvironmentClient {
    fn get<'a>(&'a self, reference: &'a ObjectRef) -> ClientFuture<'a, EnvObject> {
        Box::pin(async move {
            let url = self.object_url(reference);
            let response = self
                .request(reqwest::Method::GET, &url)
                .send()
                .await
                .map_err(transport_error)?;

            match response.status() {
                status if status.is_success() => {
                    let manifest: serde_json::Value =
                        response.json().await.map_err(transport_error)?;
                    EnvObject::from_manifest(manifest)
                }
                StatusCode::NOT_FOUND => Err(EnvironmentError::NotFound {
                    reference: reference.clone(),
                }),
                status => Err(EnvironmentError::Transport {
                    message: format!("{url} returned {status}"),
                }),
            }
        })
    }

    fn create<'a>(&'a self, object: &'a EnvObject) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let url = self.collection_url(
                &object.reference.kind,
                object.reference.namespace.as_deref(),
            );
            self.write(reqwest::Method::POST, url, object).await
        })
    }

    fn update<'a>(&'a self, object: &'a EnvObject) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let url = self.object_url(&object.reference);
            self.write(reqwest::Method::PUT, url, object).await
        })
    }

    fn list<'a>(
        &'a self,
        kind: &'a str,
        namespace: Option<&'a str>,
    ) -> ClientFuture<'a, Vec<EnvObject>> {
        Box::pin(async move {
            let url = self.collection_url(kind, namespace);
            let response = self
                .request(reqwest::Method::GET, &url)
                .send()
                .await
                .map_err(transport_error)?;

            if !response.status().is_success() {
                return Err(EnvironmentError::Transport {
                    message: format!("{url} returned {}", response.status()),
                });
            }

            let manifests: Vec<serde_json::Value> =
                response.json().await.map_err(transport_error)?;
            manifests
                .into_iter()
                .map(EnvObject::from_manifest)
                .collect()
        })
    }

    fn read_condition<'a>(
        &'a self,
        reference: &'a ObjectRef,
        condition: &'a str,
    ) -> ClientFuture<'a, Condition> {
        Box::pin(async move {
            let object = self.get(reference).await?;
            Ok(condition_from_manifest(&object.manifest, condition))
        })
    }
}

fn transport_error(err: reqwest::Error) -> EnvironmentError {
    EnvironmentError::Transport {
        message: err.to_string(),
    }
}

async fn body_text(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

/// Lowercases a kind and pluralises it into its collection path segment.
fn kind_collection(kind: &str) -> String {
    let mut collection = kind.to_ascii_lowercase();
    collection.push('s');
    collection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_includes_namespace_scope() {
        let client = RestEnvironmentClient::new("http://env.local/api/", None);
        let reference = ObjectRef::namespaced("Deployment", "moor-system", "source-agent");
        assert_eq!(
            client.object_url(&reference),
            "http://env.local/api/namespaces/moor-system/deployments/source-agent"
        );
    }

    #[test]
    fn cluster_scoped_url_omits_namespace() {
        let client = RestEnvironmentClient::new("http://env.local/api", None);
        let reference = ObjectRef::cluster_scoped("Namespace", "moor-system");
        assert_eq!(
            client.object_url(&reference),
            "http://env.local/api/namespaces/moor-system"
        );
    }
}
