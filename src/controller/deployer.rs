//! Idempotent create-or-update of rendered policy documents
//!
//! A rendered YAML document is decoded into the kind the caller names at
//! compile time, then created. If the object already exists it is replaced
//! with the freshly rendered one; the existing object is not read or merged.
//! Any other API error is retried according to the [`RetryPolicy`].

use std::sync::Arc;

use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::controller::client::{KubeClient, PolicyResource};
use crate::controller::error::{Error, Result, is_already_exists};
use crate::retry::RetryPolicy;

/// Decode a rendered document into `K`.
///
/// Decoding never touches the API, so a failure here means the template
/// itself is broken. k8s-openapi fills in missing required fields with
/// defaults, so the document must also carry `K`'s `apiVersion` and
/// `kind`, name the object and pass the kind's own shape check.
pub fn decode<K: PolicyResource>(document: &str) -> Result<K> {
    let invalid = |reason: String| Error::DecodeError {
        kind: K::kind_name(),
        reason,
    };

    let value: serde_json::Value =
        serde_yaml::from_str(document).map_err(|e| invalid(e.to_string()))?;

    for (field, expected) in [("apiVersion", K::api_version(&())), ("kind", K::kind(&()))] {
        match value.get(field).and_then(|v| v.as_str()) {
            Some(found) if found == expected => {}
            Some(found) => {
                return Err(invalid(format!(
                    "{} is {}, expected {}",
                    field, found, expected
                )));
            }
            None => return Err(invalid(format!("missing {}", field))),
        }
    }

    let object: K = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    if object.meta().name.as_deref().unwrap_or_default().is_empty() {
        return Err(invalid("missing metadata.name".to_string()));
    }
    object.check_shape().map_err(invalid)?;
    Ok(object)
}

/// Upserts policy objects through a [`KubeClient`]
pub struct Deployer<C> {
    client: Arc<C>,
    retry: RetryPolicy,
}

impl<C: KubeClient> Deployer<C> {
    /// Create a deployer using `retry` for every deploy
    pub fn new(client: Arc<C>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Decode and upsert `document` as a `K` using the default retry policy.
    pub async fn deploy<K: PolicyResource>(&self, document: &str) -> Result<()> {
        self.deploy_with::<K>(document, &self.retry).await
    }

    /// Decode and upsert `document` as a `K` using `retry`.
    pub async fn deploy_with<K: PolicyResource>(
        &self,
        document: &str,
        retry: &RetryPolicy,
    ) -> Result<()> {
        let object: K = decode(document)?;
        let kind = K::kind_name();
        let name = object.name_any();
        let operation = format!("deploy {} {}", kind, name);

        let outcome = retry.run(&operation, || self.upsert(&object)).await;

        match outcome.result {
            Ok(()) => {
                info!("Applied {}: {}", kind, name);
                Ok(())
            }
            Err(source) => Err(Error::TransientApiError {
                kind,
                name,
                attempts: outcome.attempts,
                source,
            }),
        }
    }

    /// One create attempt, falling through to replace when the object exists.
    async fn upsert<K: PolicyResource>(&self, object: &K) -> Result<(), kube::Error> {
        match self.client.create(object).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_exists(&e) => {
                debug!(
                    "{} {} already exists, replacing",
                    K::kind_name(),
                    object.name_any()
                );
                self.client.replace(object).await
            }
            Err(e) => Err(e),
        }
    }
}
