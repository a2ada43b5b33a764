//! Completion ledger kept as namespace annotations
//!
//! The ledger is the only persistent state the reconciler has: a
//! `psp.rke2.io/<policy>` annotation on `kube-system` means that policy was
//! reconciled by an earlier run. Nothing is cached; every read goes back to
//! the API so annotations removed by an operator are honored on the next run.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::controller::client::KubeClient;
use crate::controller::error::Result;

/// Key/value store recording which policies have been applied
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Every entry recorded for `namespace`, or `None` if the namespace
    /// does not exist yet
    async fn snapshot(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .snapshot(namespace)
            .await?
            .and_then(|entries| entries.get(key).cloned()))
    }

    /// Record `key = value`, leaving every other entry in place
    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
}

/// Ledger backed by the annotations of a namespace object
pub struct AnnotationLedger<C> {
    client: Arc<C>,
}

impl<C: KubeClient> AnnotationLedger<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: KubeClient> Ledger for AnnotationLedger<C> {
    async fn snapshot(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.client.namespace_annotations(namespace).await?)
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        info!("Updating annotation {}={} on {} namespace", key, value, namespace);
        let entry = BTreeMap::from([(key.to_string(), value.to_string())]);
        self.client
            .merge_namespace_annotations(namespace, &entry)
            .await?;
        Ok(())
    }
}
