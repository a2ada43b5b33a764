//! In-memory cluster implementing the reconciler's client trait
//!
//! Objects are stored as JSON keyed by kind and name, which is enough for
//! the handful of objects the reconciler manages (every name is unique).
//! Every call is recorded so tests can assert on what was, and was not,
//! sent to the API. Failures can be injected per verb and kind.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::ResourceExt;
use kube::error::ErrorResponse;
use psp_reconciler::controller::{KubeClient, PolicyResource, decode};
use psp_reconciler::resources::KUBE_SYSTEM;
use serde_json::Value;

/// API operation recorded by the fake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    ServerVersion,
    GetNamespace,
    PatchNamespace,
    Create,
    Replace,
    Get,
    Delete,
}

impl Verb {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Verb::PatchNamespace | Verb::Create | Verb::Replace | Verb::Delete
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

#[derive(Debug)]
struct Failure {
    verb: Verb,
    kind: String,
    /// `None` fails forever
    remaining: Option<u32>,
    code: u16,
    reason: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), Value>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    unavailable_polls: u32,
}

pub struct FakeCluster {
    state: Mutex<State>,
}

/// Build a `kube::Error::Api` the way the API server reports it
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    })
}

impl FakeCluster {
    /// Cluster with an empty `kube-system` namespace
    pub fn new() -> Self {
        let cluster = Self::without_namespace();
        cluster.add_namespace(KUBE_SYSTEM);
        cluster
    }

    /// Cluster where `kube-system` has not been created yet
    pub fn without_namespace() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .entry(namespace.to_string())
            .or_default();
    }

    pub fn with_annotation(self, key: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .entry(KUBE_SYSTEM.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Store `object` without recording a call
    pub fn with_object<K: PolicyResource>(self, object: &K) -> Self {
        self.insert(object);
        self
    }

    /// Decode a rendered document and store it without recording a call
    pub fn with_document<K: PolicyResource>(self, document: &str) -> Self {
        let object: K = decode(document).unwrap();
        self.with_object(&object)
    }

    /// Make the server version probe fail `polls` times
    pub fn unavailable_for(self, polls: u32) -> Self {
        self.state.lock().unwrap().unavailable_polls = polls;
        self
    }

    /// Fail `verb` on `kind` `times` times (forever when `None`)
    pub fn fail(self, verb: Verb, kind: &str, times: Option<u32>, code: u16, reason: &str) -> Self {
        self.state.lock().unwrap().failures.push(Failure {
            verb,
            kind: kind.to_string(),
            remaining: times,
            code,
            reason: reason.to_string(),
        });
        self
    }

    pub fn object<K: PolicyResource>(&self, name: &str) -> Option<K> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(K::kind_name(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn contains<K: PolicyResource>(&self, name: &str) -> bool {
        self.object::<K>(name).is_some()
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .get(KUBE_SYSTEM)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.verb.is_mutation())
            .collect()
    }

    pub fn count(&self, verb: Verb, kind: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .count()
    }

    /// Calls touching the object `name`, in order
    pub fn calls_for(&self, name: &str) -> Vec<Verb> {
        self.calls()
            .iter()
            .filter(|c| c.name == name)
            .map(|c| c.verb)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn insert<K: PolicyResource>(&self, object: &K) {
        let value = serde_json::to_value(object).unwrap();
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((K::kind_name(), object.name_any()), value);
    }

    /// Record the call and return an injected failure if one matches.
    fn record(&self, verb: Verb, kind: &str, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });

        let failure = state
            .failures
            .iter_mut()
            .find(|f| f.verb == verb && f.kind == kind && f.remaining != Some(0));
        match failure {
            Some(f) => {
                if let Some(n) = f.remaining.as_mut() {
                    *n -= 1;
                }
                Err(api_error(f.code, &f.reason))
            }
            None => Ok(()),
        }
    }
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn server_version(&self) -> Result<String, kube::Error> {
        self.record(Verb::ServerVersion, "Version", "")?;
        let mut state = self.state.lock().unwrap();
        if state.unavailable_polls > 0 {
            state.unavailable_polls -= 1;
            return Err(api_error(503, "ServiceUnavailable"));
        }
        Ok("v1.24.17".to_string())
    }

    async fn namespace_annotations(
        &self,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        self.record(Verb::GetNamespace, "Namespace", namespace)?;
        Ok(self.state.lock().unwrap().namespaces.get(namespace).cloned())
    }

    async fn merge_namespace_annotations(
        &self,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), kube::Error> {
        self.record(Verb::PatchNamespace, "Namespace", namespace)?;
        let mut state = self.state.lock().unwrap();
        match state.namespaces.get_mut(namespace) {
            Some(existing) => {
                existing.extend(annotations.clone());
                Ok(())
            }
            None => Err(api_error(404, "NotFound")),
        }
    }

    async fn create<K: PolicyResource>(&self, object: &K) -> Result<(), kube::Error> {
        let kind = K::kind_name();
        let name = object.name_any();
        self.record(Verb::Create, &kind, &name)?;
        if self.contains::<K>(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        self.insert(object);
        Ok(())
    }

    async fn replace<K: PolicyResource>(&self, object: &K) -> Result<(), kube::Error> {
        let kind = K::kind_name();
        let name = object.name_any();
        self.record(Verb::Replace, &kind, &name)?;
        if !self.contains::<K>(&name) {
            return Err(api_error(404, "NotFound"));
        }
        self.insert(object);
        Ok(())
    }

    async fn get_opt<K: PolicyResource>(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<Option<K>, kube::Error> {
        self.record(Verb::Get, &K::kind_name(), name)?;
        Ok(self.object::<K>(name))
    }

    async fn delete<K: PolicyResource>(
        &self,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<(), kube::Error> {
        self.record(Verb::Delete, &K::kind_name(), name)?;
        let removed = self
            .state
            .lock()
            .unwrap()
            .objects
            .remove(&(K::kind_name(), name.to_string()));
        match removed {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }
}
