//! Error types for the policy reconciler

use thiserror::Error;

use crate::controller::state_machine::{PolicyEvent, PolicyPhase};
use crate::resources::PolicyName;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `DecodeError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to decode {kind} document: {reason}")]
    DecodeError { kind: String, reason: String },

    #[error("Deploying {kind} {name} failed after {attempts} attempt(s): {source}")]
    TransientApiError {
        kind: String,
        name: String,
        attempts: u32,
        #[source]
        source: kube::Error,
    },

    #[error("Kubeconfig error: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Policy {policy} cannot handle {event} while {phase}")]
    InvalidTransition {
        policy: PolicyName,
        phase: PolicyPhase,
        event: PolicyEvent,
    },

    #[error("Reconciliation cancelled")]
    Cancelled,
}

/// Check if a kube error reports that the object already exists.
///
/// A 409 can also mean an optimistic-concurrency conflict, so the reason has
/// to be checked too.
pub fn is_already_exists(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

/// Check if a kube error reports that the object does not exist.
pub fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
