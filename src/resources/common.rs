//! Common constants shared by the policy catalog, the ledger and the driver
//!
//! Annotation keys and object names here are part of the on-cluster
//! contract: existing clusters carry them, so they must not change.

/// Namespace whose annotations record which policies have been applied
pub const KUBE_SYSTEM: &str = "kube-system";

/// Prefix of every ledger annotation key
pub const ANNOTATION_BASE: &str = "psp.rke2.io/";

/// Ledger value marking a policy as reconciled
pub const RESOLVED: &str = "resolved";

/// Field manager / user agent name used for writes
pub const FIELD_MANAGER: &str = "psp-reconciler";

/// ClusterRoleBinding granting `system:nodes` use of the mode's default policy
pub const NODE_BINDING_NAME: &str = "system-node-default-psp-rolebinding";

/// Build the ledger annotation key for a policy kind, e.g.
/// `psp.rke2.io/global-restricted`.
pub fn annotation_key(policy_kind: &str) -> String {
    format!("{}{}", ANNOTATION_BASE, policy_kind)
}
