use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PodSecurityPolicy governs which pod specifications the admission
/// controller accepts.
///
/// The `policy/v1beta1` API was removed from upstream Kubernetes in 1.25
/// and is no longer generated by `k8s-openapi`, so the type is declared
/// here. Only the fields the policy templates use are modelled; the API
/// server keeps anything it defaults on its side.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "policy",
    version = "v1beta1",
    kind = "PodSecurityPolicy",
    plural = "podsecuritypolicies",
    shortname = "psp"
)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityPolicySpec {
    /// Allow privileged containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,

    /// Allow processes to gain more privileges than their parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_privilege_escalation: Option<bool>,

    /// Capabilities containers may add (`*` for any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_capabilities: Option<Vec<String>>,

    /// Capabilities that are always dropped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_drop_capabilities: Option<Vec<String>>,

    /// Volume plugins pods may use (`*` for any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ports: Option<Vec<HostPortRange>>,

    #[serde(rename = "hostIPC", default, skip_serializing_if = "Option::is_none")]
    pub host_ipc: Option<bool>,

    #[serde(rename = "hostPID", default, skip_serializing_if = "Option::is_none")]
    pub host_pid: Option<bool>,

    /// Strategy for the container user id
    pub run_as_user: IdStrategyOptions,

    /// Strategy for the SELinux context
    pub se_linux: SeLinuxStrategyOptions,

    /// Strategy for supplemental groups
    pub supplemental_groups: IdStrategyOptions,

    /// Strategy for the volume ownership group
    pub fs_group: IdStrategyOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_root_filesystem: Option<bool>,
}

/// Inclusive host port range
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct HostPortRange {
    pub min: i32,
    pub max: i32,
}

/// Inclusive user or group id range
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct IdRange {
    pub min: i64,
    pub max: i64,
}

/// Rule plus optional id ranges, shared by the runAsUser, supplementalGroups
/// and fsGroup strategies
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdStrategyOptions {
    /// e.g. `RunAsAny`, `MustRunAs`, `MustRunAsNonRoot`
    pub rule: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<IdRange>>,
}

/// SELinux strategy
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeLinuxStrategyOptions {
    pub rule: String,
}
