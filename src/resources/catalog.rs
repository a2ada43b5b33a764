//! Catalog of the named pod security policies
//!
//! Each policy bundles a PodSecurityPolicy template, a ClusterRole template
//! granting `use` on it and a ClusterRoleBinding template. Templates are
//! parameterized only by object names.

use std::fmt;

use crate::resources::common::{NODE_BINDING_NAME, annotation_key};
use crate::resources::template::render;

/// Identifies one catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyName {
    GlobalUnrestricted,
    SystemUnrestricted,
    GlobalRestricted,
}

impl PolicyName {
    /// All catalog entries
    pub const ALL: [PolicyName; 3] = [
        PolicyName::GlobalUnrestricted,
        PolicyName::SystemUnrestricted,
        PolicyName::GlobalRestricted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::GlobalUnrestricted => "global-unrestricted",
            PolicyName::SystemUnrestricted => "system-unrestricted",
            PolicyName::GlobalRestricted => "global-restricted",
        }
    }

    /// Ledger annotation recording that this policy has been reconciled
    pub fn annotation_key(&self) -> String {
        annotation_key(self.as_str())
    }

    pub fn definition(&self) -> &'static PolicyDefinition {
        match self {
            PolicyName::GlobalUnrestricted => &GLOBAL_UNRESTRICTED,
            PolicyName::SystemUnrestricted => &SYSTEM_UNRESTRICTED,
            PolicyName::GlobalRestricted => &GLOBAL_RESTRICTED,
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced RoleBinding deployed alongside a policy
#[derive(Debug, PartialEq, Eq)]
pub struct NamespacedBinding {
    pub template: &'static str,
    pub name: &'static str,
    pub namespace: &'static str,
}

/// Templates and object names for one policy
#[derive(Debug, PartialEq, Eq)]
pub struct PolicyDefinition {
    pub psp_template: &'static str,
    pub role_template: &'static str,
    pub binding_template: &'static str,
    pub psp_name: &'static str,
    pub role_name: &'static str,
    pub binding_name: &'static str,
    /// Extra binding inside a namespace, granting the policy to its service accounts
    pub namespaced_binding: Option<NamespacedBinding>,
}

impl PolicyDefinition {
    pub fn render_psp(&self) -> String {
        render(self.psp_template, &[("name", self.psp_name)])
    }

    pub fn render_role(&self) -> String {
        render(
            self.role_template,
            &[("name", self.role_name), ("psp", self.psp_name)],
        )
    }

    pub fn render_binding(&self) -> String {
        render(
            self.binding_template,
            &[("name", self.binding_name), ("role", self.role_name)],
        )
    }

    pub fn render_namespaced_binding(&self) -> Option<String> {
        self.namespaced_binding.as_ref().map(|b| {
            render(
                b.template,
                &[
                    ("name", b.name),
                    ("namespace", b.namespace),
                    ("role", self.role_name),
                ],
            )
        })
    }
}

/// Render the node binding pointing `system:nodes` at `role_name`.
pub fn render_node_binding(role_name: &str) -> String {
    render(
        NODE_BINDING_TEMPLATE,
        &[("name", NODE_BINDING_NAME), ("role", role_name)],
    )
}

pub static GLOBAL_UNRESTRICTED: PolicyDefinition = PolicyDefinition {
    psp_template: GLOBAL_UNRESTRICTED_PSP_TEMPLATE,
    role_template: ROLE_TEMPLATE,
    binding_template: AUTHENTICATED_BINDING_TEMPLATE,
    psp_name: "global-unrestricted-psp",
    role_name: "global-unrestricted-psp-role",
    binding_name: "global-unrestricted-psp-rolebinding",
    namespaced_binding: None,
};

pub static SYSTEM_UNRESTRICTED: PolicyDefinition = PolicyDefinition {
    psp_template: SYSTEM_UNRESTRICTED_PSP_TEMPLATE,
    role_template: ROLE_TEMPLATE,
    binding_template: NODES_BINDING_TEMPLATE,
    psp_name: "system-unrestricted-psp",
    role_name: "system-unrestricted-psp-role",
    binding_name: "system-unrestricted-node-psp-rolebinding",
    namespaced_binding: Some(NamespacedBinding {
        template: SERVICE_ACCOUNTS_BINDING_TEMPLATE,
        name: "system-unrestricted-svc-acct-psp-rolebinding",
        namespace: "kube-system",
    }),
};

pub static GLOBAL_RESTRICTED: PolicyDefinition = PolicyDefinition {
    psp_template: GLOBAL_RESTRICTED_PSP_TEMPLATE,
    role_template: ROLE_TEMPLATE,
    binding_template: AUTHENTICATED_BINDING_TEMPLATE,
    psp_name: "global-restricted-psp",
    role_name: "global-restricted-psp-role",
    binding_name: "global-restricted-psp-rolebinding",
    namespaced_binding: None,
};

const ROLE_TEMPLATE: &str = r#"kind: ClusterRole
apiVersion: rbac.authorization.k8s.io/v1
metadata:
  name: {name}
rules:
- apiGroups: ['policy']
  resources: ['podsecuritypolicies']
  verbs:     ['use']
  resourceNames:
  - {psp}
"#;

const GLOBAL_RESTRICTED_PSP_TEMPLATE: &str = r#"apiVersion: policy/v1beta1
kind: PodSecurityPolicy
metadata:
  name: {name}
  annotations:
    psp.rke2.io/global-restricted: resolved
spec:
  privileged: false                # CIS - 5.2.1
  allowPrivilegeEscalation: false  # CIS - 5.2.5
  requiredDropCapabilities:        # CIS - 5.2.7/8/9
    - ALL
  volumes:
    - 'configMap'
    - 'emptyDir'
    - 'projected'
    - 'secret'
    - 'downwardAPI'
    - 'persistentVolumeClaim'
  hostNetwork: false               # CIS - 5.2.4
  hostIPC: false                   # CIS - 5.2.3
  hostPID: false                   # CIS - 5.2.2
  runAsUser:
    rule: 'MustRunAsNonRoot'       # CIS - 5.2.6
  seLinux:
    rule: 'RunAsAny'
  supplementalGroups:
    rule: 'MustRunAs'
    ranges:
      - min: 1
        max: 65535
  fsGroup:
    rule: 'MustRunAs'
    ranges:
      - min: 1
        max: 65535
  readOnlyRootFilesystem: false
"#;

const GLOBAL_UNRESTRICTED_PSP_TEMPLATE: &str = r#"apiVersion: policy/v1beta1
kind: PodSecurityPolicy
metadata:
  name: {name}
  annotations:
    psp.rke2.io/global-unrestricted: resolved
    seccomp.security.alpha.kubernetes.io/allowedProfileNames: '*'
spec:
  privileged: true
  allowPrivilegeEscalation: true
  allowedCapabilities:
  - '*'
  volumes:
  - '*'
  hostNetwork: true
  hostPorts:
  - min: 0
    max: 65535
  hostIPC: true
  hostPID: true
  runAsUser:
    rule: 'RunAsAny'
  seLinux:
    rule: 'RunAsAny'
  supplementalGroups:
    rule: 'RunAsAny'
  fsGroup:
    rule: 'RunAsAny'
"#;

// Same spec as global-unrestricted, but only ever granted to nodes and
// kube-system service accounts, whatever the mode.
const SYSTEM_UNRESTRICTED_PSP_TEMPLATE: &str = r#"apiVersion: policy/v1beta1
kind: PodSecurityPolicy
metadata:
  name: {name}
  annotations:
    seccomp.security.alpha.kubernetes.io/allowedProfileNames: '*'
spec:
  privileged: true
  allowPrivilegeEscalation: true
  allowedCapabilities:
  - '*'
  volumes:
  - '*'
  hostNetwork: true
  hostPorts:
  - min: 0
    max: 65535
  hostIPC: true
  hostPID: true
  runAsUser:
    rule: 'RunAsAny'
  seLinux:
    rule: 'RunAsAny'
  supplementalGroups:
    rule: 'RunAsAny'
  fsGroup:
    rule: 'RunAsAny'
"#;

const AUTHENTICATED_BINDING_TEMPLATE: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: {name}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: {role}
subjects:
- kind: Group
  apiGroup: rbac.authorization.k8s.io
  name: system:authenticated
"#;

const NODES_BINDING_TEMPLATE: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: {name}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: {role}
subjects:
- kind: Group
  apiGroup: rbac.authorization.k8s.io
  name: system:nodes
"#;

const SERVICE_ACCOUNTS_BINDING_TEMPLATE: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: {name}
  namespace: {namespace}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: {role}
subjects:
  - kind: Group
    apiGroup: rbac.authorization.k8s.io
    name: system:serviceaccounts
"#;

const NODE_BINDING_TEMPLATE: &str = NODES_BINDING_TEMPLATE;
