//! Mode-aware reconciliation of the pod security policy catalog
//!
//! A run waits for the API server, reads the ledger on `kube-system`, and
//! walks the mode's plan: policies the mode grants are applied, the one it
//! does not grant is retired. Policies already recorded in the ledger are
//! skipped entirely. Finally the node binding is pointed at the mode's
//! default policy. The run ends after the first successful pass.

use std::fmt;

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::controller::client::{KubeClient, PolicyResource};
use crate::controller::context::Context;
use crate::controller::deployer::{Deployer, decode};
use crate::controller::error::{Error, Result};
use crate::controller::ledger::{AnnotationLedger, Ledger};
use crate::controller::state_machine::{PolicyEvent, PolicyStates};
use crate::crd::PodSecurityPolicy;
use crate::resources::{KUBE_SYSTEM, NODE_BINDING_NAME, PolicyName, RESOLVED, render_node_binding};

/// Cluster security mode, fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationMode {
    Cis,
    NonCis,
}

/// What to do with a pending policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Deploy the policy and every object granting it
    Apply,
    /// Keep the policy object but remove its role and binding
    Retire,
}

impl ReconciliationMode {
    /// An empty profile selects CIS mode; any other value selects non-CIS.
    pub fn from_profile(profile: &str) -> Self {
        if profile.is_empty() {
            ReconciliationMode::Cis
        } else {
            ReconciliationMode::NonCis
        }
    }

    /// Ordered policy actions for this mode
    pub fn plan(&self) -> [(PolicyName, Action); 3] {
        match self {
            ReconciliationMode::Cis => [
                (PolicyName::GlobalUnrestricted, Action::Apply),
                (PolicyName::SystemUnrestricted, Action::Apply),
                (PolicyName::GlobalRestricted, Action::Retire),
            ],
            ReconciliationMode::NonCis => [
                (PolicyName::GlobalRestricted, Action::Apply),
                (PolicyName::SystemUnrestricted, Action::Apply),
                (PolicyName::GlobalUnrestricted, Action::Retire),
            ],
        }
    }

    /// Policy whose role the node binding grants
    pub fn node_policy(&self) -> PolicyName {
        match self {
            ReconciliationMode::Cis => PolicyName::GlobalUnrestricted,
            ReconciliationMode::NonCis => PolicyName::GlobalRestricted,
        }
    }
}

impl fmt::Display for ReconciliationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationMode::Cis => write!(f, "CIS"),
            ReconciliationMode::NonCis => write!(f, "non-CIS"),
        }
    }
}

/// Summary of one successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub mode: ReconciliationMode,
    /// Policies applied or retired during this pass
    pub resolved: Vec<PolicyName>,
    /// Policies skipped because the ledger already had them
    pub skipped: Vec<PolicyName>,
    /// Whether the node binding had to be written
    pub node_binding_deployed: bool,
}

impl ReconcileReport {
    fn new(mode: ReconciliationMode) -> Self {
        Self {
            mode,
            resolved: Vec::new(),
            skipped: Vec::new(),
            node_binding_deployed: false,
        }
    }

    /// True when the pass wrote nothing
    pub fn is_noop(&self) -> bool {
        self.resolved.is_empty() && !self.node_binding_deployed
    }
}

/// Drives one reconciliation run against a cluster
pub struct PolicyReconciler<C, L = AnnotationLedger<C>> {
    ctx: Context<C>,
    ledger: L,
    deployer: Deployer<C>,
}

impl<C: KubeClient> PolicyReconciler<C> {
    /// Reconciler recording progress in the annotations of `kube-system`
    pub fn new(ctx: Context<C>) -> Self {
        let ledger = AnnotationLedger::new(ctx.client.clone());
        Self::with_ledger(ctx, ledger)
    }
}

impl<C: KubeClient, L: Ledger> PolicyReconciler<C, L> {
    pub fn with_ledger(ctx: Context<C>, ledger: L) -> Self {
        let deployer = Deployer::new(ctx.client.clone(), ctx.retry);
        Self {
            ctx,
            ledger,
            deployer,
        }
    }

    /// Poll until the API is reachable, then run exactly one pass.
    ///
    /// Unreachable API servers and a missing `kube-system` namespace are
    /// waited out. Errors from a pass are returned as-is. Firing `cancel`
    /// stops the run with [`Error::Cancelled`].
    #[instrument(skip(self, cancel), fields(mode = %self.ctx.mode))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ReconcileReport> {
        info!("Applying pod security policies");

        loop {
            let attempt = async {
                match self.ctx.client.server_version().await {
                    Ok(version) => {
                        debug!(version = %version, "API server is reachable");
                        self.reconcile_once().await
                    }
                    Err(e) => {
                        info!("API server not ready: {}", e);
                        Ok(None)
                    }
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = attempt => outcome?,
            };

            if let Some(report) = outcome {
                if report.is_noop() {
                    info!("Pod security policies already in place, nothing to do");
                } else {
                    info!(
                        resolved = report.resolved.len(),
                        skipped = report.skipped.len(),
                        node_binding_deployed = report.node_binding_deployed,
                        "Pod security policies applied successfully"
                    );
                }
                return Ok(report);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.ctx.poll_interval) => {}
            }
        }
    }

    /// Run a single pass against a reachable API server.
    ///
    /// Returns `None` when `kube-system` does not exist yet, or when the
    /// pass ended without every policy resolved.
    #[instrument(skip(self), fields(mode = %self.ctx.mode))]
    pub async fn reconcile_once(&self) -> Result<Option<ReconcileReport>> {
        let Some(entries) = self.ledger.snapshot(KUBE_SYSTEM).await? else {
            info!("Namespace {} not found yet", KUBE_SYSTEM);
            return Ok(None);
        };

        let mut states = PolicyStates::from_ledger(&entries);
        let mut report = ReconcileReport::new(self.ctx.mode);

        for (policy, action) in self.ctx.mode.plan() {
            if states.is_resolved(policy) {
                debug!("Policy {} already resolved, skipping", policy);
                report.skipped.push(policy);
                continue;
            }

            states.apply(policy, PolicyEvent::ApplyStarted)?;
            let result = match action {
                Action::Apply => self.apply(policy).await,
                Action::Retire => self.retire(policy).await,
            };

            match result {
                Ok(()) => {
                    states.apply(policy, PolicyEvent::ObjectsApplied)?;
                    report.resolved.push(policy);
                }
                Err(e) => {
                    states.apply(policy, PolicyEvent::ApplyFailed)?;
                    return Err(e);
                }
            }
        }

        if !states.all_resolved() {
            warn!("Pass ended with unresolved policies, polling again");
            return Ok(None);
        }

        report.node_binding_deployed = self.ensure_node_binding().await?;
        Ok(Some(report))
    }

    /// Deploy the policy, its role and its binding(s), then record it.
    #[instrument(skip(self))]
    async fn apply(&self, policy: PolicyName) -> Result<()> {
        let def = policy.definition();
        info!("Setting pod security policy {}", policy);

        self.deployer
            .deploy::<PodSecurityPolicy>(&def.render_psp())
            .await?;
        self.deployer.deploy::<ClusterRole>(&def.render_role()).await?;
        self.deployer
            .deploy::<ClusterRoleBinding>(&def.render_binding())
            .await?;
        if let Some(document) = def.render_namespaced_binding() {
            self.deployer.deploy::<RoleBinding>(&document).await?;
        }

        self.ledger
            .set(KUBE_SYSTEM, &policy.annotation_key(), RESOLVED)
            .await
    }

    /// Make sure the policy object exists while nothing grants it, then
    /// record it.
    #[instrument(skip(self))]
    async fn retire(&self, policy: PolicyName) -> Result<()> {
        let def = policy.definition();
        info!("Retiring pod security policy {}", policy);

        let existing = self
            .ctx
            .client
            .get_opt::<PodSecurityPolicy>(def.psp_name, None)
            .await?;
        if existing.is_none() {
            self.deployer
                .deploy::<PodSecurityPolicy>(&def.render_psp())
                .await?;
        }

        self.remove_if_present::<ClusterRole>(def.role_name).await;
        self.remove_if_present::<ClusterRoleBinding>(def.binding_name)
            .await;

        self.ledger
            .set(KUBE_SYSTEM, &policy.annotation_key(), RESOLVED)
            .await
    }

    /// Delete a cluster-scoped object if it exists. Failures are logged
    /// and otherwise ignored.
    async fn remove_if_present<K: PolicyResource>(&self, name: &str) {
        let kind = K::kind_name();
        match self.ctx.client.get_opt::<K>(name, None).await {
            Ok(Some(_)) => {
                info!("Deleting {}: {}", kind, name);
                if let Err(e) = self.ctx.client.delete::<K>(name, None).await {
                    warn!("Failed to delete {} {}: {}", kind, name, e);
                }
            }
            Ok(None) => warn!("{} {} not found, nothing to delete", kind, name),
            Err(e) => warn!("Failed to look up {} {}: {}", kind, name, e),
        }
    }

    /// Make the node binding grant `system:nodes` the mode's default role.
    ///
    /// The existing binding is kept only when its role and subjects both
    /// match the rendered one. Returns whether the binding was written.
    #[instrument(skip(self))]
    async fn ensure_node_binding(&self) -> Result<bool> {
        let role = self.ctx.mode.node_policy().definition().role_name;
        let document = render_node_binding(role);
        let desired: ClusterRoleBinding = decode(&document)?;

        let existing = self
            .ctx
            .client
            .get_opt::<ClusterRoleBinding>(NODE_BINDING_NAME, None)
            .await?;
        if let Some(binding) = existing {
            if binding.role_ref == desired.role_ref && binding.subjects == desired.subjects {
                debug!("{} already grants {}", NODE_BINDING_NAME, role);
                return Ok(false);
            }
            info!(
                "{} differs from the desired binding to {}, redeploying",
                NODE_BINDING_NAME, role
            );
        }

        self.deployer.deploy::<ClusterRoleBinding>(&document).await?;
        Ok(true)
    }
}
