//! Tests for the idempotent deploy primitive

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::rbac::v1::{ClusterRole, Role, RoleBinding};
use psp_reconciler::controller::{Deployer, Error};
use psp_reconciler::crd::PodSecurityPolicy;
use psp_reconciler::resources::{GLOBAL_UNRESTRICTED, SYSTEM_UNRESTRICTED};
use psp_reconciler::retry::RetryPolicy;
use tokio::time::Instant;

use crate::common::*;

fn deployer(cluster: &Arc<FakeCluster>, retry: RetryPolicy) -> Deployer<FakeCluster> {
    Deployer::new(cluster.clone(), retry)
}

mod upsert_tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_missing_object() {
        let cluster = Arc::new(FakeCluster::new());

        deployer(&cluster, test_retry())
            .deploy::<PodSecurityPolicy>(&GLOBAL_UNRESTRICTED.render_psp())
            .await
            .unwrap();

        assert!(cluster.contains::<PodSecurityPolicy>("global-unrestricted-psp"));
        assert_eq!(
            cluster.calls_for("global-unrestricted-psp"),
            vec![Verb::Create]
        );
    }

    #[tokio::test]
    async fn test_existing_object_is_replaced_with_rendered_spec() {
        let mut drifted: PodSecurityPolicy =
            psp_reconciler::controller::decode(&GLOBAL_UNRESTRICTED.render_psp()).unwrap();
        drifted.spec.privileged = Some(false);
        drifted.spec.host_network = Some(false);
        let cluster = Arc::new(FakeCluster::new().with_object(&drifted));

        deployer(&cluster, test_retry())
            .deploy::<PodSecurityPolicy>(&GLOBAL_UNRESTRICTED.render_psp())
            .await
            .unwrap();

        assert_eq!(
            cluster.calls_for("global-unrestricted-psp"),
            vec![Verb::Create, Verb::Replace]
        );
        let stored = cluster
            .object::<PodSecurityPolicy>("global-unrestricted-psp")
            .unwrap();
        assert_eq!(stored.spec.privileged, Some(true));
        assert_eq!(stored.spec.host_network, Some(true));
    }

    #[tokio::test]
    async fn test_namespaced_binding_is_created() {
        let cluster = Arc::new(FakeCluster::new());

        deployer(&cluster, test_retry())
            .deploy::<RoleBinding>(&SYSTEM_UNRESTRICTED.render_namespaced_binding().unwrap())
            .await
            .unwrap();

        let rb = cluster
            .object::<RoleBinding>("system-unrestricted-svc-acct-psp-rolebinding")
            .unwrap();
        assert_eq!(rb.metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(rb.role_ref.name, "system-unrestricted-psp-role");
    }

    #[tokio::test]
    async fn test_namespaced_role_is_created_then_replaced() {
        let cluster = Arc::new(FakeCluster::new());
        let document = "apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: system-unrestricted-psp-role
  namespace: kube-system
rules:
- apiGroups: ['policy']
  resources: ['podsecuritypolicies']
  verbs: ['use']
  resourceNames: ['system-unrestricted-psp']
";
        let deployer = deployer(&cluster, test_retry());

        deployer.deploy::<Role>(document).await.unwrap();
        deployer.deploy::<Role>(document).await.unwrap();

        assert_eq!(
            cluster.calls_for("system-unrestricted-psp-role"),
            vec![Verb::Create, Verb::Create, Verb::Replace]
        );
        let role = cluster.object::<Role>("system-unrestricted-psp-role").unwrap();
        assert_eq!(role.metadata.namespace.as_deref(), Some("kube-system"));
    }

    #[tokio::test]
    async fn test_mismatched_kind_is_a_decode_error() {
        let cluster = Arc::new(FakeCluster::new());

        let err = deployer(&cluster, test_retry())
            .deploy::<RoleBinding>(&GLOBAL_UNRESTRICTED.render_binding())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DecodeError { ref kind, .. } if kind == "RoleBinding"));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_document_makes_no_calls() {
        let cluster = Arc::new(FakeCluster::new());

        let err = deployer(&cluster, test_retry())
            .deploy::<ClusterRole>("kind: ClusterRole\nrules: [unterminated\n")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DecodeError { .. }));
        assert!(cluster.calls().is_empty());
    }
}

mod retry_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_exhausts_after_n_attempts() {
        let cluster = Arc::new(FakeCluster::new().fail(
            Verb::Create,
            "ClusterRole",
            None,
            500,
            "InternalError",
        ));
        let start = Instant::now();

        let err = deployer(&cluster, RetryPolicy::bounded(5, Duration::from_secs(5)))
            .deploy::<ClusterRole>(&GLOBAL_UNRESTRICTED.render_role())
            .await
            .unwrap_err();

        match err {
            Error::TransientApiError {
                kind,
                name,
                attempts,
                ..
            } => {
                assert_eq!(kind, "ClusterRole");
                assert_eq!(name, "global-unrestricted-psp-role");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cluster.count(Verb::Create, "ClusterRole"), 5);
        // Four sleeps between five attempts
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_recover() {
        let cluster = Arc::new(FakeCluster::new().fail(
            Verb::Create,
            "PodSecurityPolicy",
            Some(2),
            503,
            "ServiceUnavailable",
        ));

        deployer(&cluster, RetryPolicy::default())
            .deploy::<PodSecurityPolicy>(&GLOBAL_UNRESTRICTED.render_psp())
            .await
            .unwrap();

        assert_eq!(cluster.count(Verb::Create, "PodSecurityPolicy"), 3);
        assert!(cluster.contains::<PodSecurityPolicy>("global-unrestricted-psp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_replace_reruns_create_then_replace() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_document::<ClusterRole>(&GLOBAL_UNRESTRICTED.render_role())
                .fail(Verb::Replace, "ClusterRole", Some(1), 500, "InternalError"),
        );

        deployer(&cluster, test_retry())
            .deploy::<ClusterRole>(&GLOBAL_UNRESTRICTED.render_role())
            .await
            .unwrap();

        assert_eq!(
            cluster.calls_for("global-unrestricted-psp-role"),
            vec![Verb::Create, Verb::Replace, Verb::Create, Verb::Replace]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_boxed_retry_stops_at_budget() {
        let cluster = Arc::new(FakeCluster::new().fail(
            Verb::Create,
            "PodSecurityPolicy",
            None,
            500,
            "InternalError",
        ));
        let start = Instant::now();

        let err = deployer(&cluster, test_retry())
            .deploy_with::<PodSecurityPolicy>(
                &GLOBAL_UNRESTRICTED.render_psp(),
                &RetryPolicy::default_time_boxed(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransientApiError { attempts: 7, .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }
}
