//! Observer gates over scripted cluster reads.

use std::time::Duration;

use mesh_verifier::cluster::ResourceRef;
use mesh_verifier::observers::{
    ConditionExpectations, InstallState, LookupError, OperatorConditions, OperatorInstall,
    PodReadiness, first_pod_name, route_host,
};
use mesh_verifier::poll::{Condition, PollError, PollSpec, poll_until};
use tokio_util::sync::CancellationToken;

use crate::common::fixtures::{
    ContainerFixture, PodBuilder, creating_pod, csv, operator_resource, ready_pod, route,
    subscription,
};
use crate::mock_cluster::MockCluster;

const NS: &str = "istio-system";
const ISTIOD: &str = "app=istiod";

fn spec() -> PollSpec {
    PollSpec::new(Duration::from_secs(5), Duration::from_secs(60), true).unwrap()
}

#[tokio::test]
async fn test_empty_pod_list_is_not_yet() {
    let cluster = MockCluster::new().with_pods(NS, ISTIOD, vec![]);
    let condition = PodReadiness::new(&cluster, NS, ISTIOD);
    assert_eq!(condition.evaluate().await, Ok(false));
}

#[tokio::test]
async fn test_one_unready_pod_blocks_gate() {
    let cluster = MockCluster::new().with_pods(
        NS,
        ISTIOD,
        vec![
            ready_pod("istiod-a", NS, "istiod"),
            creating_pod("istiod-b", NS, "istiod"),
        ],
    );
    let condition = PodReadiness::new(&cluster, NS, ISTIOD);
    assert_eq!(condition.evaluate().await, Ok(false));
}

#[tokio::test]
async fn test_running_but_unready_container() {
    let pod = PodBuilder::new("istiod-a")
        .namespace(NS)
        .phase("Running")
        .container(ContainerFixture::Ready)
        .container(ContainerFixture::Running)
        .build();
    let cluster = MockCluster::new().with_pods(NS, ISTIOD, vec![pod]);
    let condition = PodReadiness::new(&cluster, NS, ISTIOD);
    assert_eq!(condition.evaluate().await, Ok(false));
}

#[tokio::test]
async fn test_list_error_is_transient() {
    let cluster = MockCluster::new().with_pods_error(NS, ISTIOD, "etcdserver: request timed out");
    let condition = PodReadiness::new(&cluster, NS, ISTIOD);
    let err = condition.evaluate().await.unwrap_err();
    assert!(!err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_pods_become_ready_on_third_tick() {
    let cluster = MockCluster::new()
        .with_pods(NS, ISTIOD, vec![])
        .with_pods(NS, ISTIOD, vec![creating_pod("istiod-a", NS, "istiod")])
        .with_pods(NS, ISTIOD, vec![ready_pod("istiod-a", NS, "istiod")]);

    let outcome = poll_until(
        &spec(),
        &PodReadiness::new(&cluster, NS, ISTIOD),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.ticks, 3);
    assert_eq!(cluster.list_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_pods_never_ready_times_out() {
    let cluster = MockCluster::new().with_pods(NS, ISTIOD, vec![creating_pod("istiod-a", NS, "istiod")]);
    let err = poll_until(
        &spec(),
        &PodReadiness::new(&cluster, NS, ISTIOD),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PollError::Timeout { ticks: 13, .. }));
}

mod operator_install {
    use super::*;

    const OLM_NS: &str = "openshift-operators";
    const SUB: &str = "servicemeshoperator";
    const CSV: &str = "servicemeshoperator.v2.6.1";

    fn sub_ref() -> ResourceRef {
        ResourceRef::subscription(OLM_NS, SUB)
    }

    fn csv_ref() -> ResourceRef {
        ResourceRef::cluster_service_version(OLM_NS, CSV)
    }

    #[tokio::test]
    async fn test_subscription_not_found() {
        let cluster = MockCluster::new();
        let install = OperatorInstall::new(&cluster, OLM_NS, SUB);
        assert_eq!(install.observe().await, Ok(InstallState::SubscriptionNotFound));
        assert_eq!(install.evaluate().await, Ok(false));
    }

    #[tokio::test]
    async fn test_no_installed_csv() {
        let cluster = MockCluster::new().with_document(&sub_ref(), Some(subscription(SUB, None)));
        let install = OperatorInstall::new(&cluster, OLM_NS, SUB);
        assert_eq!(install.observe().await, Ok(InstallState::NoInstalledCsv));
    }

    #[tokio::test]
    async fn test_csv_not_found() {
        let cluster = MockCluster::new().with_document(&sub_ref(), Some(subscription(SUB, Some(CSV))));
        let install = OperatorInstall::new(&cluster, OLM_NS, SUB);
        assert_eq!(
            install.observe().await,
            Ok(InstallState::CsvNotFound {
                csv: CSV.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_csv_succeeded() {
        let cluster = MockCluster::new()
            .with_document(&sub_ref(), Some(subscription(SUB, Some(CSV))))
            .with_document(&csv_ref(), Some(csv(CSV, "Succeeded")));
        let install = OperatorInstall::new(&cluster, OLM_NS, SUB);
        assert_eq!(install.evaluate().await, Ok(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_progresses_to_succeeded() {
        let cluster = MockCluster::new()
            .with_document(&sub_ref(), None)
            .with_document(&sub_ref(), Some(subscription(SUB, None)))
            .with_document(&sub_ref(), Some(subscription(SUB, Some(CSV))))
            .with_document(&csv_ref(), Some(csv(CSV, "Installing")))
            .with_document(&csv_ref(), Some(csv(CSV, "Succeeded")));

        let outcome = poll_until(
            &spec(),
            &OperatorInstall::new(&cluster, OLM_NS, SUB),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // Tick 1: no subscription. Tick 2: no CSV recorded. Tick 3: CSV
        // installing. Tick 4: CSV succeeded.
        assert_eq!(outcome.ticks, 4);
    }
}

mod operator_conditions {
    use super::*;

    const CONTROLLERS: [&str; 3] = [
        "cert-manager-controller-deployment",
        "cert-manager-webhook-deployment",
        "cert-manager-cainjector-deployment",
    ];

    fn resource() -> ResourceRef {
        ResourceRef::cluster_scoped("operator.openshift.io", "v1alpha1", "CertManager", "cluster")
    }

    fn healthy() -> Vec<(String, &'static str)> {
        CONTROLLERS
            .iter()
            .flat_map(|c| {
                [
                    (format!("{}Available", c), "True"),
                    (format!("{}Degraded", c), "False"),
                    (format!("{}Progressing", c), "False"),
                ]
            })
            .collect()
    }

    fn doc(conditions: &[(String, &'static str)]) -> mesh_verifier::document::Document {
        let borrowed: Vec<(&str, &str)> = conditions.iter().map(|(t, s)| (t.as_str(), *s)).collect();
        operator_resource(&borrowed)
    }

    #[tokio::test]
    async fn test_all_conditions_met() {
        let cluster = MockCluster::new().with_document(&resource(), Some(doc(&healthy())));
        let condition = OperatorConditions::new(
            &cluster,
            resource(),
            ConditionExpectations::for_controllers(CONTROLLERS),
        );
        assert_eq!(condition.evaluate().await, Ok(true));
    }

    #[tokio::test]
    async fn test_progressing_controller_blocks() {
        let mut conditions = healthy();
        conditions[2].1 = "True";
        let cluster = MockCluster::new().with_document(&resource(), Some(doc(&conditions)));
        let condition = OperatorConditions::new(
            &cluster,
            resource(),
            ConditionExpectations::for_controllers(CONTROLLERS),
        );
        assert_eq!(condition.evaluate().await, Ok(false));
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_yet() {
        let cluster = MockCluster::new();
        let condition = OperatorConditions::new(
            &cluster,
            resource(),
            ConditionExpectations::for_controllers(CONTROLLERS),
        );
        assert_eq!(condition.evaluate().await, Ok(false));
    }
}

mod lookups {
    use super::*;

    #[tokio::test]
    async fn test_first_pod_name() {
        let cluster = MockCluster::new().with_pods(
            "bookinfo",
            "app=sleep",
            vec![
                ready_pod("sleep-1", "bookinfo", "sleep"),
                ready_pod("sleep-2", "bookinfo", "sleep"),
            ],
        );
        assert_eq!(
            first_pod_name(&cluster, "bookinfo", "app=sleep").await.unwrap(),
            "sleep-1"
        );
    }

    #[tokio::test]
    async fn test_first_pod_name_no_pods() {
        let cluster = MockCluster::new();
        let err = first_pod_name(&cluster, "bookinfo", "app=sleep").await.unwrap_err();
        assert!(matches!(err, LookupError::NoPodsFound { .. }));
    }

    #[tokio::test]
    async fn test_route_host() {
        let cluster = MockCluster::new().with_document(
            &ResourceRef::route(NS, "istio-ingressgateway"),
            Some(route("istio-ingressgateway", "istio-ingressgateway-istio-system.apps.example.com")),
        );
        assert_eq!(
            route_host(&cluster, NS, "istio-ingressgateway").await.unwrap(),
            "istio-ingressgateway-istio-system.apps.example.com"
        );
    }

    #[tokio::test]
    async fn test_route_missing() {
        let cluster = MockCluster::new();
        let err = route_host(&cluster, NS, "istio-ingressgateway").await.unwrap_err();
        assert!(matches!(err, LookupError::NotFound(_)));
    }
}
