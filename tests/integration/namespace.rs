//! RAII namespace management for isolated tests.
//!
//! IMPORTANT: Tests using TestNamespace must use `#[tokio::test(flavor = "multi_thread")]`
//! to support synchronous cleanup via `block_in_place`.

use std::sync::atomic::{AtomicBool, Ordering};

use k8s_openapi::api::core::v1::{Container, Namespace, Pod, PodSpec};
use kube::Client;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams, PropagationPolicy};
use uuid::Uuid;

/// Image for the exec target pod; it only needs `sleep` and `echo`.
pub const SLEEP_IMAGE: &str = "busybox:1.36";

/// A test namespace that is deleted when dropped.
pub struct TestNamespace {
    client: Client,
    name: String,
    cleanup_initiated: AtomicBool,
}

impl TestNamespace {
    /// Create a namespace named `{prefix}-{uuid}`.
    pub async fn create(client: Client, prefix: &str) -> Self {
        let suffix = Uuid::new_v4().to_string()[..8].to_string();
        let name = format!("{}-{}", prefix, suffix);

        let ns_api: Api<Namespace> = Api::all(client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(
                    [(
                        "app.kubernetes.io/managed-by".to_string(),
                        "integration-test".to_string(),
                    )]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        ns_api
            .create(&PostParams::default(), &ns)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test namespace {}: {}", name, e));

        tracing::info!(namespace = %name, "Created test namespace");

        Self {
            client,
            name,
            cleanup_initiated: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a pod labelled `app={app}` with one container named `app`
    /// that sleeps forever.
    pub async fn create_sleep_pod(&self, app: &str) -> Pod {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.name);
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(format!("{}-0", app)),
                labels: Some([("app".to_string(), app.to_string())].into_iter().collect()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: app.to_string(),
                    image: Some(SLEEP_IMAGE.to_string()),
                    command: Some(vec!["sleep".to_string(), "3600".to_string()]),
                    ..Default::default()
                }],
                termination_grace_period_seconds: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        pods.create(&PostParams::default(), &pod)
            .await
            .unwrap_or_else(|e| panic!("Failed to create pod in {}: {}", self.name, e))
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        if self.cleanup_initiated.swap(true, Ordering::SeqCst) {
            return;
        }

        let name = self.name.clone();
        let client = self.client.clone();

        tokio::task::block_in_place(|| {
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async {
                let ns_api: Api<Namespace> = Api::all(client);
                let dp = DeleteParams {
                    propagation_policy: Some(PropagationPolicy::Background),
                    ..Default::default()
                };

                match ns_api.delete(&name, &dp).await {
                    Ok(_) => {
                        tracing::debug!("Drop: namespace {} deletion initiated", name);
                    }
                    Err(kube::Error::Api(e)) if e.code == 404 => {
                        tracing::debug!("Drop: namespace {} already deleted", name);
                    }
                    Err(e) => {
                        tracing::warn!("Drop: failed to delete namespace {}: {}", name, e);
                    }
                }
            });
        });
    }
}
