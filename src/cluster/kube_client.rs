//! kube-rs implementation of [`ClusterClient`].

use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, ApiResource, AttachParams, DynamicObject, ListParams};
use kube::Client;
use tracing::{debug, instrument};

use super::types::{BoxedReader, ExecStream, ExecTarget, ResourceRef, StreamError};
use super::{ClusterClient, ClusterError};
use crate::document::Document;

/// Cluster client backed by a kube-rs [`Client`].
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying kube client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn dynamic_api(&self, resource: &ResourceRef) -> Api<DynamicObject> {
        let ar = ApiResource::from_gvk(&resource.gvk());
        match &resource.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self))]
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        debug!(count = list.items.len(), "Listed pods");
        Ok(list.items)
    }

    #[instrument(skip(self), fields(resource = %resource))]
    async fn get_document(&self, resource: &ResourceRef) -> Result<Option<Document>, ClusterError> {
        let api = self.dynamic_api(resource);
        match api.get_opt(&resource.name).await? {
            Some(obj) => Ok(Some(Document::new(serde_json::to_value(obj)?))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, command), fields(target = %target))]
    async fn open_exec(
        &self,
        target: &ExecTarget,
        command: &[String],
    ) -> Result<ExecStream, StreamError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let params = AttachParams::default()
            .container(target.container.clone())
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut process = pods.exec(&target.pod, command.to_vec(), &params).await?;

        let stdout = process.stdout().map(|s| Box::new(s) as BoxedReader);
        let stderr = process.stderr().map(|s| Box::new(s) as BoxedReader);
        let status = process.take_status();

        let completion = async move {
            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            process
                .join()
                .await
                .map_err(|e| StreamError::Closed(e.to_string()))?;
            check_exit_status(status)
        }
        .boxed();

        debug!("Exec stream established");
        Ok(ExecStream::new(stdout, stderr, completion))
    }
}

/// Interpret the status object sent on the exec error channel.
///
/// A missing status means the channel closed without reporting one; the
/// captured output is still handed to the caller in that case.
fn check_exit_status(status: Option<Status>) -> Result<(), StreamError> {
    let Some(status) = status else {
        debug!("Exec finished without a status object");
        return Ok(());
    };
    match status.status.as_deref() {
        Some("Success") | None => Ok(()),
        Some(other) => Err(StreamError::Remote(format!(
            "{} ({}): {}",
            other,
            status.reason.unwrap_or_default(),
            status.message.unwrap_or_default()
        ))),
    }
}
