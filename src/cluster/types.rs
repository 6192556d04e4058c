//! Types shared between the cluster client and its callers.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use kube::api::GroupVersionKind;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Reference to a single resource fetched as a generic document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// `None` for cluster-scoped resources.
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    /// A namespaced resource.
    pub fn namespaced(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// A cluster-scoped resource.
    pub fn cluster_scoped(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }

    /// OLM Subscription.
    pub fn subscription(namespace: &str, name: &str) -> Self {
        Self::namespaced("operators.coreos.com", "v1alpha1", "Subscription", namespace, name)
    }

    /// OLM ClusterServiceVersion.
    pub fn cluster_service_version(namespace: &str, name: &str) -> Self {
        Self::namespaced(
            "operators.coreos.com",
            "v1alpha1",
            "ClusterServiceVersion",
            namespace,
            name,
        )
    }

    /// OpenShift Route.
    pub fn route(namespace: &str, name: &str) -> Self {
        Self::namespaced("route.openshift.io", "v1", "Route", namespace, name)
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.group, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.group, self.kind, self.name),
        }
    }
}

/// Container to run a remote command in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub pod: String,
    pub namespace: String,
    pub container: String,
}

impl ExecTarget {
    pub fn new(
        pod: impl Into<String>,
        namespace: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            pod: pod.into(),
            namespace: namespace.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.namespace, self.pod, self.container)
    }
}

/// Transport failures of an exec stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to open exec stream: {0}")]
    Open(#[from] kube::Error),

    #[error("Stream IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote command failed: {0}")]
    Remote(String),

    #[error("Stream closed: {0}")]
    Closed(String),

    #[error("Stream timed out after {0:?}")]
    Timeout(Duration),
}

/// A boxed stdout/stderr reader.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Handle to a running remote command.
///
/// Readers yield the captured output streams; `completion` resolves once the
/// remote side has reported its exit status. The executor drives all three
/// concurrently so that a full output buffer never blocks completion.
pub struct ExecStream {
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
    pub completion: BoxFuture<'static, Result<(), StreamError>>,
}

impl ExecStream {
    pub fn new(
        stdout: Option<BoxedReader>,
        stderr: Option<BoxedReader>,
        completion: BoxFuture<'static, Result<(), StreamError>>,
    ) -> Self {
        Self {
            stdout,
            stderr,
            completion,
        }
    }
}

impl fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStream")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}
