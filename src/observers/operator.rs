//! Operator install observer.
//!
//! Follows an OLM Subscription to the ClusterServiceVersion it installed and
//! waits for that CSV to reach its terminal success phase.

use tracing::debug;

use crate::cluster::{ClusterClient, ResourceRef};
use crate::document::{Document, Lookup};
use crate::poll::{Condition, ConditionError};

/// CSV phase reported once an operator is fully installed.
pub const CSV_SUCCEEDED_PHASE: &str = "Succeeded";

/// Derived install state of an operator subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    /// The subscription does not exist yet.
    SubscriptionNotFound,
    /// The subscription has not recorded an installed CSV.
    NoInstalledCsv,
    /// The named CSV does not exist yet.
    CsvNotFound { csv: String },
    /// The CSV exists but has not succeeded.
    Installing { csv: String, phase: Option<String> },
    /// The CSV reached the success phase.
    Installed { csv: String },
}

impl InstallState {
    pub fn is_installed(&self) -> bool {
        matches!(self, InstallState::Installed { .. })
    }
}

/// Extract the installed CSV name from a subscription document.
pub fn installed_csv(subscription: &Document) -> Lookup<&str> {
    subscription.str_at(&["status", "installedCSV"])
}

/// Derive the install state from a CSV document.
pub fn csv_state(csv_name: &str, csv: &Document) -> InstallState {
    match csv.str_at(&["status", "phase"]) {
        Lookup::Found(phase) if phase == CSV_SUCCEEDED_PHASE => InstallState::Installed {
            csv: csv_name.to_string(),
        },
        Lookup::Found(phase) => InstallState::Installing {
            csv: csv_name.to_string(),
            phase: Some(phase.to_string()),
        },
        Lookup::Missing { .. } | Lookup::WrongType { .. } => InstallState::Installing {
            csv: csv_name.to_string(),
            phase: None,
        },
    }
}

/// Waits until the operator behind a subscription is installed.
///
/// Every lookup miss (subscription or CSV not found, missing or mistyped
/// field) is a normal rollout state and reads as not-yet.
pub struct OperatorInstall<'a, C> {
    client: &'a C,
    namespace: String,
    subscription: String,
}

impl<'a, C: ClusterClient> OperatorInstall<'a, C> {
    pub fn new(client: &'a C, namespace: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            subscription: subscription.into(),
        }
    }

    /// Observe the current install state once.
    pub async fn observe(&self) -> Result<InstallState, ConditionError> {
        let sub_ref = ResourceRef::subscription(&self.namespace, &self.subscription);
        let Some(subscription) = self
            .client
            .get_document(&sub_ref)
            .await
            .map_err(ConditionError::transient)?
        else {
            return Ok(InstallState::SubscriptionNotFound);
        };

        let csv_name = match installed_csv(&subscription) {
            Lookup::Found(name) if !name.is_empty() => name.to_string(),
            other => {
                debug!(subscription = %self.subscription, reason = %other, "No installed CSV yet");
                return Ok(InstallState::NoInstalledCsv);
            }
        };

        let csv_ref = ResourceRef::cluster_service_version(&self.namespace, &csv_name);
        let csv = self
            .client
            .get_document(&csv_ref)
            .await
            .map_err(ConditionError::transient)?;

        Ok(match csv {
            Some(csv) => csv_state(&csv_name, &csv),
            None => InstallState::CsvNotFound { csv: csv_name },
        })
    }
}

impl<C: ClusterClient> Condition for OperatorInstall<'_, C> {
    async fn evaluate(&self) -> Result<bool, ConditionError> {
        let state = self.observe().await?;
        debug!(subscription = %self.subscription, state = ?state, "Operator install state");
        Ok(state.is_installed())
    }

    fn describe(&self) -> String {
        format!("operator subscription {}/{} installed", self.namespace, self.subscription)
    }
}
