//! Status-condition observer for cluster-scoped operator resources.
//!
//! Operators built on the OpenShift library-go framework report one
//! `<controller>Available`, `<controller>Degraded` and
//! `<controller>Progressing` condition per managed controller on their
//! operator resource. The observer waits until each expected condition
//! carries the expected status.

use serde_json::Value;
use tracing::debug;

use crate::cluster::{ClusterClient, ResourceRef};
use crate::document::{Document, Lookup};
use crate::poll::{Condition, ConditionError};

/// One `type` -> `status` expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedCondition {
    pub condition_type: String,
    pub status: String,
}

impl ExpectedCondition {
    pub fn new(condition_type: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            status: status.into(),
        }
    }
}

/// Builder for the set of conditions an operator resource must report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionExpectations {
    expected: Vec<ExpectedCondition>,
}

impl ConditionExpectations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the expectation for a condition type
    pub fn expect(mut self, condition_type: impl Into<String>, status: impl Into<String>) -> Self {
        let condition = ExpectedCondition::new(condition_type, status);
        if let Some(existing) = self
            .expected
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            *existing = condition;
        } else {
            self.expected.push(condition);
        }
        self
    }

    /// Available=True, Degraded=False, Progressing=False for each controller.
    pub fn for_controllers<I, S>(controllers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        controllers.into_iter().fold(Self::new(), |acc, name| {
            let name = name.as_ref();
            acc.expect(format!("{}Available", name), "True")
                .expect(format!("{}Degraded", name), "False")
                .expect(format!("{}Progressing", name), "False")
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExpectedCondition> {
        self.expected.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    /// Return the expectations `doc` does not meet yet.
    ///
    /// A missing or malformed `status.conditions` list fails every expectation.
    pub fn unmet<'e>(&'e self, doc: &Document) -> Vec<&'e ExpectedCondition> {
        let conditions = match doc.array_at(&["status", "conditions"]) {
            Lookup::Found(items) => items,
            Lookup::Missing { .. } | Lookup::WrongType { .. } => &[],
        };
        self.expected
            .iter()
            .filter(|e| condition_status(conditions, &e.condition_type) != Some(e.status.as_str()))
            .collect()
    }
}

fn condition_status<'v>(conditions: &'v [Value], condition_type: &str) -> Option<&'v str> {
    conditions
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
}

/// Waits until an operator resource reports the expected conditions.
pub struct OperatorConditions<'a, C> {
    client: &'a C,
    resource: ResourceRef,
    expectations: ConditionExpectations,
}

impl<'a, C: ClusterClient> OperatorConditions<'a, C> {
    pub fn new(client: &'a C, resource: ResourceRef, expectations: ConditionExpectations) -> Self {
        Self {
            client,
            resource,
            expectations,
        }
    }
}

impl<C: ClusterClient> Condition for OperatorConditions<'_, C> {
    async fn evaluate(&self) -> Result<bool, ConditionError> {
        let Some(doc) = self
            .client
            .get_document(&self.resource)
            .await
            .map_err(ConditionError::transient)?
        else {
            debug!(resource = %self.resource, "Operator resource not found yet");
            return Ok(false);
        };

        let unmet = self.expectations.unmet(&doc);
        if !unmet.is_empty() {
            let pending: Vec<&str> = unmet.iter().map(|c| c.condition_type.as_str()).collect();
            debug!(resource = %self.resource, pending = ?pending, "Operator conditions not met");
        }
        Ok(unmet.is_empty())
    }

    fn describe(&self) -> String {
        format!("{} conditions", self.resource)
    }
}
