//! Verifier configuration.
//!
//! Everything is read from `MESH_VERIFIER_*` environment variables. Unset
//! variables fall back to the defaults of a stock mesh install; a warning is
//! logged for the ones an operator is expected to set. Durations are whole
//! seconds.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::cluster::ResourceRef;
use crate::observers::ConditionExpectations;
use crate::poll::{PollError, PollSpec};
use crate::scenario::{
    DEFAULT_CLIENT_CONTAINER, DEFAULT_CLIENT_SELECTOR, DEFAULT_CONTROL_PLANE_NAMESPACE,
    DEFAULT_CONTROL_PLANE_SELECTORS, DEFAULT_EXPECTED_STATUS, DEFAULT_INGRESS_PATH,
    DEFAULT_INGRESS_ROUTE, DEFAULT_SERVER_PATH, DEFAULT_SERVER_PORT, DEFAULT_SERVER_SELECTOR,
    DEFAULT_SERVER_SERVICE, ExecSettings, MeshScenario,
};

pub const ENV_PREFIX: &str = "MESH_VERIFIER_";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_WORKLOAD_NAMESPACE: &str = "default";

/// Operator resource polled for status conditions.
pub const OPERATOR_RESOURCE_GROUP: &str = "operator.openshift.io";
pub const OPERATOR_RESOURCE_VERSION: &str = "v1alpha1";
pub const OPERATOR_RESOURCE_KIND: &str = "CertManager";
pub const OPERATOR_RESOURCE_NAME: &str = "cluster";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Invalid poll settings: {0}")]
    Poll(#[from] PollError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Resolved verifier settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub poll_immediate: bool,
    pub workload_namespace: String,
    pub control_plane_namespace: String,
    pub control_plane_selectors: Vec<String>,
    pub client_selector: String,
    pub client_container: String,
    pub server_selector: String,
    pub server_service: String,
    pub server_port: u16,
    pub server_path: String,
    pub ingress_route: String,
    pub ingress_path: String,
    pub expected_status: u16,
    pub exec_max_attempts: u32,
    pub exec_backoff: Duration,
    pub exec_attempt_timeout: Duration,
    pub probe_timeout: Duration,
    /// `namespace/name` of an OLM subscription to gate on.
    pub operator_subscription: Option<(String, String)>,
    /// Controllers whose status conditions are gated on.
    pub operator_controllers: Vec<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        let exec = ExecSettings::default();
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_immediate: true,
            workload_namespace: DEFAULT_WORKLOAD_NAMESPACE.to_string(),
            control_plane_namespace: DEFAULT_CONTROL_PLANE_NAMESPACE.to_string(),
            control_plane_selectors: DEFAULT_CONTROL_PLANE_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            client_selector: DEFAULT_CLIENT_SELECTOR.to_string(),
            client_container: DEFAULT_CLIENT_CONTAINER.to_string(),
            server_selector: DEFAULT_SERVER_SELECTOR.to_string(),
            server_service: DEFAULT_SERVER_SERVICE.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            server_path: DEFAULT_SERVER_PATH.to_string(),
            ingress_route: DEFAULT_INGRESS_ROUTE.to_string(),
            ingress_path: DEFAULT_INGRESS_PATH.to_string(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            exec_max_attempts: exec.max_attempts,
            exec_backoff: exec.attempt_backoff,
            exec_attempt_timeout: exec.attempt_timeout,
            probe_timeout: crate::observers::http::DEFAULT_PROBE_TIMEOUT,
            operator_subscription: None,
            operator_controllers: Vec::new(),
        }
    }
}

impl VerifierConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    ///
    /// Keys are full variable names, e.g. `MESH_VERIFIER_NAMESPACE`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = Self::default();

        let workload_namespace = vars.string("NAMESPACE").unwrap_or_else(|| {
            warn!("{}NAMESPACE not set, using '{}'", ENV_PREFIX, DEFAULT_WORKLOAD_NAMESPACE);
            defaults.workload_namespace.clone()
        });

        let operator_subscription = vars
            .string("OPERATOR_SUBSCRIPTION")
            .map(|raw| parse_namespaced_name(&vars.key("OPERATOR_SUBSCRIPTION"), &raw))
            .transpose()?;

        let config = Self {
            poll_interval: vars.seconds("POLL_INTERVAL_SECS")?.unwrap_or(defaults.poll_interval),
            poll_timeout: vars.seconds("POLL_TIMEOUT_SECS")?.unwrap_or(defaults.poll_timeout),
            poll_immediate: vars.parse("POLL_IMMEDIATE")?.unwrap_or(defaults.poll_immediate),
            workload_namespace,
            control_plane_namespace: vars
                .string("CONTROL_PLANE_NAMESPACE")
                .unwrap_or(defaults.control_plane_namespace),
            control_plane_selectors: vars
                .list("CONTROL_PLANE_SELECTORS")
                .unwrap_or(defaults.control_plane_selectors),
            client_selector: vars.string("CLIENT_SELECTOR").unwrap_or(defaults.client_selector),
            client_container: vars.string("CLIENT_CONTAINER").unwrap_or(defaults.client_container),
            server_selector: vars.string("SERVER_SELECTOR").unwrap_or(defaults.server_selector),
            server_service: vars.string("SERVER_SERVICE").unwrap_or(defaults.server_service),
            server_port: vars.parse("SERVER_PORT")?.unwrap_or(defaults.server_port),
            server_path: vars.string("SERVER_PATH").unwrap_or(defaults.server_path),
            ingress_route: vars.string("INGRESS_ROUTE").unwrap_or(defaults.ingress_route),
            ingress_path: vars.string("INGRESS_PATH").unwrap_or(defaults.ingress_path),
            expected_status: vars.parse("EXPECTED_STATUS")?.unwrap_or(defaults.expected_status),
            exec_max_attempts: vars.parse("EXEC_MAX_ATTEMPTS")?.unwrap_or(defaults.exec_max_attempts),
            exec_backoff: vars.seconds("EXEC_BACKOFF_SECS")?.unwrap_or(defaults.exec_backoff),
            exec_attempt_timeout: vars
                .seconds("EXEC_ATTEMPT_TIMEOUT_SECS")?
                .unwrap_or(defaults.exec_attempt_timeout),
            probe_timeout: vars.seconds("PROBE_TIMEOUT_SECS")?.unwrap_or(defaults.probe_timeout),
            operator_subscription,
            operator_controllers: vars.list("OPERATOR_CONTROLLERS").unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.poll_spec()?;
        if self.exec_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "exec max attempts must be at least 1".into(),
            ));
        }
        if self.exec_attempt_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "exec attempt timeout must be greater than zero".into(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "probe timeout must be greater than zero".into(),
            ));
        }
        if !(100..=599).contains(&self.expected_status) {
            return Err(ConfigError::Validation(format!(
                "expected status {} is not an HTTP status code",
                self.expected_status
            )));
        }
        for (field, value) in [
            ("workload namespace", &self.workload_namespace),
            ("control plane namespace", &self.control_plane_namespace),
            ("client selector", &self.client_selector),
            ("client container", &self.client_container),
            ("server selector", &self.server_selector),
            ("server service", &self.server_service),
            ("ingress route", &self.ingress_route),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} must not be empty", field)));
            }
        }
        if self.control_plane_selectors.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "control plane selectors must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_spec(&self) -> Result<PollSpec, ConfigError> {
        Ok(PollSpec::new(
            self.poll_interval,
            self.poll_timeout,
            self.poll_immediate,
        )?)
    }

    /// Build the scenario these settings describe.
    pub fn scenario(&self) -> Result<MeshScenario, ConfigError> {
        let mut scenario = MeshScenario::new(&self.workload_namespace, self.poll_spec()?)
            .with_exec_settings(ExecSettings {
                max_attempts: self.exec_max_attempts,
                attempt_backoff: self.exec_backoff,
                attempt_timeout: self.exec_attempt_timeout,
            });

        scenario.control_plane_namespace = self.control_plane_namespace.clone();
        scenario.control_plane_selectors = self.control_plane_selectors.clone();
        scenario.client_selector = self.client_selector.clone();
        scenario.client_container = self.client_container.clone();
        scenario.server_selector = self.server_selector.clone();
        scenario.server_service = self.server_service.clone();
        scenario.server_port = self.server_port;
        scenario.server_path = self.server_path.clone();
        scenario.ingress_route = self.ingress_route.clone();
        scenario.ingress_path = self.ingress_path.clone();
        scenario.expected_status = self.expected_status;

        if let Some((namespace, name)) = &self.operator_subscription {
            scenario = scenario.with_operator_install(namespace, name);
        }
        if !self.operator_controllers.is_empty() {
            scenario = scenario.with_operator_status(
                ResourceRef::cluster_scoped(
                    OPERATOR_RESOURCE_GROUP,
                    OPERATOR_RESOURCE_VERSION,
                    OPERATOR_RESOURCE_KIND,
                    OPERATOR_RESOURCE_NAME,
                ),
                ConditionExpectations::for_controllers(&self.operator_controllers),
            );
        }
        Ok(scenario)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn key(&self, name: &str) -> String {
        format!("{}{}", ENV_PREFIX, name)
    }

    /// Non-blank value, trimmed.
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Comma-separated list with blank entries dropped.
    fn list(&self, name: &str) -> Option<Vec<String>> {
        self.string(name).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    var: self.key(name),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn seconds(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }
}

fn parse_namespaced_name(var: &str, raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('/') {
        Some((ns, name)) if !ns.trim().is_empty() && !name.trim().is_empty() => {
            Ok((ns.trim().to_string(), name.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.to_string(),
            reason: "expected namespace/name".into(),
        }),
    }
}
