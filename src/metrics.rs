//! Prometheus metrics for verification runs.
//!
//! The verifier is a short-lived process, so nothing is served over HTTP.
//! The binary encodes the registry in text exposition format when a run
//! finishes.

use std::time::Duration;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for per-gate metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct GateLabels {
    pub gate: String,
}

impl EncodeLabelSet for GateLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("gate", self.gate.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for gate outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct GateOutcomeLabels {
    pub gate: String,
    pub outcome: String,
}

impl EncodeLabelSet for GateOutcomeLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("gate", self.gate.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for exec attempt outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for a verification run
#[derive(Debug)]
pub struct Metrics {
    /// Condition evaluations per gate
    pub gate_ticks_total: Family<GateLabels, Counter>,
    /// Finished gates by outcome
    pub gate_results_total: Family<GateOutcomeLabels, Counter>,
    /// Time spent waiting on each gate
    pub gate_duration_seconds: Family<GateLabels, Histogram>,
    /// Exec attempts by outcome
    pub exec_attempts_total: Family<OutcomeLabels, Counter>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let gate_ticks_total = Family::<GateLabels, Counter>::default();
        registry.register(
            "mesh_verifier_gate_ticks",
            "Number of condition evaluations per gate",
            gate_ticks_total.clone(),
        );

        let gate_results_total = Family::<GateOutcomeLabels, Counter>::default();
        registry.register(
            "mesh_verifier_gate_results",
            "Number of finished gates by outcome",
            gate_results_total.clone(),
        );

        // Gates wait from seconds up to tens of minutes.
        let gate_duration_seconds = Family::<GateLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.5, 2.0, 13))
        });
        registry.register(
            "mesh_verifier_gate_duration_seconds",
            "Time spent waiting on a gate in seconds",
            gate_duration_seconds.clone(),
        );

        let exec_attempts_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "mesh_verifier_exec_attempts",
            "Number of remote exec attempts by outcome",
            exec_attempts_total.clone(),
        );

        Self {
            gate_ticks_total,
            gate_results_total,
            gate_duration_seconds,
            exec_attempts_total,
            registry,
        }
    }

    /// Record a finished gate
    pub fn record_gate(&self, gate: &str, outcome: &str, ticks: u32, duration: Duration) {
        let labels = GateLabels {
            gate: gate.to_string(),
        };
        self.gate_ticks_total
            .get_or_create(&labels)
            .inc_by(u64::from(ticks));
        self.gate_duration_seconds
            .get_or_create(&labels)
            .observe(duration.as_secs_f64());
        self.gate_results_total
            .get_or_create(&GateOutcomeLabels {
                gate: gate.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record one exec attempt outcome
    pub fn record_exec_attempt(&self, outcome: &str) {
        self.exec_attempts_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Encode all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
