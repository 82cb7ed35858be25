//! Per-component reachability report.

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use askdb_core::config::HealthSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentStatus {
    Up,
    Down,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn not_configured(name: &str) -> Self {
        Self { name: name.to_string(), status: ComponentStatus::Degraded, latency_ms: 0, message: Some("not configured".into()) }
    }

    pub(crate) fn append_message(&mut self, extra: String) {
        self.message = Some(match self.message.take() {
            Some(m) => format!("{m}; {extra}"),
            None => extra,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn new(components: Vec<ComponentHealth>) -> Self {
        Self { status: derive_overall(&components), components }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> { self.components.iter().find(|c| c.name == name) }
}

/// Down if search or generation is down, since no answer can be produced
/// without them. Degraded if anything else is not up.
fn derive_overall(components: &[ComponentHealth]) -> ComponentStatus {
    let mut worst = ComponentStatus::Up;
    for c in components {
        match c.status {
            ComponentStatus::Down if matches!(c.name.as_str(), "search" | "generation") => return ComponentStatus::Down,
            ComponentStatus::Down | ComponentStatus::Degraded => worst = ComponentStatus::Degraded,
            ComponentStatus::Up => {}
        }
    }
    worst
}

/// Run one probe under the configured deadline.
pub(crate) async fn probe<F, E>(name: &str, settings: &HealthSettings, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(settings.probe_timeout(), check).await;
    let elapsed = started.elapsed();
    let latency_ms = elapsed.as_millis() as u64;
    let (status, message) = match outcome {
        Ok(Ok(())) if elapsed > settings.slow_threshold() => (ComponentStatus::Degraded, Some(format!("slow response ({latency_ms} ms)"))),
        Ok(Ok(())) => (ComponentStatus::Up, None),
        Ok(Err(e)) => (ComponentStatus::Down, Some(e.to_string())),
        Err(_) => (ComponentStatus::Down, Some(format!("no response within {:?}", settings.probe_timeout()))),
    };
    ComponentHealth { name: name.to_string(), status, latency_ms, message }
}
