use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

/// Readiness reporting for the components of the agent.
///
/// The agent is only ready to accept uplinks once its outbound sender is
/// connected (and, when enabled, its MQTT subscription is running).
/// Each component registers itself and reports its own status:
///   - if any component is not healthy, the process is not ready
///   - if every registered component reported healthy, the process is ready
///   - a component registered with a deadline must report again before it
///     expires, otherwise it is considered stalled.
///
/// Components update the registry synchronously, so the status returned by
/// `get_status` always reflects the last report.
#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// Ready processes answer with an empty 204, others with a 503 listing
    /// every component status for debugging.
    fn into_response(self) -> Response {
        match self.healthy {
            true => StatusCode::NO_CONTENT.into_response(),
            false => {
                let body = format!("{:?}", self.components);
                (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered
    Starting,
    /// Reported healthy, without an expiry
    Healthy,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(time::OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
    /// Set by `get_status` when the HealthyUntil deadline is reached
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Option<Duration>,
    components: Components,
}

impl HealthHandle {
    /// Report healthy. For components registered with a deadline, this must be
    /// called more frequently than the deadline.
    pub fn report_healthy(&self) {
        let status = match self.deadline {
            Some(deadline) => {
                ComponentStatus::HealthyUntil(time::OffsetDateTime::now_utc().add(deadline))
            }
            None => ComponentStatus::Healthy,
        };
        self.report_status(status)
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                _ = map.insert(self.component.clone(), status);
            }
            // Poisoned lock: the probes will fail and the process restart
            Err(_) => warn!("poisoned HealthRegistry lock, dropping status report"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a new component in the `Starting` state. The returned handle should
    /// be passed to the component so it can report its own status.
    pub fn register(&self, component: &str, deadline: Option<Duration>) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Returns the overall process status, computed from the status of all the components
    /// currently registered. Can be used as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("poisoned HealthRegistry lock");
            return HealthStatus::default();
        };

        let now = time::OffsetDateTime::now_utc();
        let mut result = HealthStatus {
            // no registered component means nothing is ready yet
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, status) in components.iter() {
            let status = match status {
                ComponentStatus::HealthyUntil(until) if until.le(&now) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(
                status,
                ComponentStatus::Healthy | ComponentStatus::HealthyUntil(_)
            ) {
                result.healthy = false;
            }
            _ = result.components.insert(name.clone(), status);
        }

        if !result.healthy {
            debug!("{} check failed: {:?}", self.name, result.components);
        }
        result
    }
}
