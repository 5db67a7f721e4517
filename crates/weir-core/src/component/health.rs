use chrono::{DateTime, Utc};

/// The coarse health states a component node can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthType {
    /// No evaluation has completed yet
    Unknown,
    /// The node evaluated and the component accepted its arguments
    Healthy,
    /// Evaluation, update, or run failed; the last valid state keeps running
    Unhealthy,
    /// The component's run loop returned
    Exited,
}

/// A timestamped health record, aggregated by the controller for
/// introspection.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Health {
    /// Current state
    pub state: HealthType,
    /// Human-readable explanation of the state
    pub message: String,
    /// When the state last changed
    pub updated_at: DateTime<Utc>,
}

impl Health {
    /// A fresh record in the given state
    pub fn new(state: HealthType, message: impl Into<String>) -> Self {
        Health {
            state,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }

    /// Initial state before any evaluation
    pub fn unknown() -> Self {
        Health::new(HealthType::Unknown, "component is not yet evaluated")
    }

    /// Healthy with an explanation
    pub fn healthy(message: impl Into<String>) -> Self {
        Health::new(HealthType::Healthy, message)
    }

    /// Unhealthy with an explanation
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Health::new(HealthType::Unhealthy, message)
    }

    /// The run loop returned
    pub fn exited(message: impl Into<String>) -> Self {
        Health::new(HealthType::Exited, message)
    }
}

impl Default for Health {
    fn default() -> Self {
        Health::unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_constructors() {
        assert_eq!(Health::unknown().state, HealthType::Unknown);
        assert_eq!(Health::healthy("ok").state, HealthType::Healthy);
        assert_eq!(Health::unhealthy("bad").state, HealthType::Unhealthy);
        assert_eq!(Health::exited("done").state, HealthType::Exited);
    }

    #[test]
    fn test_health_serializes_state_lowercase() {
        let json = serde_json::to_value(Health::healthy("ok")).unwrap();
        assert_eq!(json["state"], "healthy");
        assert_eq!(json["message"], "ok");
    }
}
