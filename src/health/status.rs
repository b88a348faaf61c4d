//! Health levels shared by every component.
//!
//! # Ordering
//! ```text
//! Healthy < Warning < Critical < Unhealthy
//! ```
//! An aggregate report takes the worst level of its parts.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Unhealthy,
}

impl HealthStatus {
    /// Classify a ratio in [0, 1] against warning and critical thresholds.
    ///
    /// `ratio < warning` is healthy, `ratio > critical` is critical, anything
    /// in between is a warning.
    pub fn from_ratio(ratio: f64, warning: f64, critical: f64) -> Self {
        if ratio > critical {
            HealthStatus::Critical
        } else if ratio < warning {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        }
    }

    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    /// Numeric level exported as the health gauge.
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ratio_boundaries() {
        assert_eq!(HealthStatus::from_ratio(0.69, 0.7, 0.9), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_ratio(0.7, 0.7, 0.9), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_ratio(0.9, 0.7, 0.9), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_ratio(0.91, 0.7, 0.9), HealthStatus::Critical);
    }

    #[test]
    fn test_worst() {
        assert_eq!(HealthStatus::Healthy.worst(HealthStatus::Warning), HealthStatus::Warning);
        assert_eq!(HealthStatus::Unhealthy.worst(HealthStatus::Critical), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::Unhealthy.level(), 3);
    }
}
