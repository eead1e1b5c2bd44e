//! Shared machine-readable contracts for RNA MaP processing.
//!
//! These types are what the CLI prints and what the project state stores, so
//! their serialized field names are part of the interface.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "v1";

/// Parameters of the normalized Hill equation, always in `(K, n, A)` order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HillParameters {
    /// Half-saturation (dissociation) constant.
    pub k: f64,
    /// Hill coefficient.
    pub n: f64,
    /// Amplitude.
    pub a: f64,
}

impl HillParameters {
    pub fn new(k: f64, n: f64, a: f64) -> Self {
        Self { k, n, a }
    }

    pub fn from_array(values: [f64; 3]) -> Self {
        Self {
            k: values[0],
            n: values[1],
            a: values[2],
        }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.k, self.n, self.a]
    }

    pub fn is_finite(&self) -> bool {
        self.k.is_finite() && self.n.is_finite() && self.a.is_finite()
    }
}

/// Result of a bootstrapped Hill fit.
///
/// `params` and `errors` are the mean and the scaled standard deviation of the
/// accepted bootstrap runs. `point_estimate` is the single least-squares fit
/// to the unperturbed data and is reported separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HillFit {
    pub params: HillParameters,
    pub errors: HillParameters,
    pub point_estimate: HillParameters,
    pub accepted_runs: usize,
    pub requested_runs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitrationFitRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub points: usize,
    pub fit: HillFit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub supported_table_formats: Vec<String>,
    pub deterministic_operation_log: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hill_parameters_order() {
        let p = HillParameters::from_array([2.0, 1.5, 0.9]);
        assert_eq!(p.k, 2.0);
        assert_eq!(p.n, 1.5);
        assert_eq!(p.a, 0.9);
        assert_eq!(p.to_array(), [2.0, 1.5, 0.9]);
        assert!(p.is_finite());
        assert!(!HillParameters::new(f64::NAN, 1.0, 1.0).is_finite());
    }

    #[test]
    fn test_fit_record_json() {
        let record = TitrationFitRecord {
            group: None,
            points: 16,
            fit: HillFit {
                params: HillParameters::new(1.0, 2.0, 0.5),
                errors: HillParameters::default(),
                point_estimate: HillParameters::new(1.0, 2.0, 0.5),
                accepted_runs: 100,
                requested_runs: 100,
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("group").is_none());
        assert_eq!(value["fit"]["params"]["n"], serde_json::json!(2.0));
        let back: TitrationFitRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
