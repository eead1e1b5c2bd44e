use crate::adapters::{AdapterCatalog, DEFAULT_P3_LENGTH};
use crate::error::{ErrorCode, ProcessingError, Result};
use crate::titration::BootstrapSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParameters {
    /// Convert the adapter catalog to RNA before matching.
    pub is_rna: bool,
    pub p3_length: usize,
    /// CSV catalog replacing the bundled one.
    pub adapter_catalog_path: Option<String>,
    pub bootstrap: BootstrapSettings,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            is_rna: true,
            p3_length: DEFAULT_P3_LENGTH,
            adapter_catalog_path: None,
            bootstrap: BootstrapSettings::default(),
        }
    }
}

impl ProcessingParameters {
    pub fn load_from_path(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProcessingError {
            code: ErrorCode::Io,
            message: format!("Could not read config file '{path}': {e}"),
        })?;
        serde_json::from_str(&text).map_err(|e| ProcessingError {
            code: ErrorCode::InvalidInput,
            message: format!("Could not parse config JSON '{path}': {e}"),
        })
    }

    pub fn adapter_catalog(&self) -> Result<AdapterCatalog> {
        match &self.adapter_catalog_path {
            Some(path) => AdapterCatalog::load_from_path(path).map_err(|e| ProcessingError {
                code: ErrorCode::InvalidInput,
                message: format!("Could not load adapter catalog '{path}': {e}"),
            }),
            None => Ok(AdapterCatalog::default()),
        }
    }

    /// Sets one parameter by name, as used by the `SetParameter` operation.
    pub fn set(&mut self, name: &str, value: &serde_json::Value) -> Result<()> {
        let invalid = |what: &str| {
            ProcessingError::invalid_input(format!("SetParameter {name} requires {what}"))
        };
        match name {
            "is_rna" => self.is_rna = value.as_bool().ok_or_else(|| invalid("a boolean"))?,
            "p3_length" => {
                self.p3_length = value.as_u64().ok_or_else(|| invalid("a non-negative integer"))? as usize
            }
            "adapter_catalog_path" => {
                self.adapter_catalog_path = match value {
                    serde_json::Value::Null => None,
                    v => Some(v.as_str().ok_or_else(|| invalid("a path or null"))?.to_string()),
                }
            }
            "n_runs" => {
                let raw = value.as_u64().ok_or_else(|| invalid("a positive integer"))?;
                if raw == 0 {
                    return Err(ProcessingError::invalid_input("n_runs must be >= 1"));
                }
                self.bootstrap.n_runs = raw as usize;
            }
            "n_sigma" => self.bootstrap.n_sigma = value.as_f64().ok_or_else(|| invalid("a number"))?,
            "max_amplitude" => {
                self.bootstrap.max_amplitude = value.as_f64().ok_or_else(|| invalid("a number"))?
            }
            "seed" => {
                self.bootstrap.seed = match value {
                    serde_json::Value::Null => None,
                    v => Some(v.as_u64().ok_or_else(|| invalid("an integer or null"))?),
                }
            }
            "normalization" => {
                self.bootstrap.normalization = serde_json::from_value(value.clone())
                    .map_err(|_| invalid("\"Max\" or \"MinMax\""))?
            }
            _ => {
                return Err(ProcessingError::new(
                    ErrorCode::Unsupported,
                    format!("Unknown parameter '{name}'"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::titration::Normalization;
    use serde_json::json;

    #[test]
    fn test_defaults_from_partial_json() {
        let params: ProcessingParameters =
            serde_json::from_value(json!({"p3_length": 0, "bootstrap": {"n_runs": 5}})).unwrap();
        assert!(params.is_rna);
        assert_eq!(params.p3_length, 0);
        assert_eq!(params.bootstrap.n_runs, 5);
        assert_eq!(params.bootstrap.max_amplitude, 10.0);
        assert_eq!(params.bootstrap.solver.max_iterations, 800);
    }

    #[test]
    fn test_set() {
        let mut params = ProcessingParameters::default();
        params.set("seed", &json!(11)).unwrap();
        params.set("normalization", &json!("MinMax")).unwrap();
        params.set("is_rna", &json!(false)).unwrap();
        assert_eq!(params.bootstrap.seed, Some(11));
        assert_eq!(params.bootstrap.normalization, Normalization::MinMax);
        assert!(!params.is_rna);
        assert!(params.set("n_runs", &json!(0)).is_err());
        assert_eq!(params.set("bogus", &json!(1)).unwrap_err().code, ErrorCode::Unsupported);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"is_rna": false}"#).unwrap();
        let params = ProcessingParameters::load_from_path(file.path().to_str().unwrap()).unwrap();
        assert!(!params.is_rna);
        assert_eq!(params.p3_length, 20);
    }
}
