use crate::{
    adapters::trim_p5_and_p3,
    error::{ErrorCode, ProcessingError, Result},
    extract::{get_motif_data, get_sec_struct_data, get_wt_tlr_data},
    parameters::ProcessingParameters,
    search::{ExactSearch, MotifSearch, MotifSearchParams, SequenceStructure, StructureSearch},
    table::ExperimentTable,
    titration::{fit_titrations, load_titration_series},
    trim::trim,
};
use rmp_protocol::{Capabilities, TitrationFitRecord, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, sync::Arc};

pub type TableId = String;
pub type OpId = String;
pub type RunId = String;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectState {
    pub tables: BTreeMap<TableId, ExperimentTable>,
    #[serde(default)]
    pub fits: BTreeMap<String, TitrationFitRecord>,
    #[serde(default)]
    pub parameters: ProcessingParameters,
}

impl ProjectState {
    pub fn load_from_path(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProcessingError {
            code: ErrorCode::Io,
            message: format!("Could not read state file '{path}': {e}"),
        })?;
        serde_json::from_str(&text).map_err(|e| ProcessingError {
            code: ErrorCode::InvalidInput,
            message: format!("Could not parse state JSON '{path}': {e}"),
        })
    }

    pub fn save_to_path(&self, path: &str) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| ProcessingError {
            code: ErrorCode::Internal,
            message: format!("Could not serialize state: {e}"),
        })?;
        std::fs::write(path, text).map_err(|e| ProcessingError {
            code: ErrorCode::Io,
            message: format!("Could not write state file '{path}': {e}"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    LoadTable {
        path: String,
        as_id: Option<TableId>,
    },
    LoadRuns {
        path: String,
        sets: Vec<String>,
        as_id: Option<TableId>,
    },
    SaveTable {
        table_id: TableId,
        path: String,
    },
    RemoveTable {
        table_id: TableId,
    },
    Trim {
        input: TableId,
        trim_5p: usize,
        trim_3p: usize,
        output_id: Option<TableId>,
    },
    TrimAdapters {
        input: TableId,
        p3_length: Option<usize>,
        is_rna: Option<bool>,
        output_id: Option<TableId>,
    },
    ExtractSubStructure {
        input: TableId,
        sequence: String,
        structure: String,
        start: Option<usize>,
        end: Option<usize>,
    },
    ExtractMotif {
        input: TableId,
        params: MotifSearchParams,
    },
    ExtractTetraloopReceptor {
        input: TableId,
        start: Option<usize>,
        end: Option<usize>,
    },
    FitTitration {
        path: String,
        conc_column: String,
        value_column: String,
        group_by: Option<String>,
    },
    SetParameter {
        name: String,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub run_id: RunId,
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub created_table_ids: Vec<TableId>,
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fits: Vec<TitrationFitRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: RunId,
    pub op: Operation,
    pub result: OpResult,
}

pub trait Engine {
    fn apply(&mut self, op: Operation) -> Result<OpResult>;
    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>>;
    fn snapshot(&self) -> &ProjectState;
}

/// Applies operations to a [`ProjectState`] with injected search engines.
pub struct ProcessingEngine {
    state: ProjectState,
    journal: Vec<OperationRecord>,
    op_counter: u64,
    search: Arc<dyn StructureSearch + Send + Sync>,
    motifs: Option<Arc<dyn MotifSearch + Send + Sync>>,
}

impl Default for ProcessingEngine {
    fn default() -> Self {
        Self {
            state: ProjectState::default(),
            journal: vec![],
            op_counter: 0,
            search: Arc::new(ExactSearch),
            motifs: None,
        }
    }
}

impl ProcessingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ProjectState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: Arc<dyn StructureSearch + Send + Sync>) -> Self {
        self.search = search;
        self
    }

    pub fn with_motif_search(mut self, motifs: Arc<dyn MotifSearch + Send + Sync>) -> Self {
        self.motifs = Some(motifs);
        self
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ProjectState {
        &mut self.state
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: PROTOCOL_VERSION.to_string(),
            supported_operations: vec![
                "LoadTable".to_string(),
                "LoadRuns".to_string(),
                "SaveTable".to_string(),
                "RemoveTable".to_string(),
                "Trim".to_string(),
                "TrimAdapters".to_string(),
                "ExtractSubStructure".to_string(),
                "ExtractMotif".to_string(),
                "ExtractTetraloopReceptor".to_string(),
                "FitTitration".to_string(),
                "SetParameter".to_string(),
            ],
            supported_table_formats: vec!["JsonRecords".to_string()],
            deterministic_operation_log: true,
        }
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn derive_table_id(path: &str) -> TableId {
        Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "table".to_string())
    }

    fn unique_table_id(&self, base: &str) -> TableId {
        if !self.state.tables.contains_key(base) {
            return base.to_string();
        }
        let mut i = 2usize;
        loop {
            let candidate = format!("{base}_{i}");
            if !self.state.tables.contains_key(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    fn table(&self, table_id: &str) -> Result<&ExperimentTable> {
        self.state.tables.get(table_id).ok_or_else(|| ProcessingError {
            code: ErrorCode::NotFound,
            message: format!("Table '{table_id}' not found"),
        })
    }

    fn insert_table(&mut self, base: &str, table: ExperimentTable, result: &mut OpResult) {
        let table_id = self.unique_table_id(base);
        result
            .messages
            .push(format!("Created table '{table_id}' with {} records", table.len()));
        self.state.tables.insert(table_id.clone(), table);
        result.created_table_ids.push(table_id);
    }

    fn extracted(result: &mut OpResult, input: &str, values: Vec<Vec<f64>>) {
        result
            .messages
            .push(format!("Extracted {} rows from '{input}'", values.len()));
        result.extracted = Some(values);
    }

    fn apply_internal(&mut self, op: Operation) -> Result<OpResult> {
        let op_id = self.next_op_id();
        let mut result = OpResult {
            op_id,
            created_table_ids: vec![],
            messages: vec![],
            extracted: None,
            fits: vec![],
        };

        match op {
            Operation::LoadTable { path, as_id } => {
                let table = ExperimentTable::load_from_path(&path)?;
                let base = as_id.unwrap_or_else(|| Self::derive_table_id(&path));
                self.insert_table(&base, table, &mut result);
            }
            Operation::LoadRuns { path, sets, as_id } => {
                let table = ExperimentTable::load_runs(&path, &sets)?;
                let base = as_id.unwrap_or_else(|| "runs".to_string());
                self.insert_table(&base, table, &mut result);
            }
            Operation::SaveTable { table_id, path } => {
                self.table(&table_id)?.save_to_path(&path)?;
                result
                    .messages
                    .push(format!("Wrote table '{table_id}' to '{path}'"));
            }
            Operation::RemoveTable { table_id } => {
                self.state.tables.remove(&table_id).ok_or_else(|| ProcessingError {
                    code: ErrorCode::NotFound,
                    message: format!("Table '{table_id}' not found"),
                })?;
                result.messages.push(format!("Removed table '{table_id}'"));
            }
            Operation::Trim {
                input,
                trim_5p,
                trim_3p,
                output_id,
            } => {
                let trimmed = trim(self.table(&input)?, trim_5p, trim_3p)?;
                let base = output_id.unwrap_or_else(|| format!("{input}_trimmed"));
                self.insert_table(&base, trimmed, &mut result);
            }
            Operation::TrimAdapters {
                input,
                p3_length,
                is_rna,
                output_id,
            } => {
                let params = &self.state.parameters;
                let catalog = params.adapter_catalog()?;
                let p3_length = p3_length.unwrap_or(params.p3_length);
                let is_rna = is_rna.unwrap_or(params.is_rna);
                let trimmed = trim_p5_and_p3(self.table(&input)?, &catalog, is_rna, p3_length)?;
                let base = output_id.unwrap_or_else(|| format!("{input}_trimmed"));
                self.insert_table(&base, trimmed, &mut result);
            }
            Operation::ExtractSubStructure {
                input,
                sequence,
                structure,
                start,
                end,
            } => {
                let query = SequenceStructure::new(&sequence, &structure)?;
                let values =
                    get_sec_struct_data(self.table(&input)?, self.search.as_ref(), &query, start, end)?;
                Self::extracted(&mut result, &input, values);
            }
            Operation::ExtractMotif { input, params } => {
                let motifs = self.motifs.as_ref().ok_or_else(|| ProcessingError {
                    code: ErrorCode::Unsupported,
                    message: "No motif search engine is configured".to_string(),
                })?;
                let values = get_motif_data(self.table(&input)?, motifs.as_ref(), &params)?;
                Self::extracted(&mut result, &input, values);
            }
            Operation::ExtractTetraloopReceptor { input, start, end } => {
                let values = get_wt_tlr_data(self.table(&input)?, self.search.as_ref(), start, end)?;
                Self::extracted(&mut result, &input, values);
            }
            Operation::FitTitration {
                path,
                conc_column,
                value_column,
                group_by,
            } => {
                let series =
                    load_titration_series(&path, &conc_column, &value_column, group_by.as_deref())?;
                let fits = fit_titrations(&series, &self.state.parameters.bootstrap)?;
                let stem = Self::derive_table_id(&path);
                for fit in &fits {
                    let key = match &fit.group {
                        Some(group) => format!("{stem}:{group}"),
                        None => stem.clone(),
                    };
                    self.state.fits.insert(key, fit.clone());
                }
                result
                    .messages
                    .push(format!("Fitted {} titration series from '{path}'", fits.len()));
                result.fits = fits;
            }
            Operation::SetParameter { name, value } => {
                self.state.parameters.set(&name, &value)?;
                result
                    .messages
                    .push(format!("Set parameter '{name}' to {value}"));
            }
        }

        for message in &result.messages {
            log::info!("{}: {message}", result.op_id);
        }
        Ok(result)
    }
}

impl Engine for ProcessingEngine {
    fn apply(&mut self, op: Operation) -> Result<OpResult> {
        let run_id = "interactive".to_string();
        let result = self.apply_internal(op.clone())?;
        self.journal.push(OperationRecord {
            run_id,
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>> {
        let mut results = Vec::new();
        for op in &wf.ops {
            let result = self.apply_internal(op.clone())?;
            self.journal.push(OperationRecord {
                run_id: wf.run_id.clone(),
                op: op.clone(),
                result: result.clone(),
            });
            results.push(result);
        }
        Ok(results)
    }

    fn snapshot(&self) -> &ProjectState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Motif;
    use crate::table::ExperimentRecord;
    use serde_json::json;

    struct OneMotif;

    impl MotifSearch for OneMotif {
        fn get_motifs(&self, _full: &SequenceStructure, _params: &MotifSearchParams) -> Result<Vec<Motif>> {
            Ok(vec![Motif {
                m_type: "HAIRPIN".to_string(),
                strands: vec![vec![22, 23, 24, 25]],
            }])
        }
    }

    fn construct_table() -> ExperimentTable {
        // adapter GGAAGAUCGAGUAGAUCAAA + hairpin + 20 nt 3' tail
        let insert = "GGACUUCGGUCC";
        let insert_ss = "((((....))))";
        let p5 = "GGAAGAUCGAGUAGAUCAAA";
        let p3 = "AAAGAAACAACAACAACAAC";
        let sequence = format!("{p5}{insert}{p3}");
        let structure = format!("{}{insert_ss}{}", ".".repeat(20), ".".repeat(20));
        let data: Vec<f64> = (0..sequence.len()).map(|i| i as f64).collect();
        ExperimentTable::new(vec![
            ExperimentRecord::new(&sequence)
                .with_structure(&structure)
                .with_data(data)
                .with_column("name", json!("hp1")),
        ])
    }

    fn engine_with_table() -> ProcessingEngine {
        let mut state = ProjectState::default();
        state.tables.insert("raw".to_string(), construct_table());
        ProcessingEngine::from_state(state)
    }

    #[test]
    fn test_trim_adapters() {
        let mut engine = engine_with_table();
        let res = engine
            .apply(Operation::TrimAdapters {
                input: "raw".to_string(),
                p3_length: None,
                is_rna: None,
                output_id: None,
            })
            .unwrap();
        assert_eq!(res.created_table_ids, vec!["raw_trimmed".to_string()]);
        let trimmed = &engine.state().tables["raw_trimmed"];
        let record = &trimmed.records()[0];
        assert_eq!(record.sequence, "GGACUUCGGUCC");
        assert_eq!(record.data.as_ref().unwrap()[0], 20.0);
        assert_eq!(record.extra["name"], json!("hp1"));
        assert_eq!(engine.operation_log().len(), 1);
    }

    #[test]
    fn test_trim_then_extract_workflow() {
        let mut engine = engine_with_table();
        let wf: Workflow = serde_json::from_value(json!({
            "run_id": "wf-1",
            "ops": [
                {"Trim": {"input": "raw", "trim_5p": 20, "trim_3p": 20, "output_id": "ins"}},
                {"ExtractSubStructure": {"input": "ins", "sequence": "UUCG",
                                         "structure": "....", "start": null, "end": null}}
            ]
        }))
        .unwrap();
        let results = engine.apply_workflow(wf).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].extracted, Some(vec![vec![24.0, 25.0, 26.0, 27.0]]));
        assert!(engine.operation_log().iter().all(|r| r.run_id == "wf-1"));
    }

    #[test]
    fn test_extract_motif_needs_engine() {
        let mut engine = engine_with_table();
        let op = Operation::ExtractMotif {
            input: "raw".to_string(),
            params: MotifSearchParams::default(),
        };
        let err = engine.apply(op.clone()).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unsupported);

        let mut engine = engine_with_table().with_motif_search(Arc::new(OneMotif));
        let res = engine.apply(op).unwrap();
        assert_eq!(res.extracted, Some(vec![vec![22.0, 23.0, 24.0, 25.0]]));
    }

    #[test]
    fn test_missing_table() {
        let mut engine = ProcessingEngine::new();
        let err = engine
            .apply(Operation::Trim {
                input: "nope".to_string(),
                trim_5p: 1,
                trim_3p: 1,
                output_id: None,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(engine.operation_log().is_empty());
    }

    #[test]
    fn test_fit_titration_and_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let conc = [0.0, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
        let rows: Vec<serde_json::Value> = conc
            .iter()
            .map(|&c: &f64| {
                let bound = c.powi(2) / (1.0 + c.powi(2));
                json!({"name": "tlr", "mg_conc": c, "gaaa_avg": 2.0 - bound})
            })
            .collect();
        let path = dir.path().join("titration.json");
        std::fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();

        let mut engine = ProcessingEngine::new();
        engine
            .apply(Operation::SetParameter {
                name: "n_runs".to_string(),
                value: json!(10),
            })
            .unwrap();
        engine
            .apply(Operation::SetParameter {
                name: "seed".to_string(),
                value: json!(3),
            })
            .unwrap();
        let res = engine
            .apply(Operation::FitTitration {
                path: path.to_string_lossy().to_string(),
                conc_column: "mg_conc".to_string(),
                value_column: "gaaa_avg".to_string(),
                group_by: Some("name".to_string()),
            })
            .unwrap();
        assert_eq!(res.fits.len(), 1);
        let fit = &engine.state().fits["titration:tlr"].fit;
        assert!((fit.params.k - 1.0).abs() < 1e-3, "{:?}", fit.params);
        assert!((fit.params.n - 2.0).abs() < 1e-3);
        assert!((fit.params.a - 0.5).abs() < 1e-3);

        let state_path = dir.path().join("state.json");
        let state_path = state_path.to_str().unwrap();
        engine.state().save_to_path(state_path).unwrap();
        let state = ProjectState::load_from_path(state_path).unwrap();
        assert_eq!(state.parameters.bootstrap.n_runs, 10);
        assert_eq!(state.fits.len(), 1);
    }

    #[test]
    fn test_load_table_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constructs.json");
        construct_table().save_to_path(path.to_str().unwrap()).unwrap();
        let mut engine = ProcessingEngine::new();
        for _ in 0..2 {
            engine
                .apply(Operation::LoadTable {
                    path: path.to_string_lossy().to_string(),
                    as_id: None,
                })
                .unwrap();
        }
        let ids: Vec<&String> = engine.state().tables.keys().collect();
        assert_eq!(ids, vec!["constructs", "constructs_2"]);
    }
}
