//! Post-processing of mutational-profiling (MaP) chemical-probing data:
//! adapter detection and trimming, extraction of reactivities over
//! secondary-structure segments and motifs, and bootstrap Hill fits of
//! Mg2+ titrations.

pub mod about;
pub mod adapters;
pub mod engine;
pub mod error;
pub mod extract;
pub mod least_squares;
pub mod parameters;
pub mod search;
pub mod sequence;
pub mod table;
pub mod titration;
pub mod trim;

pub use adapters::{AdapterCatalog, AdapterEntry, trim_p5_and_p3};
pub use error::{ErrorCode, ProcessingError, Result};
pub use extract::{get_motif_data, get_sec_struct_data, get_wt_tlr_data};
pub use rmp_protocol::{HillFit, HillParameters, TitrationFitRecord};
pub use search::{ExactSearch, MotifSearch, SequenceStructure, StructureSearch};
pub use table::{ExperimentRecord, ExperimentTable};
pub use titration::{
    BootstrapSettings, compute_mg_1_2, fit_bootstrap, normalize_data, normalize_data_full,
    normalized_hill_equation,
};
pub use trim::trim;
