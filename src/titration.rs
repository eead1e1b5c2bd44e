//! Hill-equation fitting of titration series with bootstrap error estimates.
//!
//! The titration response of a construct (for example the reactivity of a
//! tetraloop/receptor contact across Mg2+ concentrations) decreases as the
//! ligand binds. It is normalized, inverted and fitted with
//! [`normalized_hill_equation`]. Uncertainty comes from refitting the data
//! perturbed with Gaussian noise the size of the point-fit residuals.

use crate::error::{ErrorCode, ProcessingError, Result};
use crate::least_squares::{minimize, LeastSquaresOptions};
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rmp_protocol::{HillFit, HillParameters, TitrationFitRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Initial guess `[K, n, A]`.
pub const DEFAULT_INITIAL_GUESS: [f64; 3] = [1.0, 1.0, 0.5];
pub const DEFAULT_MAX_AMPLITUDE: f64 = 10.0;

pub fn normalized_hill_equation(conc: f64, k: f64, n: f64, a: f64) -> f64 {
    let ratio = (conc / k).powf(n);
    a * ratio / (1.0 + ratio)
}

fn all_equal(data: &[f64]) -> bool {
    data.windows(2).all(|w| w[0] == w[1])
}

fn max_of(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn min_of(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Min-max scaling to `[0, 1]`. A constant series is returned unchanged.
pub fn normalize_data_full(data: &[f64]) -> Vec<f64> {
    if all_equal(data) {
        return data.to_vec();
    }
    let (min, max) = (min_of(data), max_of(data));
    data.iter().map(|x| (x - min) / (max - min)).collect()
}

/// Scaling by the maximum. A constant series is returned unchanged.
pub fn normalize_data(data: &[f64]) -> Vec<f64> {
    if all_equal(data) {
        return data.to_vec();
    }
    let max = max_of(data);
    data.iter().map(|x| x / max).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Normalization {
    /// `x / max`
    #[default]
    Max,
    /// `(x - min) / (max - min)`
    MinMax,
}

impl Normalization {
    pub fn apply(self, data: &[f64]) -> Vec<f64> {
        match self {
            Self::Max => normalize_data(data),
            Self::MinMax => normalize_data_full(data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    pub n_runs: usize,
    pub n_sigma: f64,
    /// Runs whose fitted amplitude exceeds this are discarded.
    pub max_amplitude: f64,
    pub seed: Option<u64>,
    pub normalization: Normalization,
    pub solver: LeastSquaresOptions,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            n_runs: 100,
            n_sigma: 1.0,
            max_amplitude: DEFAULT_MAX_AMPLITUDE,
            seed: None,
            normalization: Normalization::default(),
            solver: LeastSquaresOptions::default(),
        }
    }
}

impl BootstrapSettings {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapFit {
    /// Mean of the accepted bootstrap runs.
    pub mean: [f64; 3],
    /// `n_sigma` times the standard deviation of the accepted runs.
    pub error: [f64; 3],
    /// Least-squares fit to the unperturbed data.
    pub point: [f64; 3],
    pub accepted_runs: usize,
    pub requested_runs: usize,
}

impl BootstrapFit {
    pub fn into_hill_fit(self) -> HillFit {
        HillFit {
            params: HillParameters::from_array(self.mean),
            errors: HillParameters::from_array(self.error),
            point_estimate: HillParameters::from_array(self.point),
            accepted_runs: self.accepted_runs,
            requested_runs: self.requested_runs,
        }
    }
}

/// Box-Muller standard normal variate.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn check_series(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() != y.len() {
        return Err(ProcessingError::invalid_input(format!(
            "{} concentrations but {} measurements",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 3 {
        return Err(ProcessingError::invalid_input(format!(
            "a 3-parameter fit needs at least 3 points, got {}",
            x.len()
        )));
    }
    if !x.iter().chain(y).all(|v| v.is_finite()) {
        return Err(ProcessingError::invalid_input(
            "titration series contains non-finite values",
        ));
    }
    Ok(())
}

fn fit_once<F>(p0: &[f64; 3], x: &[f64], y: &[f64], model: &F, options: &LeastSquaresOptions) -> Result<[f64; 3]>
where
    F: Fn(f64, &[f64; 3]) -> f64,
{
    let fit = minimize(
        |p: &[f64]| {
            let p = [p[0], p[1], p[2]];
            x.iter().zip(y).map(|(&xi, &yi)| model(xi, &p) - yi).collect()
        },
        p0,
        options,
    )?;
    Ok([fit.params[0], fit.params[1], fit.params[2]])
}

/// One bootstrap refit. `None` when the run is rejected: the solver did not
/// converge or the amplitude exceeds `max_amplitude`.
fn fit_resample<F>(
    p0: &[f64; 3],
    x: &[f64],
    y: &[f64],
    model: &F,
    settings: &BootstrapSettings,
) -> Result<Option<[f64; 3]>>
where
    F: Fn(f64, &[f64; 3]) -> f64,
{
    match fit_once(p0, x, y, model, &settings.solver) {
        Ok(run) if run[2] > settings.max_amplitude => {
            log::debug!("bootstrap run rejected, amplitude {:.3}", run[2]);
            Ok(None)
        }
        Ok(run) => Ok(Some(run)),
        Err(e) if e.code == ErrorCode::FitConvergence => {
            log::debug!("bootstrap run rejected, {}", e.message);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Fits `model` to `(x, y)` and estimates parameter uncertainty by residual
/// bootstrap.
///
/// Each of the `n_runs` resamples adds independent `N(0, sigma)` noise to `y`,
/// where `sigma` is the standard deviation of the point-fit residuals, and
/// refits from `p0`. Runs that do not converge or whose `A = p[2]` is above
/// `max_amplitude` are dropped. Only the point fit must converge.
pub fn fit_bootstrap<F>(
    p0: [f64; 3],
    x: &[f64],
    y: &[f64],
    model: F,
    settings: &BootstrapSettings,
) -> Result<BootstrapFit>
where
    F: Fn(f64, &[f64; 3]) -> f64,
{
    check_series(x, y)?;
    if settings.n_runs == 0 {
        return Err(ProcessingError::invalid_input("n_runs must be >= 1"));
    }
    let point = fit_once(&p0, x, y, &model, &settings.solver)?;
    let residuals: Vec<f64> = x.iter().zip(y).map(|(&xi, &yi)| model(xi, &point) - yi).collect();
    let (_, sigma) = mean_and_std(&residuals);

    let mut rng = settings.rng();
    let mut runs: Vec<[f64; 3]> = Vec::with_capacity(settings.n_runs);
    for _ in 0..settings.n_runs {
        let random_y: Vec<f64> = y.iter().map(|yi| yi + sigma * standard_normal(&mut rng)).collect();
        if let Some(run) = fit_resample(&p0, x, &random_y, &model, settings)? {
            runs.push(run);
        }
    }
    if runs.is_empty() {
        return Err(ProcessingError::new(
            ErrorCode::BootstrapExhausted,
            format!(
                "all {} bootstrap runs were rejected (no convergence or amplitude above {})",
                settings.n_runs, settings.max_amplitude
            ),
        ));
    }

    let mut mean = [0.0; 3];
    let mut error = [0.0; 3];
    for k in 0..3 {
        let column: Vec<f64> = runs.iter().map(|r| r[k]).collect();
        let (m, s) = mean_and_std(&column);
        mean[k] = m;
        error[k] = settings.n_sigma * s;
    }
    Ok(BootstrapFit {
        mean,
        error,
        point,
        accepted_runs: runs.len(),
        requested_runs: settings.n_runs,
    })
}

/// Fits the half-saturation Mg2+ concentration of a decreasing titration.
pub fn compute_mg_1_2(mg_conc: &[f64], data: &[f64], settings: &BootstrapSettings) -> Result<HillFit> {
    check_series(mg_conc, data)?;
    let norm: Vec<f64> = settings
        .normalization
        .apply(data)
        .into_iter()
        .map(|v| 1.0 - v)
        .collect();
    if !norm.iter().all(|v| v.is_finite()) {
        return Err(ProcessingError::invalid_input(
            "titration data cannot be normalized (maximum is zero)",
        ));
    }
    let fit = fit_bootstrap(
        DEFAULT_INITIAL_GUESS,
        mg_conc,
        &norm,
        |c, p| normalized_hill_equation(c, p[0], p[1], p[2]),
        settings,
    )?;
    Ok(fit.into_hill_fit())
}

/// Paired concentrations and measurements of one construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitrationSeries {
    pub group: Option<String>,
    pub conc: Vec<f64>,
    pub values: Vec<f64>,
}

fn group_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric_column(record: &Map<String, Value>, column: &str, row: usize) -> Result<f64> {
    record
        .get(column)
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            ProcessingError::invalid_input(format!("missing or non-numeric column '{column}'"))
                .at_row(row)
        })
}

/// Splits titration records into series, one per distinct `group_by` value
/// in order of first appearance, or a single series without grouping.
pub fn series_from_records(
    records: &[Map<String, Value>],
    conc_column: &str,
    value_column: &str,
    group_by: Option<&str>,
) -> Result<Vec<TitrationSeries>> {
    let mut rows = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let group = match group_by {
            Some(column) => Some(group_key(record.get(column).ok_or_else(|| {
                ProcessingError::invalid_input(format!("missing column '{column}'")).at_row(row)
            })?)),
            None => None,
        };
        let conc = numeric_column(record, conc_column, row)?;
        let value = numeric_column(record, value_column, row)?;
        rows.push((group, conc, value));
    }
    let groups: Vec<Option<String>> = rows.iter().map(|(g, _, _)| g.clone()).unique().collect();
    Ok(groups
        .into_iter()
        .map(|group| {
            let (conc, values) = rows
                .iter()
                .filter(|(g, _, _)| *g == group)
                .map(|(_, c, v)| (*c, *v))
                .unzip();
            TitrationSeries { group, conc, values }
        })
        .collect())
}

pub fn load_titration_series(
    path: &str,
    conc_column: &str,
    value_column: &str,
    group_by: Option<&str>,
) -> Result<Vec<TitrationSeries>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        let err = ProcessingError::from(e);
        ProcessingError::new(err.code, format!("Could not read titration table '{path}': {}", err.message))
    })?;
    let records: Vec<Map<String, Value>> = serde_json::from_str(&text).map_err(|e| {
        ProcessingError::invalid_input(format!("Could not parse titration JSON '{path}': {e}"))
    })?;
    series_from_records(&records, conc_column, value_column, group_by)
}

/// Fits every series independently, in parallel. With a configured seed,
/// series `i` uses seed `seed + i` so results do not depend on scheduling.
pub fn fit_titrations(series: &[TitrationSeries], settings: &BootstrapSettings) -> Result<Vec<TitrationFitRecord>> {
    series
        .par_iter()
        .enumerate()
        .map(|(i, s)| {
            let settings = BootstrapSettings {
                seed: settings.seed.map(|seed| seed.wrapping_add(i as u64)),
                ..settings.clone()
            };
            let fit = compute_mg_1_2(&s.conc, &s.values, &settings).map_err(|e| {
                let label = s.group.as_deref().unwrap_or("titration");
                ProcessingError::new(e.code, format!("{label}: {}", e.message))
            })?;
            log::info!(
                "{}: K = {:.4} +/- {:.4}, n = {:.3}",
                s.group.as_deref().unwrap_or("titration"),
                fit.params.k,
                fit.errors.k,
                fit.params.n
            );
            Ok(TitrationFitRecord {
                group: s.group.clone(),
                points: s.conc.len(),
                fit,
            })
        })
        .collect()
}
