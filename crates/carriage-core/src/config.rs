use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionModel {
    /// Colonizations are transmitted between hosts independently of one
    /// another, strain by strain.
    Independent,
    /// Transmission is attempted for all of a source host's colonizations at
    /// once toward a chosen target.
    Cotransmission,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionScaling {
    /// A host with n colonizations is n times as infectious as a host with 1.
    ByColonization,
    /// Hosts are equally infectious regardless of colonization count.
    ByHost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmigrationResistanceModel {
    Constant,
    FractionResistantGlobal,
    FractionResistantBySerotype,
    HistoryBySerotype,
}

/// Vector-valued option: inline values, or the name of an embedded preset
/// table that is copied into the array at build time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VectorParam {
    Preset(String),
    Values(Vec<f64>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixParam {
    Preset(String),
    Values(Vec<Vec<f64>>),
}

fn vector_preset(param: &'static str, name: &str) -> Option<Vec<f64>> {
    let text = match (param, name) {
        ("gamma", "empirical_usa") => include_str!("../presets/gamma_empirical_usa.json"),
        ("lifetime_distribution", "empirical_usa") => {
            include_str!("../presets/lifetime_distribution_empirical_usa.json")
        }
        ("mean_n_treatments_per_age", "empirical_usa") => {
            include_str!("../presets/mean_n_treatments_per_age_empirical_usa.json")
        }
        _ => return None,
    };
    Some(serde_json::from_str(text).expect("embedded preset table must parse"))
}

fn matrix_preset(param: &'static str, name: &str) -> Option<Vec<Vec<f64>>> {
    let text = match (param, name) {
        ("alpha", "polymod") => include_str!("../presets/alpha_polymod.json"),
        _ => return None,
    };
    Some(serde_json::from_str(text).expect("embedded preset table must parse"))
}

/// Raw parameter record, deserialized from JSON. Every missing option takes
/// the default below; `build()` validates and resolves it into a `Config`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub transmission_model: TransmissionModel,
    pub transmission_scaling: TransmissionScaling,

    /// The time between birthdays; ages are defined by this number.
    pub t_year: f64,
    /// Simulation time before t = 0 during which only birth/death processes
    /// run; colonization dynamics start at t = 0.
    pub demographic_burnin_time: f64,
    pub t_end: f64,

    pub colonization_event_timestep: f64,
    pub verification_timestep: f64,
    pub output_timestep: f64,
    pub output_start: f64,

    pub n_hosts: usize,
    pub n_serotypes: usize,
    pub n_ages: usize,

    pub p_init_immune: f64,
    /// Per-serotype probability of a host being colonized at t = 0;
    /// defaults to 0.02 for every serotype.
    pub init_prob_host_colonized: Option<Vec<f64>>,
    pub init_prob_resistant: f64,

    pub beta: f64,
    pub kappa: f64,
    pub xi: f64,
    pub epsilon: f64,
    pub sigma: f64,
    pub mu_max: f64,
    pub gamma: VectorParam,
    pub gamma_treated_sensitive: f64,
    pub gamma_treated_ratio_resistant_to_sensitive: f64,
    pub ratio_foi_resistant_to_sensitive: f64,

    pub immigration_rate: f64,
    pub immigration_resistance_model: ImmigrationResistanceModel,
    pub p_immigration_resistant: f64,
    pub p_immigration_resistant_bounds: (f64, f64),
    pub resistance_history_length: usize,

    pub treatment_multiplier: f64,
    pub mean_n_treatments_per_age: VectorParam,
    pub min_time_between_treatments: f64,
    pub treatment_duration_mean: f64,
    pub treatment_duration_sd: f64,

    /// Relative weights for the year of death; lifetimes fall uniformly
    /// within the drawn year.
    pub lifetime_distribution: VectorParam,

    pub use_random_mixing: bool,
    /// Age-class contact weights; `alpha[i][j]` is the share of contacts an
    /// individual of age i receives from age j. Required when
    /// `use_random_mixing` is false.
    pub alpha: Option<MatrixParam>,

    /// Sizes of consecutive output age classes; remaining ages form one
    /// final class. Empty means a single class for all ages.
    pub output_ageclasses: Vec<usize>,
    pub enable_output_by_age: bool,

    /// Fixed seed, or null/0 to draw a nonzero 31-bit seed from OS entropy.
    pub random_seed: Option<u64>,
    pub use_calendar_queue: bool,
    pub queue_min_bucket_width: f64,

    pub db_filename: String,
    pub overwrite_db: bool,

    pub load_hosts_from_checkpoint: bool,
    pub checkpoint_load_path: String,
    pub checkpoint_save_prefix: String,
    pub checkpoint_start: Option<f64>,
    pub checkpoint_timestep: Option<f64>,

    /// Free-form job metadata echoed into the `jobs` output stream.
    pub job_info: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for Parameters {
    fn default() -> Self {
        let t_year = 365.0;
        Self {
            transmission_model: TransmissionModel::Independent,
            transmission_scaling: TransmissionScaling::ByColonization,
            t_year,
            demographic_burnin_time: 300.0 * t_year,
            t_end: 300.0 * t_year,
            colonization_event_timestep: 1.0,
            verification_timestep: t_year,
            output_timestep: t_year,
            output_start: 0.0,
            n_hosts: 10_000,
            n_serotypes: 25,
            n_ages: 111,
            p_init_immune: 0.5,
            init_prob_host_colonized: None,
            init_prob_resistant: 0.5,
            beta: 0.0453208,
            kappa: 25.0,
            xi: 1.0,
            epsilon: 0.25,
            sigma: 0.3,
            mu_max: 0.25,
            gamma: VectorParam::Preset("empirical_usa".to_owned()),
            gamma_treated_sensitive: 4.0,
            gamma_treated_ratio_resistant_to_sensitive: 5.0,
            ratio_foi_resistant_to_sensitive: 1.0,
            immigration_rate: 1e-6,
            immigration_resistance_model: ImmigrationResistanceModel::Constant,
            p_immigration_resistant: 0.1,
            p_immigration_resistant_bounds: (0.01, 0.99),
            resistance_history_length: 500,
            treatment_multiplier: 0.0,
            mean_n_treatments_per_age: VectorParam::Preset("empirical_usa".to_owned()),
            min_time_between_treatments: 1.5,
            treatment_duration_mean: 10.0,
            treatment_duration_sd: 3.0,
            lifetime_distribution: VectorParam::Preset("empirical_usa".to_owned()),
            use_random_mixing: true,
            alpha: None,
            output_ageclasses: vec![5, 15],
            enable_output_by_age: true,
            random_seed: None,
            use_calendar_queue: true,
            queue_min_bucket_width: 1e-3,
            db_filename: "output_db.jsonl".to_owned(),
            overwrite_db: false,
            load_hosts_from_checkpoint: false,
            checkpoint_load_path: "checkpoint_in.json".to_owned(),
            checkpoint_save_prefix: "checkpoint_out".to_owned(),
            checkpoint_start: None,
            checkpoint_timestep: None,
            job_info: None,
        }
    }
}

/// Row-normalized contact matrix over single-year ages. Rows that summed to
/// zero are flagged: targets of those ages receive no contacts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContactMatrix {
    n_ages: usize,
    weights: Vec<f64>,
    pub no_transmission: Vec<bool>,
}

impl ContactMatrix {
    fn from_rows(rows: Vec<Vec<f64>>, n_ages: usize) -> Result<Self, ConfigError> {
        let given = rows.len();
        for row in &rows {
            if row.len() != given {
                return Err(ConfigError::AlphaNotSquare {
                    rows: given,
                    cols: row.len(),
                });
            }
        }

        // Zero-pad (or truncate) to n_ages, then normalize each row.
        let mut weights = vec![0.0; n_ages * n_ages];
        for (i, row) in rows.iter().take(n_ages).enumerate() {
            for (j, &w) in row.iter().take(n_ages).enumerate() {
                if !w.is_finite() || w < 0.0 {
                    return Err(ConfigError::InvalidWeights { param: "alpha" });
                }
                weights[i * n_ages + j] = w;
            }
        }
        let mut no_transmission = vec![false; n_ages];
        for i in 0..n_ages {
            let row = &mut weights[i * n_ages..(i + 1) * n_ages];
            let sum: f64 = row.iter().sum();
            if sum > 0.0 {
                for w in row {
                    *w /= sum;
                }
            } else {
                no_transmission[i] = true;
            }
        }
        Ok(Self {
            n_ages,
            weights,
            no_transmission,
        })
    }

    pub fn get(&self, target_age: usize, source_age: usize) -> f64 {
        self.weights[target_age * self.n_ages + source_age]
    }

    pub fn row(&self, target_age: usize) -> &[f64] {
        &self.weights[target_age * self.n_ages..(target_age + 1) * self.n_ages]
    }
}

/// Validated, fully resolved parameter set. Serializes as the effective
/// parameter record for the `parameters` output stream.
#[derive(Clone, Debug, Serialize)]
pub struct Config {
    pub transmission_model: TransmissionModel,
    pub transmission_scaling: TransmissionScaling,
    pub t_year: f64,
    pub demographic_burnin_time: f64,
    pub t_end: f64,
    pub colonization_event_timestep: f64,
    pub verification_timestep: f64,
    pub output_timestep: f64,
    pub output_start: f64,
    pub n_hosts: usize,
    pub n_serotypes: usize,
    pub n_ages: usize,
    pub p_init_immune: f64,
    pub init_prob_host_colonized: Vec<f64>,
    pub init_prob_resistant: f64,
    pub beta: f64,
    pub kappa: f64,
    pub xi: f64,
    pub epsilon: f64,
    pub sigma: f64,
    pub mu_max: f64,
    pub gamma: Vec<f64>,
    pub gamma_treated_sensitive: f64,
    pub gamma_treated_ratio_resistant_to_sensitive: f64,
    pub ratio_foi_resistant_to_sensitive: f64,
    pub immigration_rate: f64,
    pub immigration_resistance_model: ImmigrationResistanceModel,
    pub p_immigration_resistant: f64,
    pub p_immigration_resistant_bounds: (f64, f64),
    pub resistance_history_length: usize,
    pub treatment_multiplier: f64,
    pub mean_n_treatments_per_age: Vec<f64>,
    pub min_time_between_treatments: f64,
    pub treatment_duration_mean: f64,
    pub treatment_duration_sd: f64,
    pub lifetime_distribution: Vec<f64>,
    pub use_random_mixing: bool,
    pub alpha: Option<ContactMatrix>,
    pub output_ageclasses: Vec<usize>,
    /// Age (year) to output age class, length `n_ages`.
    pub ageclass_index: Vec<usize>,
    pub n_ageclasses: usize,
    pub enable_output_by_age: bool,
    pub random_seed: u64,
    pub use_calendar_queue: bool,
    pub queue_min_bucket_width: f64,
    pub db_filename: String,
    pub overwrite_db: bool,
    pub load_hosts_from_checkpoint: bool,
    pub checkpoint_load_path: String,
    pub checkpoint_save_prefix: String,
    pub checkpoint_start: Option<f64>,
    pub checkpoint_timestep: Option<f64>,
    pub job_info: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownPreset { param: &'static str, name: String },
    NonPositive { param: &'static str },
    Negative { param: &'static str },
    ProbabilityOutOfRange { param: &'static str },
    BadLength { param: &'static str, expected: usize, actual: usize },
    InvalidWeights { param: &'static str },
    GammaNotMonotone { index: usize },
    AlphaRequired,
    AlphaNotSquare { rows: usize, cols: usize },
    IndependentRequiresByColonization,
    RatioFoiAboveOne,
    LifetimeDistributionTooLong { n_ages: usize, actual: usize },
    BoundsOutOfOrder,
    CheckpointRequiresZeroBurnin,
    NegativeCheckpointStart,
    HistoryLengthZero,
    MinBucketWidthTooLarge,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownPreset { param, name } => {
                write!(f, "unknown preset '{name}' for {param}")
            }
            ConfigError::NonPositive { param } => write!(f, "{param} must be positive"),
            ConfigError::Negative { param } => write!(f, "{param} must not be negative"),
            ConfigError::ProbabilityOutOfRange { param } => {
                write!(f, "{param} must lie in [0, 1]")
            }
            ConfigError::BadLength {
                param,
                expected,
                actual,
            } => write!(f, "{param} has length {actual}, need at least {expected}"),
            ConfigError::InvalidWeights { param } => {
                write!(f, "{param} must be finite, non-negative, and not all zero")
            }
            ConfigError::GammaNotMonotone { index } => write!(
                f,
                "gamma must be non-increasing in serotype rank (violated at index {index})"
            ),
            ConfigError::AlphaRequired => {
                write!(f, "alpha is required when use_random_mixing is false")
            }
            ConfigError::AlphaNotSquare { rows, cols } => {
                write!(f, "alpha must be square ({rows} rows, found a row of {cols})")
            }
            ConfigError::IndependentRequiresByColonization => write!(
                f,
                "independent transmission requires transmission_scaling = by_colonization"
            ),
            ConfigError::RatioFoiAboveOne => {
                write!(f, "ratio_foi_resistant_to_sensitive must not exceed 1")
            }
            ConfigError::LifetimeDistributionTooLong { n_ages, actual } => write!(
                f,
                "lifetime_distribution has {actual} year weights but n_ages is {n_ages}"
            ),
            ConfigError::BoundsOutOfOrder => write!(
                f,
                "p_immigration_resistant_bounds must be ordered within [0, 1]"
            ),
            ConfigError::CheckpointRequiresZeroBurnin => write!(
                f,
                "load_hosts_from_checkpoint requires demographic_burnin_time = 0"
            ),
            ConfigError::NegativeCheckpointStart => {
                write!(f, "checkpoint_start must not be negative")
            }
            ConfigError::HistoryLengthZero => write!(
                f,
                "resistance_history_length must be positive for the history_by_serotype model"
            ),
            ConfigError::MinBucketWidthTooLarge => {
                write!(f, "queue_min_bucket_width must lie in (0, 1)")
            }
        }
    }
}

impl Error for ConfigError {}

fn check_probability(value: f64, param: &'static str) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ProbabilityOutOfRange { param });
    }
    Ok(())
}

fn check_positive(value: f64, param: &'static str) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::NonPositive { param });
    }
    Ok(())
}

fn check_non_negative(value: f64, param: &'static str) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Negative { param });
    }
    Ok(())
}

impl Parameters {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    fn resolve_vector(value: &VectorParam, param: &'static str) -> Result<Vec<f64>, ConfigError> {
        match value {
            VectorParam::Values(v) => Ok(v.clone()),
            VectorParam::Preset(name) => vector_preset(param, name).ok_or_else(|| {
                ConfigError::UnknownPreset {
                    param,
                    name: name.clone(),
                }
            }),
        }
    }

    /// Validate and resolve into a concrete `Config`.
    pub fn build(self) -> Result<Config, ConfigError> {
        if self.n_hosts == 0 {
            return Err(ConfigError::NonPositive { param: "n_hosts" });
        }
        if self.n_serotypes == 0 {
            return Err(ConfigError::NonPositive { param: "n_serotypes" });
        }
        if self.n_ages == 0 {
            return Err(ConfigError::NonPositive { param: "n_ages" });
        }
        check_positive(self.t_year, "t_year")?;
        check_non_negative(self.demographic_burnin_time, "demographic_burnin_time")?;
        check_non_negative(self.t_end, "t_end")?;
        check_positive(self.colonization_event_timestep, "colonization_event_timestep")?;
        check_positive(self.verification_timestep, "verification_timestep")?;
        check_positive(self.output_timestep, "output_timestep")?;
        check_non_negative(self.beta, "beta")?;
        check_positive(self.kappa, "kappa")?;
        check_positive(self.xi, "xi")?;
        check_non_negative(self.epsilon, "epsilon")?;
        check_probability(self.sigma, "sigma")?;
        check_probability(self.mu_max, "mu_max")?;
        check_probability(self.p_init_immune, "p_init_immune")?;
        check_probability(self.init_prob_resistant, "init_prob_resistant")?;
        check_probability(self.p_immigration_resistant, "p_immigration_resistant")?;
        check_non_negative(self.immigration_rate, "immigration_rate")?;
        check_positive(self.gamma_treated_sensitive, "gamma_treated_sensitive")?;
        check_positive(
            self.gamma_treated_ratio_resistant_to_sensitive,
            "gamma_treated_ratio_resistant_to_sensitive",
        )?;
        check_non_negative(self.treatment_multiplier, "treatment_multiplier")?;
        check_non_negative(self.min_time_between_treatments, "min_time_between_treatments")?;
        check_non_negative(self.treatment_duration_mean, "treatment_duration_mean")?;
        check_non_negative(self.treatment_duration_sd, "treatment_duration_sd")?;

        if !(self.ratio_foi_resistant_to_sensitive.is_finite()
            && (0.0..=1.0).contains(&self.ratio_foi_resistant_to_sensitive))
        {
            return Err(ConfigError::RatioFoiAboveOne);
        }
        let (p_lo, p_hi) = self.p_immigration_resistant_bounds;
        if !(0.0..=1.0).contains(&p_lo) || !(0.0..=1.0).contains(&p_hi) || p_lo > p_hi {
            return Err(ConfigError::BoundsOutOfOrder);
        }
        if !(self.queue_min_bucket_width > 0.0 && self.queue_min_bucket_width < 1.0) {
            return Err(ConfigError::MinBucketWidthTooLarge);
        }

        if self.transmission_model == TransmissionModel::Independent
            && self.transmission_scaling != TransmissionScaling::ByColonization
        {
            return Err(ConfigError::IndependentRequiresByColonization);
        }

        let mut gamma = Self::resolve_vector(&self.gamma, "gamma")?;
        if gamma.len() < self.n_serotypes {
            return Err(ConfigError::BadLength {
                param: "gamma",
                expected: self.n_serotypes,
                actual: gamma.len(),
            });
        }
        gamma.truncate(self.n_serotypes);
        for (i, &g) in gamma.iter().enumerate() {
            check_positive(g, "gamma")?;
            if i > 0 && gamma[i - 1] < g {
                return Err(ConfigError::GammaNotMonotone { index: i });
            }
        }

        let init_prob_host_colonized = match self.init_prob_host_colonized {
            Some(v) => {
                if v.len() != self.n_serotypes {
                    return Err(ConfigError::BadLength {
                        param: "init_prob_host_colonized",
                        expected: self.n_serotypes,
                        actual: v.len(),
                    });
                }
                for &p in &v {
                    check_probability(p, "init_prob_host_colonized")?;
                }
                v
            }
            None => vec![0.02; self.n_serotypes],
        };

        let mut mean_n_treatments_per_age =
            Self::resolve_vector(&self.mean_n_treatments_per_age, "mean_n_treatments_per_age")?;
        if mean_n_treatments_per_age.len() < self.n_ages {
            return Err(ConfigError::BadLength {
                param: "mean_n_treatments_per_age",
                expected: self.n_ages,
                actual: mean_n_treatments_per_age.len(),
            });
        }
        mean_n_treatments_per_age.truncate(self.n_ages);
        for &m in &mean_n_treatments_per_age {
            check_non_negative(m, "mean_n_treatments_per_age")?;
        }

        let lifetime_distribution =
            Self::resolve_vector(&self.lifetime_distribution, "lifetime_distribution")?;
        if lifetime_distribution.is_empty() || lifetime_distribution.len() > self.n_ages {
            return Err(ConfigError::LifetimeDistributionTooLong {
                n_ages: self.n_ages,
                actual: lifetime_distribution.len(),
            });
        }
        if !lifetime_distribution
            .iter()
            .all(|&w| w.is_finite() && w >= 0.0)
            || !lifetime_distribution.iter().any(|&w| w > 0.0)
        {
            return Err(ConfigError::InvalidWeights {
                param: "lifetime_distribution",
            });
        }

        let alpha = match &self.alpha {
            Some(value) => {
                let rows = match value {
                    MatrixParam::Values(rows) => rows.clone(),
                    MatrixParam::Preset(name) => {
                        matrix_preset("alpha", name).ok_or_else(|| ConfigError::UnknownPreset {
                            param: "alpha",
                            name: name.clone(),
                        })?
                    }
                };
                Some(ContactMatrix::from_rows(rows, self.n_ages)?)
            }
            None => None,
        };
        if !self.use_random_mixing && alpha.is_none() {
            return Err(ConfigError::AlphaRequired);
        }

        if self.immigration_resistance_model == ImmigrationResistanceModel::HistoryBySerotype
            && self.resistance_history_length == 0
        {
            return Err(ConfigError::HistoryLengthZero);
        }

        if self.load_hosts_from_checkpoint && self.demographic_burnin_time != 0.0 {
            return Err(ConfigError::CheckpointRequiresZeroBurnin);
        }
        if let Some(start) = self.checkpoint_start {
            if start < 0.0 {
                return Err(ConfigError::NegativeCheckpointStart);
            }
        }

        // Map each year of age to its output age class; sizes cover leading
        // ages, everything beyond falls into one final class.
        let mut ageclass_index = vec![0usize; self.n_ages];
        let n_ageclasses = if self.output_ageclasses.is_empty() {
            1
        } else {
            let mut age = 0;
            let mut last_class = 0;
            for (class, &size) in self.output_ageclasses.iter().enumerate() {
                last_class = class;
                for _ in 0..size {
                    if age < self.n_ages {
                        ageclass_index[age] = class;
                        age += 1;
                    }
                }
            }
            if age < self.n_ages {
                last_class += 1;
                while age < self.n_ages {
                    ageclass_index[age] = last_class;
                    age += 1;
                }
            }
            last_class + 1
        };

        let random_seed = match self.random_seed {
            Some(seed) if seed != 0 => seed,
            _ => rand::rng().random_range(1..(1u64 << 31)),
        };

        Ok(Config {
            transmission_model: self.transmission_model,
            transmission_scaling: self.transmission_scaling,
            t_year: self.t_year,
            demographic_burnin_time: self.demographic_burnin_time,
            t_end: self.t_end,
            colonization_event_timestep: self.colonization_event_timestep,
            verification_timestep: self.verification_timestep,
            output_timestep: self.output_timestep,
            output_start: self.output_start,
            n_hosts: self.n_hosts,
            n_serotypes: self.n_serotypes,
            n_ages: self.n_ages,
            p_init_immune: self.p_init_immune,
            init_prob_host_colonized,
            init_prob_resistant: self.init_prob_resistant,
            beta: self.beta,
            kappa: self.kappa,
            xi: self.xi,
            epsilon: self.epsilon,
            sigma: self.sigma,
            mu_max: self.mu_max,
            gamma,
            gamma_treated_sensitive: self.gamma_treated_sensitive,
            gamma_treated_ratio_resistant_to_sensitive: self
                .gamma_treated_ratio_resistant_to_sensitive,
            ratio_foi_resistant_to_sensitive: self.ratio_foi_resistant_to_sensitive,
            immigration_rate: self.immigration_rate,
            immigration_resistance_model: self.immigration_resistance_model,
            p_immigration_resistant: self.p_immigration_resistant,
            p_immigration_resistant_bounds: self.p_immigration_resistant_bounds,
            resistance_history_length: self.resistance_history_length,
            treatment_multiplier: self.treatment_multiplier,
            mean_n_treatments_per_age,
            min_time_between_treatments: self.min_time_between_treatments,
            treatment_duration_mean: self.treatment_duration_mean,
            treatment_duration_sd: self.treatment_duration_sd,
            lifetime_distribution,
            use_random_mixing: self.use_random_mixing,
            alpha,
            output_ageclasses: self.output_ageclasses,
            ageclass_index,
            n_ageclasses,
            enable_output_by_age: self.enable_output_by_age,
            random_seed,
            use_calendar_queue: self.use_calendar_queue,
            queue_min_bucket_width: self.queue_min_bucket_width,
            db_filename: self.db_filename,
            overwrite_db: self.overwrite_db,
            load_hosts_from_checkpoint: self.load_hosts_from_checkpoint,
            checkpoint_load_path: self.checkpoint_load_path,
            checkpoint_save_prefix: self.checkpoint_save_prefix,
            checkpoint_start: self.checkpoint_start,
            checkpoint_timestep: self.checkpoint_timestep,
            job_info: self.job_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_builds_with_defaults() {
        let params = Parameters::from_json("{}").unwrap();
        let config = params.build().unwrap();
        assert_eq!(config.n_serotypes, 25);
        assert_eq!(config.gamma.len(), 25);
        assert_eq!(config.lifetime_distribution.len(), 111);
        assert_eq!(config.mean_n_treatments_per_age.len(), 111);
        assert_eq!(config.init_prob_host_colonized, vec![0.02; 25]);
        assert!(config.random_seed > 0 && config.random_seed < (1 << 31));
    }

    #[test]
    fn preset_gamma_is_monotone_non_increasing() {
        let config = Parameters::default().build().unwrap();
        for pair in config.gamma.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn independent_model_rejects_by_host_scaling() {
        let params = Parameters {
            transmission_scaling: TransmissionScaling::ByHost,
            ..Parameters::default()
        };
        assert_eq!(
            params.build().unwrap_err(),
            ConfigError::IndependentRequiresByColonization
        );
    }

    #[test]
    fn age_assortative_mixing_requires_alpha() {
        let params = Parameters {
            use_random_mixing: false,
            ..Parameters::default()
        };
        assert_eq!(params.build().unwrap_err(), ConfigError::AlphaRequired);
    }

    #[test]
    fn non_monotone_gamma_is_rejected() {
        let params = Parameters {
            n_serotypes: 3,
            gamma: VectorParam::Values(vec![10.0, 12.0, 8.0]),
            init_prob_host_colonized: Some(vec![0.02; 3]),
            ..Parameters::default()
        };
        assert_eq!(
            params.build().unwrap_err(),
            ConfigError::GammaNotMonotone { index: 1 }
        );
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let params = Parameters {
            gamma: VectorParam::Preset("empirical_mars".to_owned()),
            ..Parameters::default()
        };
        assert!(matches!(
            params.build().unwrap_err(),
            ConfigError::UnknownPreset { param: "gamma", .. }
        ));
    }

    #[test]
    fn ageclass_sizes_cover_leading_ages_with_a_final_catch_all() {
        let params = Parameters {
            n_ages: 10,
            lifetime_distribution: VectorParam::Values(vec![1.0; 10]),
            mean_n_treatments_per_age: VectorParam::Values(vec![0.0; 10]),
            output_ageclasses: vec![2, 3],
            ..Parameters::default()
        };
        let config = params.build().unwrap();
        assert_eq!(config.n_ageclasses, 3);
        assert_eq!(config.ageclass_index, vec![0, 0, 1, 1, 1, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn empty_ageclass_list_collapses_to_one_class() {
        let params = Parameters {
            output_ageclasses: Vec::new(),
            ..Parameters::default()
        };
        let config = params.build().unwrap();
        assert_eq!(config.n_ageclasses, 1);
        assert!(config.ageclass_index.iter().all(|&c| c == 0));
    }

    #[test]
    fn alpha_rows_are_normalized_and_zero_rows_flagged() {
        let params = Parameters {
            n_ages: 3,
            lifetime_distribution: VectorParam::Values(vec![1.0; 3]),
            mean_n_treatments_per_age: VectorParam::Values(vec![0.0; 3]),
            use_random_mixing: false,
            alpha: Some(MatrixParam::Values(vec![
                vec![2.0, 2.0],
                vec![0.0, 0.0],
            ])),
            ..Parameters::default()
        };
        let config = params.build().unwrap();
        let alpha = config.alpha.unwrap();
        assert!((alpha.get(0, 0) - 0.5).abs() < 1e-12);
        assert!((alpha.get(0, 1) - 0.5).abs() < 1e-12);
        // Row 1 was all zeros, row 2 comes from zero padding.
        assert_eq!(alpha.no_transmission, vec![false, true, true]);
    }

    #[test]
    fn explicit_seed_is_kept() {
        let params = Parameters {
            random_seed: Some(1234),
            ..Parameters::default()
        };
        assert_eq!(params.build().unwrap().random_seed, 1234);
    }

    #[test]
    fn checkpoint_load_requires_zero_burnin() {
        let params = Parameters {
            load_hosts_from_checkpoint: true,
            ..Parameters::default()
        };
        assert_eq!(
            params.build().unwrap_err(),
            ConfigError::CheckpointRequiresZeroBurnin
        );
    }
}
