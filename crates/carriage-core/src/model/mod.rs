pub mod colonization;
pub mod lifecycle;
pub mod output;
pub mod verify;
#[cfg(test)]
mod tests;

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::config::{Config, ImmigrationResistanceModel};
use crate::dist::{DiscreteDistribution, DistError};
use crate::host::{AgeStrainCounts, Host, TreatmentInterval};
use crate::queue::EventQueue;
use crate::sink::{AgeclassRow, OutputRow, OutputSink};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal, Poisson};
use std::collections::VecDeque;
use std::io;
use std::time::Instant;
use std::{error::Error, fmt};

/// Scheduled simulation events. Per-host events carry the host index, so
/// the `(tag, index)` pair is unique and at most one of each kind can be
/// queued per host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Event {
    Birthday(u32),
    /// Death and in-place rebirth of the host slot.
    Reset(u32),
    StepTreatment(u32),
    ClearColonization(u32),
    /// Fires once at t = 0: seeds initial colonizations and immunity (or,
    /// on a checkpoint resume, schedules every loaded host's clearance),
    /// then starts the colonization ticks.
    EpidemicInit,
    ColonizationTick,
    Verify,
    WriteOutput,
    WriteCheckpoint,
}

#[derive(Debug)]
pub enum ModelInitError {
    LifetimeDistribution(DistError),
    Checkpoint(CheckpointError),
    HostCountMismatch { expected: usize, actual: usize },
    Sink(io::Error),
}

impl fmt::Display for ModelInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelInitError::LifetimeDistribution(e) => {
                write!(f, "invalid lifetime distribution: {e}")
            }
            ModelInitError::Checkpoint(e) => write!(f, "{e}"),
            ModelInitError::HostCountMismatch { expected, actual } => write!(
                f,
                "checkpoint holds {actual} hosts but n_hosts is {expected}"
            ),
            ModelInitError::Sink(e) => write!(f, "writing startup rows failed: {e}"),
        }
    }
}

impl Error for ModelInitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ModelInitError::LifetimeDistribution(e) => Some(e),
            ModelInitError::Checkpoint(e) => Some(e),
            ModelInitError::Sink(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DistError> for ModelInitError {
    fn from(e: DistError) -> Self {
        ModelInitError::LifetimeDistribution(e)
    }
}

impl From<CheckpointError> for ModelInitError {
    fn from(e: CheckpointError) -> Self {
        ModelInitError::Checkpoint(e)
    }
}

impl From<io::Error> for ModelInitError {
    fn from(e: io::Error) -> Self {
        ModelInitError::Sink(e)
    }
}

/// Emit the startup rows (effective parameters, optional job metadata, the
/// age-to-ageclass map). Also what a dry run produces.
pub fn write_run_preamble<S: OutputSink>(config: &Config, sink: &mut S) -> io::Result<()> {
    let parameters =
        serde_json::to_value(config).expect("effective parameter set must serialize");
    sink.append(OutputRow::Parameters { parameters })?;
    if let Some(info) = &config.job_info {
        sink.append(OutputRow::Jobs { info: info.clone() })?;
    }
    for age in 0..config.n_ages {
        sink.append(OutputRow::Ageclasses(AgeclassRow {
            age,
            ageclass: config.ageclass_index[age],
        }))?;
    }
    sink.flush()
}

pub(crate) fn poisson_draw<R: Rng + ?Sized>(rng: &mut R, mean: f64) -> u64 {
    if mean <= 0.0 {
        return 0;
    }
    let sample: f64 = Poisson::new(mean)
        .expect("poisson mean must be finite and positive")
        .sample(rng);
    sample as u64
}

pub(crate) fn binomial_draw<R: Rng + ?Sized>(rng: &mut R, n: u64, p: f64) -> u64 {
    rand_distr::Binomial::new(n, p)
        .expect("binomial probability must lie in [0, 1]")
        .sample(rng)
}

/// The simulation kernel. Owns the hosts, the event queue, the RNG, the
/// aggregate counts, and the output sink; event handlers mutate all of them
/// between queue pops. Single-threaded and deterministic for a given seed.
pub struct Model<S: OutputSink> {
    pub(crate) config: Config,
    pub(crate) queue: EventQueue<Event>,
    pub(crate) rng: ChaCha12Rng,
    pub(crate) lifetime_dist: DiscreteDistribution,
    pub(crate) hosts: Vec<Host>,
    pub(crate) n_hosts_by_age: Vec<i64>,
    pub(crate) colonizations_by_age: AgeStrainCounts,
    /// Indices of the hosts currently at each age; each host tracks its
    /// slot so removal and uniform sampling are O(1).
    pub(crate) hosts_by_age: Vec<Vec<u32>>,
    /// Per-serotype window of recent colonization resistance flags, present
    /// only under the history_by_serotype immigration model.
    pub(crate) resistance_history: Option<Vec<VecDeque<u8>>>,
    pub(crate) sink: S,
    pub(crate) event_count: u64,
    last_report_event_count: u64,
    last_report_instant: Instant,
}

impl<S: OutputSink> Model<S> {
    pub fn new(config: Config, mut sink: S) -> Result<Self, ModelInitError> {
        write_run_preamble(&config, &mut sink)?;

        let lifetime_dist = DiscreteDistribution::new(&config.lifetime_distribution)?;
        let queue = if config.use_calendar_queue {
            let t_min = -(config.demographic_burnin_time + config.n_ages as f64 * config.t_year);
            EventQueue::calendar(t_min, config.queue_min_bucket_width)
        } else {
            EventQueue::heap()
        };
        log::debug!(
            "seed {}, {} queue",
            config.random_seed,
            if config.use_calendar_queue { "calendar" } else { "heap" }
        );

        let resistance_history = (config.immigration_resistance_model
            == ImmigrationResistanceModel::HistoryBySerotype)
            .then(|| vec![VecDeque::new(); config.n_serotypes]);

        let mut model = Self {
            rng: ChaCha12Rng::seed_from_u64(config.random_seed),
            lifetime_dist,
            queue,
            hosts: Vec::with_capacity(config.n_hosts),
            n_hosts_by_age: vec![0; config.n_ages],
            colonizations_by_age: AgeStrainCounts::zeros(config.n_ages, config.n_serotypes),
            hosts_by_age: vec![Vec::new(); config.n_ages],
            resistance_history,
            sink,
            event_count: 0,
            last_report_event_count: 0,
            last_report_instant: Instant::now(),
            config,
        };

        if model.config.load_hosts_from_checkpoint {
            model.initialize_hosts_from_checkpoint()?;
        } else {
            model.initialize_hosts();
        }

        model.queue.add(Event::EpidemicInit, 0.0);
        model
            .queue
            .add(Event::Verify, -model.config.demographic_burnin_time);
        model.queue.add(Event::WriteOutput, model.config.output_start);
        if let Some(start) = model.config.checkpoint_start {
            model.queue.add(Event::WriteCheckpoint, start);
        }
        Ok(model)
    }

    /// Spread births over `[-burnin - lifetime, -burnin]` so ages are mixed
    /// before the demographic burn-in begins.
    fn initialize_hosts(&mut self) {
        let n_hosts = self.config.n_hosts;
        let burnin = self.config.demographic_burnin_time;
        for index in 0..n_hosts as u32 {
            let lifetime = self.draw_host_lifetime();
            let birth_time = -burnin - self.rng.random::<f64>() * lifetime;
            let host = self.create_host(index, birth_time, lifetime, None);
            self.hosts.push(host);
            self.adjust_age_count(0, 1);
            self.age_bucket_insert(index, 0);
        }
        log::debug!("initialized {n_hosts} hosts");
    }

    fn initialize_hosts_from_checkpoint(&mut self) -> Result<(), ModelInitError> {
        let mut checkpoint = Checkpoint::load(&self.config.checkpoint_load_path)?;
        if checkpoint.hosts.len() != self.config.n_hosts {
            return Err(ModelInitError::HostCountMismatch {
                expected: self.config.n_hosts,
                actual: checkpoint.hosts.len(),
            });
        }
        checkpoint.rebase();
        self.rng = checkpoint.rng;

        for (index, saved) in checkpoint.hosts.into_iter().enumerate() {
            let index = index as u32;
            assert_eq!(
                saved.colonizations.n_serotypes(),
                self.config.n_serotypes,
                "checkpoint host {index} has a colonization matrix of the wrong shape"
            );
            self.colonizations_by_age.add_host(0, &saved.colonizations);
            let host = self.create_host(index, saved.birth_time, saved.lifetime, Some(saved));
            self.hosts.push(host);
            self.adjust_age_count(0, 1);
            self.age_bucket_insert(index, 0);
        }
        log::debug!("restored {} hosts from checkpoint", self.config.n_hosts);
        Ok(())
    }

    /// Pop events until the queue drains or an event lands past `t_end`.
    pub fn run(&mut self) -> io::Result<()> {
        while let Some((event, t)) = self.queue.pop() {
            self.event_count += 1;
            if t > self.config.t_end {
                break;
            }
            log::trace!("t = {t}: {event:?}");
            self.dispatch(event, t)?;
        }
        self.sink.flush()
    }

    fn dispatch(&mut self, event: Event, t: f64) -> io::Result<()> {
        match event {
            Event::Birthday(index) => {
                self.celebrate_birthday(index as usize, t);
                Ok(())
            }
            Event::Reset(index) => {
                self.reset_host(index as usize, t);
                Ok(())
            }
            Event::StepTreatment(index) => {
                self.step_treatment(index as usize, t);
                Ok(())
            }
            Event::ClearColonization(index) => {
                self.clear_colonization(index as usize, t);
                Ok(())
            }
            Event::EpidemicInit => self.initialize_epidemic(t),
            Event::ColonizationTick => self.colonization_tick(t),
            Event::Verify => {
                self.verify(t);
                Ok(())
            }
            Event::WriteOutput => self.write_output(t),
            Event::WriteCheckpoint => self.write_checkpoint(t),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    // --- aggregate-count mutators -------------------------------------

    pub(crate) fn adjust_age_count(&mut self, age: usize, delta: i64) {
        self.n_hosts_by_age[age] += delta;
        assert!(
            self.n_hosts_by_age[age] >= 0,
            "negative host count at age {age}"
        );
    }

    pub(crate) fn age_bucket_insert(&mut self, index: u32, age: usize) {
        let bucket = &mut self.hosts_by_age[age];
        self.hosts[index as usize].age_slot = bucket.len();
        bucket.push(index);
    }

    pub(crate) fn age_bucket_remove(&mut self, index: u32) {
        let host = &self.hosts[index as usize];
        let (age, slot) = (host.age, host.age_slot);
        let bucket = &mut self.hosts_by_age[age];
        assert!(
            bucket.get(slot) == Some(&index),
            "age bucket out of sync for host {index}"
        );
        bucket.swap_remove(slot);
        if slot < bucket.len() {
            let moved = bucket[slot];
            self.hosts[moved as usize].age_slot = slot;
        }
    }

    // --- demographic draws --------------------------------------------

    pub(crate) fn draw_host_lifetime(&mut self) -> f64 {
        self.lifetime_dist.next_continuous(&mut self.rng) * self.config.t_year
    }

    /// Draw a lifetime's treatment schedule: per year of life, a Poisson
    /// number of courses with uniform starts and truncated-normal durations,
    /// redrawing the year until every gap (including the gap to the previous
    /// year's last course) is at least `min_time_between_treatments`.
    pub(crate) fn draw_treatment_times(
        &mut self,
        birth_time: f64,
        death_time: f64,
    ) -> Vec<TreatmentInterval> {
        let t_year = self.config.t_year;
        let n_years = ((death_time - birth_time) / t_year).floor() as usize;
        let duration_dist = Normal::new(
            self.config.treatment_duration_mean,
            self.config.treatment_duration_sd,
        )
        .expect("treatment duration parameters must be finite");

        let mut intervals: Vec<TreatmentInterval> = Vec::new();
        for age in 0..n_years {
            let mean =
                self.config.treatment_multiplier * self.config.mean_n_treatments_per_age[age];
            let n_treatments = poisson_draw(&mut self.rng, mean) as usize;
            if n_treatments == 0 {
                continue;
            }
            let year_start = birth_time + age as f64 * t_year;
            let year_end = (birth_time + (age + 1) as f64 * t_year).min(death_time);
            loop {
                let mut starts: Vec<f64> = (0..n_treatments)
                    .map(|_| self.rng.random_range(year_start..year_end))
                    .collect();
                starts.sort_by(f64::total_cmp);
                let candidate: Vec<TreatmentInterval> = starts
                    .into_iter()
                    .map(|start| TreatmentInterval {
                        start,
                        end: start + duration_dist.sample(&mut self.rng).max(0.0),
                    })
                    .collect();

                let min_gap = self.config.min_time_between_treatments;
                let clears_previous = match intervals.last() {
                    Some(previous) => candidate[0].start >= previous.end + min_gap,
                    None => true,
                };
                let internally_spaced = candidate
                    .windows(2)
                    .all(|pair| pair[1].start >= pair[0].end + min_gap);
                if clears_previous && internally_spaced {
                    intervals.extend(candidate);
                    break;
                }
            }
        }
        intervals
    }

    // --- resistance fractions and immigration -------------------------

    /// Fraction of current colonizations that are resistant, if any exist.
    pub(crate) fn fraction_resistant(&self) -> Option<f64> {
        let total = self.colonizations_by_age.total();
        if total == 0 {
            return None;
        }
        Some(self.colonizations_by_age.class_total(true) as f64 / total as f64)
    }

    pub(crate) fn fraction_resistant_for_serotype(&self, serotype_id: usize) -> Option<f64> {
        let total = self.colonizations_by_age.serotype_total(serotype_id);
        if total == 0 {
            return None;
        }
        Some(self.colonizations_by_age.strain_total(serotype_id, true) as f64 / total as f64)
    }

    pub(crate) fn fraction_resistant_history_for_serotype(
        &self,
        serotype_id: usize,
    ) -> Option<f64> {
        let history = &self.resistance_history.as_ref()?[serotype_id];
        if history.is_empty() {
            return None;
        }
        let n_resistant: u64 = history.iter().map(|&r| r as u64).sum();
        Some(n_resistant as f64 / history.len() as f64)
    }

    /// Per-host, per-unit-time immigration rate for one resistance class.
    pub(crate) fn immigration_rate(&self, resistant: bool, p_immigration_resistant: f64) -> f64 {
        let rate = self.config.immigration_rate;
        if resistant {
            rate * p_immigration_resistant
        } else {
            rate * (1.0 - p_immigration_resistant)
        }
    }

    /// Per-serotype probability that an immigrant colonization is resistant,
    /// per the configured model. Under the history model, emits history rows
    /// once per output cadence.
    pub(crate) fn p_immigration_resistant_by_serotype(
        &mut self,
        t: f64,
    ) -> io::Result<Vec<f64>> {
        let (p_lo, p_hi) = self.config.p_immigration_resistant_bounds;
        let fallback = self.config.p_immigration_resistant;
        let clamp = |p: f64| p.clamp(p_lo, p_hi);
        let n_serotypes = self.config.n_serotypes;

        let p_ir = match self.config.immigration_resistance_model {
            ImmigrationResistanceModel::Constant => vec![fallback; n_serotypes],
            ImmigrationResistanceModel::FractionResistantGlobal => {
                let p = self.fraction_resistant().map(clamp).unwrap_or(fallback);
                vec![p; n_serotypes]
            }
            ImmigrationResistanceModel::FractionResistantBySerotype => (0..n_serotypes)
                .map(|s| {
                    self.fraction_resistant_for_serotype(s)
                        .map(clamp)
                        .unwrap_or(fallback)
                })
                .collect(),
            ImmigrationResistanceModel::HistoryBySerotype => {
                let p_ir: Vec<f64> = (0..n_serotypes)
                    .map(|s| {
                        self.fraction_resistant_history_for_serotype(s)
                            .map(clamp)
                            .unwrap_or(fallback)
                    })
                    .collect();
                if t % self.config.output_timestep == 0.0 {
                    let history = self
                        .resistance_history
                        .as_ref()
                        .expect("history model without history buffers");
                    for (serotype_id, window) in history.iter().enumerate() {
                        let n_resistant: i64 = window.iter().map(|&r| r as i64).sum();
                        self.sink.append(OutputRow::ImmigrationResistance(
                            crate::sink::ImmigrationResistanceRow {
                                t,
                                serotype_id,
                                history_length: window.len(),
                                n_resistant,
                                p_immigration_resistant: p_ir[serotype_id],
                            },
                        ))?;
                    }
                }
                p_ir
            }
        };
        Ok(p_ir)
    }

    pub(crate) fn record_resistance_history(&mut self, serotype_id: usize, resistant: u8) {
        let window_len = self.config.resistance_history_length;
        let history = self
            .resistance_history
            .as_mut()
            .expect("recording history without history buffers");
        let window = &mut history[serotype_id];
        if window.len() == window_len {
            window.pop_front();
        }
        window.push_back(resistant);
    }

    // --- progress reporting -------------------------------------------

    pub(crate) fn log_progress(&mut self, t: f64) {
        let now = Instant::now();
        let new_events = self.event_count - self.last_report_event_count;
        let elapsed = now.duration_since(self.last_report_instant).as_secs_f64();
        log::info!(
            "t = {t}: {} events ({:.0}/s), {} colonizations",
            self.event_count,
            new_events as f64 / elapsed.max(1e-9),
            self.colonizations_by_age.total()
        );
        if let Some(width) = self.queue.bucket_width() {
            log::debug!("event queue bucket width: {width}");
        }
        self.last_report_event_count = self.event_count;
        self.last_report_instant = now;
    }
}
