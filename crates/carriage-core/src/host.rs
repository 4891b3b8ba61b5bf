use crate::config::Config;
use serde::{Deserialize, Serialize};

/// Per-host colonization counts, shape serotypes x 2 (sensitive, resistant).
/// Multiple carriages of the same strain are counted with multiplicity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrainCounts {
    n_serotypes: usize,
    counts: Vec<u32>,
}

impl StrainCounts {
    pub fn zeros(n_serotypes: usize) -> Self {
        Self {
            n_serotypes,
            counts: vec![0; n_serotypes * 2],
        }
    }

    pub fn n_serotypes(&self) -> usize {
        self.n_serotypes
    }

    fn slot(&self, serotype_id: usize, resistant: bool) -> usize {
        serotype_id * 2 + resistant as usize
    }

    pub fn get(&self, serotype_id: usize, resistant: bool) -> u32 {
        self.counts[self.slot(serotype_id, resistant)]
    }

    pub fn increment(&mut self, serotype_id: usize, resistant: bool) {
        let slot = self.slot(serotype_id, resistant);
        self.counts[slot] += 1;
    }

    pub fn decrement(&mut self, serotype_id: usize, resistant: bool) {
        let slot = self.slot(serotype_id, resistant);
        assert!(
            self.counts[slot] > 0,
            "decrementing empty strain count ({serotype_id}, {resistant})"
        );
        self.counts[slot] -= 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Count across both resistance classes of one serotype.
    pub fn serotype_total(&self, serotype_id: usize) -> u32 {
        self.counts[serotype_id * 2] + self.counts[serotype_id * 2 + 1]
    }

    pub fn class_total(&self, resistant: bool) -> u64 {
        self.counts
            .iter()
            .skip(resistant as usize)
            .step_by(2)
            .map(|&c| c as u64)
            .sum()
    }

    /// Occupied strains as `(serotype_id, resistant, count)`, serotype-major.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (usize, bool, u32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(slot, &c)| (slot / 2, slot % 2 == 1, c))
    }

    /// Lowest serotype rank with any current carriage, if colonized at all.
    pub fn lowest_colonized_serotype(&self) -> Option<usize> {
        (0..self.n_serotypes).find(|&s| self.serotype_total(s) > 0)
    }
}

/// Population-wide colonization counts, shape ages x serotypes x 2,
/// maintained incrementally in lock-step with per-host state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgeStrainCounts {
    n_ages: usize,
    n_serotypes: usize,
    counts: Vec<i64>,
}

impl AgeStrainCounts {
    pub fn zeros(n_ages: usize, n_serotypes: usize) -> Self {
        Self {
            n_ages,
            n_serotypes,
            counts: vec![0; n_ages * n_serotypes * 2],
        }
    }

    fn slot(&self, age: usize, serotype_id: usize, resistant: bool) -> usize {
        (age * self.n_serotypes + serotype_id) * 2 + resistant as usize
    }

    pub fn get(&self, age: usize, serotype_id: usize, resistant: bool) -> i64 {
        self.counts[self.slot(age, serotype_id, resistant)]
    }

    pub fn adjust(&mut self, age: usize, serotype_id: usize, resistant: bool, delta: i64) {
        let slot = self.slot(age, serotype_id, resistant);
        self.counts[slot] += delta;
        assert!(
            self.counts[slot] >= 0,
            "negative colonization count at (age {age}, serotype {serotype_id}, resistant {resistant})"
        );
    }

    /// Apply a whole host matrix at one age (birthday moves, respawn).
    pub fn add_host(&mut self, age: usize, host_counts: &StrainCounts) {
        for (s, r, n) in host_counts.iter_nonzero() {
            self.adjust(age, s, r, n as i64);
        }
    }

    pub fn subtract_host(&mut self, age: usize, host_counts: &StrainCounts) {
        for (s, r, n) in host_counts.iter_nonzero() {
            self.adjust(age, s, r, -(n as i64));
        }
    }

    /// Population total for one strain.
    pub fn strain_total(&self, serotype_id: usize, resistant: bool) -> i64 {
        (0..self.n_ages)
            .map(|a| self.get(a, serotype_id, resistant))
            .sum()
    }

    pub fn serotype_total(&self, serotype_id: usize) -> i64 {
        self.strain_total(serotype_id, false) + self.strain_total(serotype_id, true)
    }

    pub fn age_total(&self, age: usize) -> i64 {
        let base = age * self.n_serotypes * 2;
        self.counts[base..base + self.n_serotypes * 2].iter().sum()
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    pub fn class_total(&self, resistant: bool) -> i64 {
        self.counts
            .iter()
            .skip(resistant as usize)
            .step_by(2)
            .sum()
    }
}

/// The strain scheduled to clear next for a colonized host, mirrored by a
/// queued clearance event at the same time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NextClearance {
    pub time: f64,
    pub serotype_id: usize,
    pub resistant: bool,
}

/// One antibiotic course: `[start, end)` within the host's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreatmentInterval {
    pub start: f64,
    pub end: f64,
}

/// One simulated individual. Lifecycle state is mutated by the kernel's
/// event handlers; this type carries the data plus the pure per-host
/// formulas that need no kernel access.
#[derive(Clone, Debug)]
pub struct Host {
    pub index: u32,
    pub birth_time: f64,
    pub death_time: f64,
    pub age: usize,
    /// Position inside `hosts_by_age[age]`, maintained by the kernel.
    pub(crate) age_slot: usize,
    pub colonizations: StrainCounts,
    pub past_colonizations: StrainCounts,
    /// Non-overlapping, ordered; empty for hosts that die before t = 0.
    pub treatment_times: Vec<TreatmentInterval>,
    pub in_treatment: bool,
    /// Index of the active course while treating, of the next course
    /// otherwise. May equal `treatment_times.len()` once all are done.
    pub treatment_index: usize,
    pub next_clearance: Option<NextClearance>,
}

impl Host {
    pub fn lifetime(&self) -> f64 {
        self.death_time - self.birth_time
    }

    /// Probability that a colonization attempt with the given serotype
    /// succeeds, combining generalized immunity (graded by the fittest
    /// currently carried serotype) and specific immunity from past carriage
    /// of the same serotype.
    pub fn prob_colonization(&self, serotype_id: usize, config: &Config) -> f64 {
        let omega = if self.colonizations.total() == 0 {
            0.0
        } else if config.n_serotypes == 1 {
            config.mu_max
        } else {
            let rank = self
                .colonizations
                .lowest_colonized_serotype()
                .expect("colonized host has no occupied serotype");
            config.mu_max * (1.0 - rank as f64 / (config.n_serotypes as f64 - 1.0))
        };

        let mut p = 1.0 - omega;
        if self.past_colonizations.serotype_total(serotype_id) > 0 {
            p *= 1.0 - config.sigma;
        }
        p
    }

    /// Mean residence time of a single carriage of the strain. Treated hosts
    /// use the treated durations (ratio applies to resistant strains only);
    /// untreated hosts decay from the serotype baseline toward `kappa` with
    /// accumulated past carriage.
    pub fn mean_clearance_duration(&self, serotype_id: usize, resistant: bool, config: &Config) -> f64 {
        if self.in_treatment {
            debug_assert!(
                config.treatment_multiplier > 0.0,
                "host in treatment with treatment disabled"
            );
            let mut duration = config.gamma_treated_sensitive;
            if resistant {
                duration *= config.gamma_treated_ratio_resistant_to_sensitive;
            }
            duration
        } else {
            let past = self.past_colonizations.total() as f64;
            let mut duration = config.kappa
                + (config.gamma[serotype_id] - config.kappa) * (-config.epsilon * past).exp();
            if resistant {
                duration *= config.xi;
            }
            duration
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parameters;

    fn test_config(n_serotypes: usize) -> Config {
        Parameters {
            n_hosts: 10,
            n_serotypes,
            n_ages: 20,
            gamma: crate::config::VectorParam::Values(
                (0..n_serotypes).map(|s| 40.0 - s as f64).collect(),
            ),
            lifetime_distribution: crate::config::VectorParam::Values(vec![1.0; 20]),
            init_prob_host_colonized: Some(vec![0.02; n_serotypes]),
            mean_n_treatments_per_age: crate::config::VectorParam::Values(vec![0.5; 20]),
            treatment_multiplier: 1.0,
            sigma: 0.3,
            mu_max: 0.25,
            kappa: 25.0,
            epsilon: 0.25,
            xi: 0.9,
            gamma_treated_sensitive: 4.0,
            gamma_treated_ratio_resistant_to_sensitive: 5.0,
            ..Parameters::default()
        }
        .build()
        .unwrap()
    }

    fn blank_host(n_serotypes: usize) -> Host {
        Host {
            index: 0,
            birth_time: 0.0,
            death_time: 365.0 * 10.0,
            age: 0,
            age_slot: 0,
            colonizations: StrainCounts::zeros(n_serotypes),
            past_colonizations: StrainCounts::zeros(n_serotypes),
            treatment_times: Vec::new(),
            in_treatment: false,
            treatment_index: 0,
            next_clearance: None,
        }
    }

    #[test]
    fn uncolonized_host_has_no_generalized_immunity() {
        let config = test_config(5);
        let host = blank_host(5);
        assert_eq!(host.prob_colonization(2, &config), 1.0);
    }

    #[test]
    fn generalized_immunity_is_graded_by_fittest_carried_serotype() {
        let config = test_config(5);
        let mut host = blank_host(5);
        host.colonizations.increment(4, false);
        // Rank 4 of 5 serotypes: omega = mu_max * (1 - 4/4) = 0.
        assert_eq!(host.prob_colonization(0, &config), 1.0);

        host.colonizations.increment(0, true);
        // Rank 0: full generalized immunity.
        assert!((host.prob_colonization(1, &config) - (1.0 - 0.25)).abs() < 1e-12);
    }

    #[test]
    fn single_serotype_immunity_is_flat() {
        let config = test_config(1);
        let mut host = blank_host(1);
        host.colonizations.increment(0, false);
        assert!((host.prob_colonization(0, &config) - (1.0 - 0.25)).abs() < 1e-12);
    }

    #[test]
    fn specific_immunity_multiplies_in() {
        let config = test_config(5);
        let mut host = blank_host(5);
        host.past_colonizations.increment(3, true);
        assert!((host.prob_colonization(3, &config) - 0.7).abs() < 1e-12);
        // Other serotypes unaffected.
        assert_eq!(host.prob_colonization(2, &config), 1.0);
    }

    #[test]
    fn untreated_duration_decays_toward_kappa_with_past_carriage() {
        let config = test_config(5);
        let mut host = blank_host(5);
        assert!((host.mean_clearance_duration(0, false, &config) - 40.0).abs() < 1e-12);

        for _ in 0..50 {
            host.past_colonizations.increment(1, false);
        }
        let d = host.mean_clearance_duration(0, false, &config);
        assert!((d - config.kappa).abs() < 1e-3, "duration {d} should be near kappa");

        let resistant = host.mean_clearance_duration(0, true, &config);
        assert!((resistant - d * config.xi).abs() < 1e-9);
    }

    #[test]
    fn treated_duration_ignores_serotype_and_past_carriage() {
        let config = test_config(5);
        let mut host = blank_host(5);
        host.in_treatment = true;
        host.past_colonizations.increment(0, false);
        assert_eq!(host.mean_clearance_duration(0, false, &config), 4.0);
        assert_eq!(host.mean_clearance_duration(3, false, &config), 4.0);
        assert_eq!(host.mean_clearance_duration(0, true, &config), 20.0);
    }

    #[test]
    fn strain_counts_track_occupied_strains() {
        let mut c = StrainCounts::zeros(3);
        c.increment(1, true);
        c.increment(1, true);
        c.increment(2, false);
        assert_eq!(c.total(), 3);
        assert_eq!(c.get(1, true), 2);
        assert_eq!(c.class_total(true), 2);
        assert_eq!(c.lowest_colonized_serotype(), Some(1));
        let occupied: Vec<_> = c.iter_nonzero().collect();
        assert_eq!(occupied, vec![(1, true, 2), (2, false, 1)]);
        c.decrement(1, true);
        assert_eq!(c.get(1, true), 1);
    }

    #[test]
    fn age_strain_counts_mirror_host_matrices() {
        let mut by_age = AgeStrainCounts::zeros(4, 3);
        let mut host = StrainCounts::zeros(3);
        host.increment(0, false);
        host.increment(2, true);
        by_age.add_host(1, &host);
        assert_eq!(by_age.age_total(1), 2);
        assert_eq!(by_age.strain_total(2, true), 1);
        by_age.subtract_host(1, &host);
        assert_eq!(by_age.total(), 0);
    }
}
