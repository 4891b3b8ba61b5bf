use super::{binomial_draw, poisson_draw, Event, Model};
use crate::config::{TransmissionModel, TransmissionScaling};
use crate::sink::OutputSink;
use rand::seq::SliceRandom;
use rand::Rng;
use std::io;

/// Relative slack allowed before an adjusted rate is declared to exceed the
/// rejection-sampling bound.
const RATE_BOUND_TOL: f64 = 1e-9;

impl<S: OutputSink> Model<S> {
    /// Fires once at t = 0. On a fresh run, seeds per-strain immunity and
    /// initial colonizations; on a checkpoint resume, draws every loaded
    /// host's first clearance instead. Either way, starts the periodic
    /// colonization ticks.
    pub(crate) fn initialize_epidemic(&mut self, t: f64) -> io::Result<()> {
        if self.config.load_hosts_from_checkpoint {
            for i in 0..self.hosts.len() {
                self.update_next_clearance(i, t);
            }
        } else {
            let n_hosts = self.config.n_hosts;
            let n_serotypes = self.config.n_serotypes;
            let p_immune = self.config.p_init_immune;
            for i in 0..n_hosts {
                for serotype_id in 0..n_serotypes {
                    for resistant in [false, true] {
                        if self.rng.random::<f64>() < p_immune {
                            self.hosts[i]
                                .past_colonizations
                                .increment(serotype_id, resistant);
                        }
                    }
                }
            }

            for serotype_id in 0..n_serotypes {
                let p_colonized = self.config.init_prob_host_colonized[serotype_id];
                for resistant in [false, true] {
                    let p = if resistant {
                        p_colonized * self.config.init_prob_resistant
                    } else {
                        p_colonized * (1.0 - self.config.init_prob_resistant)
                    };
                    let n_colonizations = binomial_draw(&mut self.rng, n_hosts as u64, p).max(1);
                    for _ in 0..n_colonizations {
                        let target = self.rng.random_range(0..n_hosts);
                        self.receive_colonization(target, serotype_id, resistant, t);
                    }
                }
            }
        }

        self.queue.add(Event::ColonizationTick, 0.0);
        Ok(())
    }

    /// One tick of the periodic colonization dispatch, then reschedule.
    pub(crate) fn colonization_tick(&mut self, t: f64) -> io::Result<()> {
        match self.config.transmission_model {
            TransmissionModel::Independent => self.do_colonizations_independent(t)?,
            TransmissionModel::Cotransmission => self.do_colonizations_cotransmission(t)?,
        }
        let next_time = t + self.config.colonization_event_timestep;
        if next_time < self.config.t_end {
            self.queue.add(Event::ColonizationTick, next_time);
        }
        Ok(())
    }

    // --- independent transmission -------------------------------------

    fn do_colonizations_independent(&mut self, t: f64) -> io::Result<()> {
        let p_ir_by_serotype = self.p_immigration_resistant_by_serotype(t)?;

        for serotype_id in 0..self.config.n_serotypes {
            let mut n_new = [0u64; 2];
            for resistant in [false, true] {
                let p_ir = p_ir_by_serotype[serotype_id];
                let received = if self.config.use_random_mixing {
                    self.colonize_strain_random_mixing(serotype_id, resistant, p_ir, t)
                } else {
                    self.colonize_strain_age_assortative(serotype_id, resistant, p_ir, t)
                };
                n_new[resistant as usize] = received;
            }

            // The history window records this tick's new colonizations for
            // the serotype in a random interleaving of the two classes.
            if self.resistance_history.is_some() {
                let mut flags: Vec<u8> = Vec::with_capacity((n_new[0] + n_new[1]) as usize);
                flags.extend(std::iter::repeat(0u8).take(n_new[0] as usize));
                flags.extend(std::iter::repeat(1u8).take(n_new[1] as usize));
                flags.shuffle(&mut self.rng);
                for flag in flags {
                    self.record_resistance_history(serotype_id, flag);
                }
            }
        }
        Ok(())
    }

    /// Random mixing: one aggregate per-host rate, thinned per target by
    /// removing the target's own contribution and by its own susceptibility.
    fn colonize_strain_random_mixing(
        &mut self,
        serotype_id: usize,
        resistant: bool,
        p_immigration_resistant: f64,
        t: f64,
    ) -> u64 {
        let n_hosts = self.config.n_hosts;
        let ratio = self.config.ratio_foi_resistant_to_sensitive;
        let denominator = (n_hosts as f64 - 1.0).max(1.0);

        let n_colonizations = self.colonizations_by_age.strain_total(serotype_id, resistant);
        let mut rate = self.config.beta * n_colonizations as f64 / denominator;
        if resistant {
            rate *= ratio;
        }
        rate += self.immigration_rate(resistant, p_immigration_resistant);

        let n_attempts = poisson_draw(
            &mut self.rng,
            rate * self.config.colonization_event_timestep * n_hosts as f64,
        );

        let mut received = 0;
        for _ in 0..n_attempts {
            let target = self.rng.random_range(0..n_hosts);
            let mut own = self.config.beta
                * self.hosts[target].colonizations.get(serotype_id, resistant) as f64
                / denominator;
            if resistant {
                own *= ratio;
            }
            let rate_adjusted = rate - own;
            let p_colonization = rate_adjusted / rate
                * self.hosts[target].prob_colonization(serotype_id, &self.config);
            if self.rng.random::<f64>() < p_colonization {
                self.receive_colonization(target, serotype_id, resistant, t);
                received += 1;
            }
        }
        received
    }

    /// Per-age colonization rates for one strain under age-assortative
    /// mixing, plus a true upper bound for the rejection loop. The bound
    /// divides by (N[a] - 1) so that it also dominates per-target adjusted
    /// rates, which re-weight the same-age term over the other hosts.
    fn colonization_rates_by_age(
        &self,
        serotype_id: usize,
        resistant: bool,
        p_immigration_resistant: f64,
    ) -> (Vec<f64>, f64) {
        let n_ages = self.config.n_ages;
        let alpha = self
            .config
            .alpha
            .as_ref()
            .expect("age-assortative mixing requires a contact matrix");
        let scale = if resistant {
            self.config.beta * self.config.ratio_foi_resistant_to_sensitive
        } else {
            self.config.beta
        };
        let immigration = self.immigration_rate(resistant, p_immigration_resistant);

        let mut frequency = vec![0.0; n_ages];
        let mut frequency_bound = vec![0.0; n_ages];
        for age in 0..n_ages {
            let strain_count = self.colonizations_by_age.get(age, serotype_id, resistant) as f64;
            frequency[age] = strain_count / (self.n_hosts_by_age[age].max(1)) as f64;
            frequency_bound[age] = strain_count / ((self.n_hosts_by_age[age] - 1).max(1)) as f64;
        }

        let mut rates = vec![0.0; n_ages];
        let mut bound = 0.0f64;
        for age in 0..n_ages {
            let row = alpha.row(age);
            let mut rate = 0.0;
            let mut rate_bound = 0.0;
            for (source_age, &weight) in row.iter().enumerate() {
                rate += frequency[source_age] * weight;
                rate_bound += frequency_bound[source_age] * weight;
            }
            rates[age] = scale * rate + immigration;
            bound = bound.max(scale * rate_bound + immigration);
        }
        (rates, bound)
    }

    /// Age-assortative mixing: rejection sampling against the per-age upper
    /// bound. The per-target rate replaces the same-age mean-field term with
    /// the exact contribution of the other hosts of that age; with a single
    /// host in the age class the whole same-age term drops out.
    fn colonize_strain_age_assortative(
        &mut self,
        serotype_id: usize,
        resistant: bool,
        p_immigration_resistant: f64,
        t: f64,
    ) -> u64 {
        let n_hosts = self.config.n_hosts;
        let (rates, max_rate) =
            self.colonization_rates_by_age(serotype_id, resistant, p_immigration_resistant);
        let scale = if resistant {
            self.config.beta * self.config.ratio_foi_resistant_to_sensitive
        } else {
            self.config.beta
        };

        let n_attempts = poisson_draw(
            &mut self.rng,
            self.config.colonization_event_timestep * max_rate * n_hosts as f64,
        );

        let mut received = 0;
        for _ in 0..n_attempts {
            let target = self.rng.random_range(0..n_hosts);
            let age = self.hosts[target].age;

            let mut rate_adjusted = rates[age];
            let strain_count = self.colonizations_by_age.get(age, serotype_id, resistant);
            if strain_count > 0 {
                let alpha_same_age = self
                    .config
                    .alpha
                    .as_ref()
                    .expect("age-assortative mixing requires a contact matrix")
                    .get(age, age);
                let n_age = self.n_hosts_by_age[age];
                rate_adjusted -= scale * alpha_same_age * strain_count as f64 / n_age as f64;
                if n_age > 1 {
                    let others = strain_count
                        - self.hosts[target].colonizations.get(serotype_id, resistant) as i64;
                    rate_adjusted +=
                        scale * alpha_same_age * others as f64 / (n_age - 1) as f64;
                }
            }
            assert!(
                rate_adjusted <= max_rate * (1.0 + RATE_BOUND_TOL),
                "t = {t}: adjusted colonization rate {rate_adjusted} exceeds the rejection \
                 bound {max_rate} for host {target} (age {age})"
            );

            if self.rng.random::<f64>() < rate_adjusted / max_rate {
                let p = self.hosts[target].prob_colonization(serotype_id, &self.config);
                if self.rng.random::<f64>() < p {
                    self.receive_colonization(target, serotype_id, resistant, t);
                    received += 1;
                }
            }
        }
        received
    }

    // --- cotransmission -----------------------------------------------

    fn do_colonizations_cotransmission(&mut self, t: f64) -> io::Result<()> {
        let p_ir_by_serotype = self.p_immigration_resistant_by_serotype(t)?;
        if self.config.use_random_mixing {
            self.cotransmission_contacts_random_mixing(t);
        } else {
            self.cotransmission_contacts_age_assortative(t);
        }
        self.do_immigration_cotransmission(&p_ir_by_serotype, t);
        Ok(())
    }

    fn cotransmission_contacts_random_mixing(&mut self, t: f64) {
        let n_hosts = self.config.n_hosts;
        if n_hosts < 2 {
            return;
        }
        let n_contacts = poisson_draw(
            &mut self.rng,
            self.config.beta * self.config.colonization_event_timestep * n_hosts as f64,
        );
        for _ in 0..n_contacts {
            let target = self.rng.random_range(0..n_hosts);
            let mut source = self.rng.random_range(0..n_hosts - 1);
            if source >= target {
                source += 1;
            }
            self.single_cotransmission(source, target, t);
        }
    }

    /// Source ages follow the target's contact-matrix row (empty age classes
    /// rejected), then a uniform host of that age, excluding the target.
    fn cotransmission_contacts_age_assortative(&mut self, t: f64) {
        let n_hosts = self.config.n_hosts;
        let n_ages = self.config.n_ages;
        let n_contacts = poisson_draw(
            &mut self.rng,
            self.config.beta * self.config.colonization_event_timestep * n_hosts as f64,
        );

        for _ in 0..n_contacts {
            let target = self.rng.random_range(0..n_hosts);
            let target_age = self.hosts[target].age;
            let no_transmission = self
                .config
                .alpha
                .as_ref()
                .expect("age-assortative mixing requires a contact matrix")
                .no_transmission[target_age];
            if no_transmission {
                continue;
            }

            let source = loop {
                let source_age = {
                    let row = self
                        .config
                        .alpha
                        .as_ref()
                        .expect("age-assortative mixing requires a contact matrix")
                        .row(target_age);
                    weighted_index_draw(&mut self.rng, n_ages, row)
                };
                if self.n_hosts_by_age[source_age] == 0 {
                    continue;
                }
                let bucket = &self.hosts_by_age[source_age];
                let candidate = bucket[self.rng.random_range(0..bucket.len())] as usize;
                if candidate == target {
                    continue;
                }
                break candidate;
            };
            self.single_cotransmission(source, target, t);
        }
    }

    /// Attempt every colonization carried by the source against the target.
    /// Per-strain probabilities are fixed before any transmission lands, so
    /// the outcome of one copy does not shade the next within a contact.
    fn single_cotransmission(&mut self, source: usize, target: usize, t: f64) {
        let n_source_colonizations = self.hosts[source].colonizations.total();
        if n_source_colonizations == 0 {
            return;
        }
        let ratio = self.config.ratio_foi_resistant_to_sensitive;
        let by_host = self.config.transmission_scaling == TransmissionScaling::ByHost;

        let strains: Vec<(usize, bool, u32)> =
            self.hosts[source].colonizations.iter_nonzero().collect();
        let mut probabilities = Vec::with_capacity(strains.len());
        for &(serotype_id, resistant, _) in &strains {
            let mut p = self.hosts[target].prob_colonization(serotype_id, &self.config);
            if resistant {
                p *= ratio;
            }
            if by_host {
                p /= n_source_colonizations as f64;
            }
            probabilities.push(p);
        }

        for (k, &(serotype_id, resistant, count)) in strains.iter().enumerate() {
            for _ in 0..count {
                if self.rng.random::<f64>() < probabilities[k] {
                    self.receive_colonization(target, serotype_id, resistant, t);
                }
            }
        }
    }

    fn do_immigration_cotransmission(&mut self, p_ir_by_serotype: &[f64], t: f64) {
        let n_hosts = self.config.n_hosts;
        for serotype_id in 0..self.config.n_serotypes {
            for resistant in [false, true] {
                let rate = self.immigration_rate(resistant, p_ir_by_serotype[serotype_id]);
                let n_immigrations = poisson_draw(
                    &mut self.rng,
                    rate * self.config.colonization_event_timestep * n_hosts as f64,
                );
                for _ in 0..n_immigrations {
                    let target = self.rng.random_range(0..n_hosts);
                    let p = self.hosts[target].prob_colonization(serotype_id, &self.config);
                    if self.rng.random::<f64>() < p {
                        self.receive_colonization(target, serotype_id, resistant, t);
                    }
                }
            }
        }
    }
}

/// Draw an index in `0..n` with probability proportional to `weights`,
/// by rejection against the largest weight.
fn weighted_index_draw<R: Rng + ?Sized>(rng: &mut R, n: usize, weights: &[f64]) -> usize {
    let w_max = weights.iter().cloned().fold(0.0, f64::max);
    debug_assert!(w_max > 0.0, "weighted draw over an all-zero row");
    loop {
        let index = rng.random_range(0..n);
        if rng.random::<f64>() < weights[index] / w_max {
            return index;
        }
    }
}
