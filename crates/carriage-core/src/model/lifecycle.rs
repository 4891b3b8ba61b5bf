use super::{Event, Model};
use crate::checkpoint::CheckpointHost;
use crate::host::{Host, NextClearance, StrainCounts};
use crate::sink::OutputSink;
use rand::Rng;
use rand_distr::{Distribution, Exp};

impl<S: OutputSink> Model<S> {
    /// Build a host record and enqueue its first lifecycle event: the next
    /// birthday, or death when the lifetime is under a year. Hosts dying
    /// before t = 0 never get a treatment schedule; everyone else draws one
    /// (or restores the saved one) and enqueues its first course start.
    ///
    /// The caller places the host in the slot vector and the age-0 counts.
    pub(crate) fn create_host(
        &mut self,
        index: u32,
        birth_time: f64,
        lifetime: f64,
        restored: Option<CheckpointHost>,
    ) -> Host {
        let death_time = birth_time + lifetime;
        if lifetime > self.config.t_year {
            self.queue
                .add(Event::Birthday(index), birth_time + self.config.t_year);
        } else {
            self.queue.add(Event::Reset(index), death_time);
        }

        let n_serotypes = self.config.n_serotypes;
        let (colonizations, past_colonizations, treatment_times) = if death_time >= 0.0 {
            match restored {
                Some(saved) => (
                    saved.colonizations,
                    saved.past_colonizations,
                    saved.treatment_times,
                ),
                None => (
                    StrainCounts::zeros(n_serotypes),
                    StrainCounts::zeros(n_serotypes),
                    self.draw_treatment_times(birth_time, death_time),
                ),
            }
        } else {
            (
                StrainCounts::zeros(n_serotypes),
                StrainCounts::zeros(n_serotypes),
                Vec::new(),
            )
        };

        if let Some(first) = treatment_times.first() {
            self.queue.add(Event::StepTreatment(index), first.start);
        }

        Host {
            index,
            birth_time,
            death_time,
            age: 0,
            age_slot: usize::MAX,
            colonizations,
            past_colonizations,
            treatment_times,
            in_treatment: false,
            treatment_index: 0,
            next_clearance: None,
        }
    }

    /// Move the host one age up: age counts, age-bucket membership, and its
    /// share of the by-age colonization counts all follow, then the next
    /// birthday (or death) is scheduled.
    pub(crate) fn celebrate_birthday(&mut self, i: usize, t: f64) {
        let index = i as u32;
        self.age_bucket_remove(index);
        let old_age = self.hosts[i].age;
        self.adjust_age_count(old_age, -1);
        self.colonizations_by_age
            .subtract_host(old_age, &self.hosts[i].colonizations);

        let new_age = old_age + 1;
        self.hosts[i].age = new_age;
        self.adjust_age_count(new_age, 1);
        self.age_bucket_insert(index, new_age);
        self.colonizations_by_age
            .add_host(new_age, &self.hosts[i].colonizations);

        let next_birthday = t + self.config.t_year;
        if next_birthday < self.hosts[i].death_time {
            self.queue.add(Event::Birthday(index), next_birthday);
        } else {
            self.queue.add(Event::Reset(index), self.hosts[i].death_time);
        }
    }

    /// Death and rebirth in place: the slot keeps its index but gets a fresh
    /// lifetime, schedule, and empty colonization history. The departing
    /// host's pending clearance (the only event it can still have queued)
    /// is cancelled and its counts are backed out.
    pub(crate) fn reset_host(&mut self, i: usize, t: f64) {
        let index = i as u32;
        self.queue
            .remove_if_present(Event::ClearColonization(index));

        let old_age = self.hosts[i].age;
        self.adjust_age_count(old_age, -1);
        self.age_bucket_remove(index);
        self.colonizations_by_age
            .subtract_host(old_age, &self.hosts[i].colonizations);

        let lifetime = self.draw_host_lifetime();
        self.hosts[i] = self.create_host(index, t, lifetime, None);
        self.adjust_age_count(0, 1);
        self.age_bucket_insert(index, 0);
    }

    /// Toggle the treatment flag: on entering a course, schedule its end if
    /// the host lives that long; on leaving, schedule the next course start
    /// if any remain. Clearance rates change either way.
    pub(crate) fn step_treatment(&mut self, i: usize, t: f64) {
        let index = i as u32;
        let host = &mut self.hosts[i];
        if host.in_treatment {
            host.in_treatment = false;
            host.treatment_index += 1;
            if host.treatment_index < host.treatment_times.len() {
                let next_start = host.treatment_times[host.treatment_index].start;
                self.queue.add(Event::StepTreatment(index), next_start);
            }
        } else {
            host.in_treatment = true;
            let end = host.treatment_times[host.treatment_index].end;
            if end < host.death_time {
                self.queue.add(Event::StepTreatment(index), end);
            }
        }
        self.update_next_clearance(i, t);
    }

    pub(crate) fn receive_colonization(
        &mut self,
        i: usize,
        serotype_id: usize,
        resistant: bool,
        t: f64,
    ) {
        self.hosts[i].colonizations.increment(serotype_id, resistant);
        let age = self.hosts[i].age;
        self.colonizations_by_age.adjust(age, serotype_id, resistant, 1);
        self.update_next_clearance(i, t);
    }

    /// Clear the strain recorded by the host's next-clearance draw, moving
    /// one carriage into the past-colonization history.
    pub(crate) fn clear_colonization(&mut self, i: usize, t: f64) {
        let scheduled = self.hosts[i].next_clearance.unwrap_or_else(|| {
            panic!("t = {t}: clearance event fired for host {i} with no pending clearance")
        });
        assert!(
            scheduled.time == t,
            "t = {t}: clearance event for host {i} does not match its record at {}",
            scheduled.time
        );

        self.hosts[i]
            .colonizations
            .decrement(scheduled.serotype_id, scheduled.resistant);
        self.hosts[i]
            .past_colonizations
            .increment(scheduled.serotype_id, scheduled.resistant);
        let age = self.hosts[i].age;
        self.colonizations_by_age
            .adjust(age, scheduled.serotype_id, scheduled.resistant, -1);

        self.update_next_clearance(i, t);
    }

    /// Redraw the host's next clearance from the competing exponentials of
    /// its current strains: total rate is the sum of count/duration over
    /// occupied strains, the cleared strain is chosen proportionally, and
    /// the single queued clearance event moves to the drawn time. Inactive
    /// before t = 0 (demographic burn-in).
    pub(crate) fn update_next_clearance(&mut self, i: usize, t: f64) {
        if t < 0.0 {
            return;
        }

        let host = &self.hosts[i];
        let mut rates: Vec<(usize, bool, f64)> = Vec::new();
        for (serotype_id, resistant, count) in host.colonizations.iter_nonzero() {
            let duration = host.mean_clearance_duration(serotype_id, resistant, &self.config);
            let rate = count as f64 / duration;
            assert!(
                rate.is_finite() && rate > 0.0,
                "t = {t}: clearance rate for host {i} strain ({serotype_id}, {resistant}) \
                 is not positive"
            );
            rates.push((serotype_id, resistant, rate));
        }

        if rates.is_empty() {
            assert!(
                !self.queue.contains(Event::ClearColonization(i as u32)),
                "t = {t}: uncolonized host {i} still has a queued clearance"
            );
            self.hosts[i].next_clearance = None;
            return;
        }

        let rates_sum: f64 = rates.iter().map(|&(_, _, rate)| rate).sum();
        let delay = Exp::new(rates_sum)
            .expect("total clearance rate must be positive")
            .sample(&mut self.rng);
        let time = t + delay;

        let mut pick = self.rng.random::<f64>() * rates_sum;
        let mut chosen = rates[rates.len() - 1];
        for &candidate in &rates {
            if pick < candidate.2 {
                chosen = candidate;
                break;
            }
            pick -= candidate.2;
        }

        self.hosts[i].next_clearance = Some(NextClearance {
            time,
            serotype_id: chosen.0,
            resistant: chosen.1,
        });
        self.queue
            .add_or_update(Event::ClearColonization(i as u32), time);
    }
}
