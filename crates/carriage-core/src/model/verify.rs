use super::{Event, Model};
use crate::host::AgeStrainCounts;
use crate::sink::OutputSink;

/// Tolerance when locating an age boundary, so a host verified exactly on
/// its birthday passes with either age.
const EPS: f64 = 1e-12;

impl<S: OutputSink> Model<S> {
    /// Periodic self-check: every host's bookkeeping, the serotype fitness
    /// ordering, the incremental aggregates against a fresh rebuild, and the
    /// event queue's internal structure.
    pub(crate) fn verify(&mut self, t: f64) {
        for i in 0..self.hosts.len() {
            self.verify_host(i, t);
        }
        self.verify_serotype_ranks();
        self.verify_counts(t);
        self.queue.verify();

        let next_time = t + self.config.verification_timestep;
        if next_time <= self.config.t_end {
            self.queue.add(Event::Verify, next_time);
        }
    }

    fn verify_host(&self, i: usize, t: f64) {
        let host = &self.hosts[i];
        let t_year = self.config.t_year;
        assert!(
            t <= host.death_time,
            "t = {t}: host {i} outlived its death time {}",
            host.death_time
        );

        let age_lower = ((t - host.birth_time - EPS) / t_year).floor() as i64;
        let age = ((t - host.birth_time) / t_year).floor() as i64;
        let age_upper = ((t - host.birth_time + EPS) / t_year).floor() as i64;
        let recorded = host.age as i64;
        assert!(
            recorded == age || recorded == age_lower || recorded == age_upper,
            "t = {t}: host {i} is recorded at age {recorded} but was born at {}",
            host.birth_time
        );

        assert_eq!(
            host.colonizations.n_serotypes(),
            self.config.n_serotypes,
            "host {i} has a colonization matrix of the wrong shape"
        );

        if !host.treatment_times.is_empty() {
            let min_gap = self.config.min_time_between_treatments;
            for pair in host.treatment_times.windows(2) {
                assert!(
                    pair[1].start >= pair[0].end + min_gap,
                    "t = {t}: host {i} has treatment courses closer than {min_gap}"
                );
            }

            if host.in_treatment {
                let current = host.treatment_times[host.treatment_index];
                assert!(
                    current.start <= t && current.end >= t,
                    "t = {t}: host {i} is flagged in treatment outside its course"
                );
                if current.end < host.death_time {
                    assert_eq!(
                        self.queue.get_time(Event::StepTreatment(i as u32)),
                        Some(current.end),
                        "t = {t}: host {i} treatment-end event out of sync"
                    );
                }
            } else if host.treatment_index < host.treatment_times.len() {
                let next = host.treatment_times[host.treatment_index];
                if host.treatment_index > 0 {
                    assert!(
                        host.treatment_times[host.treatment_index - 1].end <= t,
                        "t = {t}: host {i} treatment index points at a finished course"
                    );
                }
                assert!(
                    next.start >= t,
                    "t = {t}: host {i} missed a treatment start at {}",
                    next.start
                );
                assert_eq!(
                    self.queue.get_time(Event::StepTreatment(i as u32)),
                    Some(next.start),
                    "t = {t}: host {i} treatment-start event out of sync"
                );
            }
        }

        // A colonized host carries exactly one queued clearance matching its
        // record; an uncolonized host carries none. Before t = 0 nothing is
        // colonized, so this holds vacuously during burn-in.
        if host.colonizations.total() > 0 {
            let scheduled = host
                .next_clearance
                .unwrap_or_else(|| panic!("t = {t}: colonized host {i} has no clearance record"));
            assert_eq!(
                self.queue.get_time(Event::ClearColonization(i as u32)),
                Some(scheduled.time),
                "t = {t}: host {i} clearance event does not match its record"
            );
            assert!(
                host.colonizations.get(scheduled.serotype_id, scheduled.resistant) > 0,
                "t = {t}: host {i} clearance targets strain ({}, {}) it does not carry",
                scheduled.serotype_id,
                scheduled.resistant
            );
        } else {
            assert!(
                !self.queue.contains(Event::ClearColonization(i as u32)),
                "t = {t}: uncolonized host {i} has a queued clearance"
            );
            assert!(
                host.next_clearance.is_none(),
                "t = {t}: uncolonized host {i} has a stale clearance record"
            );
        }
    }

    fn verify_serotype_ranks(&self) {
        for (i, pair) in self.config.gamma.windows(2).enumerate() {
            assert!(
                pair[0] >= pair[1],
                "gamma is not non-increasing at serotype {i}"
            );
        }
    }

    /// Rebuild every aggregate from host state into scratch buffers and
    /// compare with the incrementally maintained ones.
    fn verify_counts(&self, t: f64) {
        let n_hosts: i64 = self.n_hosts_by_age.iter().sum();
        assert_eq!(
            n_hosts, self.config.n_hosts as i64,
            "t = {t}: population size drifted"
        );

        let mut n_hosts_by_age = vec![0i64; self.config.n_ages];
        let mut colonizations_by_age =
            AgeStrainCounts::zeros(self.config.n_ages, self.config.n_serotypes);
        for host in &self.hosts {
            n_hosts_by_age[host.age] += 1;
            colonizations_by_age.add_host(host.age, &host.colonizations);
        }
        assert_eq!(
            n_hosts_by_age, self.n_hosts_by_age,
            "t = {t}: hosts-by-age counts disagree with the host walk"
        );
        assert_eq!(
            colonizations_by_age, self.colonizations_by_age,
            "t = {t}: colonization counts disagree with the host walk"
        );

        // Age buckets: each host sits in exactly the bucket for its age, at
        // the slot it thinks it does, and bucket sizes match the counts.
        let mut bucket_total = 0;
        for (age, bucket) in self.hosts_by_age.iter().enumerate() {
            assert_eq!(
                bucket.len() as i64,
                self.n_hosts_by_age[age],
                "t = {t}: age bucket {age} size disagrees with its count"
            );
            bucket_total += bucket.len();
            for (slot, &index) in bucket.iter().enumerate() {
                let host = &self.hosts[index as usize];
                assert_eq!(host.age, age, "t = {t}: host {index} in the wrong age bucket");
                assert_eq!(
                    host.age_slot, slot,
                    "t = {t}: host {index} has a stale age-bucket slot"
                );
            }
        }
        assert_eq!(
            bucket_total, self.config.n_hosts,
            "t = {t}: age buckets do not partition the population"
        );
    }
}
