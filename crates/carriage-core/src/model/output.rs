use super::{Event, Model};
use crate::checkpoint::{Checkpoint, CheckpointHost};
use crate::sink::{
    AgeDistributionRow, CountsByAgeTreatmentNColonizationsRow, CountsByAgeTreatmentRow,
    CountsByAgeTreatmentStrainRow, CountsByAgeclassTreatmentNColonizationsRow,
    CountsByAgeclassTreatmentRow, CountsByAgeclassTreatmentStrainRow, OutputRow, OutputSink,
    SummaryRow,
};
use std::io;

#[derive(Clone, Copy, Default)]
struct TreatmentCell {
    n_hosts: i64,
    n_colonized: i64,
    n_colonizations: i64,
    n_colonized_by_both: i64,
}

impl<S: OutputSink> Model<S> {
    pub(crate) fn write_output(&mut self, t: f64) -> io::Result<()> {
        self.log_progress(t);

        self.write_counts_by_ageclass_treatment(t)?;
        self.write_counts_by_ageclass_treatment_strain(t)?;
        self.write_counts_by_ageclass_treatment_n_colonizations(t)?;

        if self.config.enable_output_by_age {
            self.write_counts_by_age_treatment(t)?;
            self.write_counts_by_age_treatment_strain(t)?;
            self.write_counts_by_age_treatment_n_colonizations(t)?;
        }

        self.write_age_distribution(t)?;
        self.write_summary(t)?;
        self.sink.flush()?;

        let next_time = t + self.config.output_timestep;
        if next_time <= self.config.t_end {
            self.queue.add(Event::WriteOutput, next_time);
        }
        Ok(())
    }

    /// Walk the hosts once, splitting by a grouping of age and by treatment
    /// state. Shared by the per-age and per-ageclass tables.
    fn collect_treatment_cells(
        &self,
        n_groups: usize,
        group_of: impl Fn(usize) -> usize,
    ) -> Vec<[TreatmentCell; 2]> {
        let mut cells = vec![[TreatmentCell::default(); 2]; n_groups];
        for host in &self.hosts {
            let cell = &mut cells[group_of(host.age)][host.in_treatment as usize];
            cell.n_hosts += 1;
            let n_colonizations = host.colonizations.total() as i64;
            if n_colonizations > 0 {
                cell.n_colonized += 1;
            }
            cell.n_colonizations += n_colonizations;
            if host.colonizations.class_total(false) > 0
                && host.colonizations.class_total(true) > 0
            {
                cell.n_colonized_by_both += 1;
            }
        }
        cells
    }

    fn collect_strain_cells(
        &self,
        n_groups: usize,
        group_of: impl Fn(usize) -> usize,
    ) -> (Vec<i64>, Vec<i64>) {
        let n_serotypes = self.config.n_serotypes;
        let mut n_colonized = vec![0i64; n_groups * 2 * n_serotypes * 2];
        let mut n_colonizations = vec![0i64; n_groups * 2 * n_serotypes * 2];
        for host in &self.hosts {
            let base = (group_of(host.age) * 2 + host.in_treatment as usize) * n_serotypes * 2;
            for (serotype_id, resistant, count) in host.colonizations.iter_nonzero() {
                let slot = base + serotype_id * 2 + resistant as usize;
                n_colonized[slot] += 1;
                n_colonizations[slot] += count as i64;
            }
        }
        (n_colonized, n_colonizations)
    }

    fn collect_colonization_histogram(
        &self,
        n_groups: usize,
        group_of: impl Fn(usize) -> usize,
    ) -> (Vec<i64>, usize) {
        let max_n_colonizations = self
            .hosts
            .iter()
            .map(|host| host.colonizations.total() as usize)
            .max()
            .unwrap_or(0);
        let width = max_n_colonizations + 1;
        let mut histogram = vec![0i64; n_groups * 2 * width];
        for host in &self.hosts {
            let n = host.colonizations.total() as usize;
            let slot = (group_of(host.age) * 2 + host.in_treatment as usize) * width + n;
            histogram[slot] += 1;
        }
        (histogram, max_n_colonizations)
    }

    fn write_counts_by_age_treatment(&mut self, t: f64) -> io::Result<()> {
        let n_ages = self.config.n_ages;
        let cells = self.collect_treatment_cells(n_ages, |age| age);
        for (age, pair) in cells.iter().enumerate() {
            // Host-walk totals must agree with the incremental counts.
            assert_eq!(
                pair[0].n_colonizations + pair[1].n_colonizations,
                self.colonizations_by_age.age_total(age),
                "t = {t}: colonization counts for age {age} disagree with the host walk"
            );
            for in_treatment in [false, true] {
                let cell = pair[in_treatment as usize];
                self.sink
                    .append(OutputRow::CountsByAgeTreatment(CountsByAgeTreatmentRow {
                        t,
                        age,
                        in_treatment,
                        n_hosts: cell.n_hosts,
                        n_colonized: cell.n_colonized,
                        n_colonizations: cell.n_colonizations,
                        n_colonized_by_sensitive_and_resistant: cell.n_colonized_by_both,
                    }))?;
            }
        }
        Ok(())
    }

    fn write_counts_by_ageclass_treatment(&mut self, t: f64) -> io::Result<()> {
        let n_ageclasses = self.config.n_ageclasses;
        let cells = {
            let index = &self.config.ageclass_index;
            self.collect_treatment_cells(n_ageclasses, |age| index[age])
        };
        for (ageclass, pair) in cells.iter().enumerate() {
            for in_treatment in [false, true] {
                let cell = pair[in_treatment as usize];
                self.sink.append(OutputRow::CountsByAgeclassTreatment(
                    CountsByAgeclassTreatmentRow {
                        t,
                        ageclass,
                        in_treatment,
                        n_hosts: cell.n_hosts,
                        n_colonized: cell.n_colonized,
                        n_colonizations: cell.n_colonizations,
                        n_colonized_by_sensitive_and_resistant: cell.n_colonized_by_both,
                    },
                ))?;
            }
        }
        Ok(())
    }

    fn write_counts_by_age_treatment_strain(&mut self, t: f64) -> io::Result<()> {
        let n_ages = self.config.n_ages;
        let n_serotypes = self.config.n_serotypes;
        let (n_colonized, n_colonizations) = self.collect_strain_cells(n_ages, |age| age);
        for age in 0..n_ages {
            for in_treatment in [false, true] {
                let base = (age * 2 + in_treatment as usize) * n_serotypes * 2;
                for serotype_id in 0..n_serotypes {
                    for resistant in [false, true] {
                        let slot = base + serotype_id * 2 + resistant as usize;
                        self.sink.append(OutputRow::CountsByAgeTreatmentStrain(
                            CountsByAgeTreatmentStrainRow {
                                t,
                                age,
                                in_treatment,
                                serotype_id,
                                resistant,
                                n_colonized: n_colonized[slot],
                                n_colonizations: n_colonizations[slot],
                            },
                        ))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_counts_by_ageclass_treatment_strain(&mut self, t: f64) -> io::Result<()> {
        let n_ageclasses = self.config.n_ageclasses;
        let n_serotypes = self.config.n_serotypes;
        let (n_colonized, n_colonizations) = {
            let index = &self.config.ageclass_index;
            self.collect_strain_cells(n_ageclasses, |age| index[age])
        };
        for ageclass in 0..n_ageclasses {
            for in_treatment in [false, true] {
                let base = (ageclass * 2 + in_treatment as usize) * n_serotypes * 2;
                for serotype_id in 0..n_serotypes {
                    for resistant in [false, true] {
                        let slot = base + serotype_id * 2 + resistant as usize;
                        self.sink.append(OutputRow::CountsByAgeclassTreatmentStrain(
                            CountsByAgeclassTreatmentStrainRow {
                                t,
                                ageclass,
                                in_treatment,
                                serotype_id,
                                resistant,
                                n_colonized: n_colonized[slot],
                                n_colonizations: n_colonizations[slot],
                            },
                        ))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_counts_by_age_treatment_n_colonizations(&mut self, t: f64) -> io::Result<()> {
        let n_ages = self.config.n_ages;
        let (histogram, max_n) = self.collect_colonization_histogram(n_ages, |age| age);
        let width = max_n + 1;
        for age in 0..n_ages {
            for in_treatment in [false, true] {
                for n_colonizations in 0..width {
                    let slot = (age * 2 + in_treatment as usize) * width + n_colonizations;
                    self.sink
                        .append(OutputRow::CountsByAgeTreatmentNColonizations(
                            CountsByAgeTreatmentNColonizationsRow {
                                t,
                                age,
                                in_treatment,
                                n_colonizations,
                                n_hosts: histogram[slot],
                            },
                        ))?;
                }
            }
        }
        Ok(())
    }

    fn write_counts_by_ageclass_treatment_n_colonizations(&mut self, t: f64) -> io::Result<()> {
        let n_ageclasses = self.config.n_ageclasses;
        let (histogram, max_n) = {
            let index = &self.config.ageclass_index;
            self.collect_colonization_histogram(n_ageclasses, |age| index[age])
        };
        let width = max_n + 1;
        for ageclass in 0..n_ageclasses {
            for in_treatment in [false, true] {
                for n_colonizations in 0..width {
                    let slot = (ageclass * 2 + in_treatment as usize) * width + n_colonizations;
                    self.sink
                        .append(OutputRow::CountsByAgeclassTreatmentNColonizations(
                            CountsByAgeclassTreatmentNColonizationsRow {
                                t,
                                ageclass,
                                in_treatment,
                                n_colonizations,
                                n_hosts: histogram[slot],
                            },
                        ))?;
                }
            }
        }
        Ok(())
    }

    fn write_age_distribution(&mut self, t: f64) -> io::Result<()> {
        for age in 0..self.config.n_ages {
            self.sink.append(OutputRow::AgeDistribution(AgeDistributionRow {
                t,
                age,
                n_hosts: self.n_hosts_by_age[age],
            }))?;
        }
        Ok(())
    }

    fn write_summary(&mut self, t: f64) -> io::Result<()> {
        let mut n_colonized = 0;
        let mut n_colonizations = 0;
        for host in &self.hosts {
            let n = host.colonizations.total() as i64;
            n_colonizations += n;
            if n > 0 {
                n_colonized += 1;
            }
        }
        self.sink.append(OutputRow::Summary(SummaryRow {
            t,
            n_colonized,
            n_colonizations,
        }))
    }

    /// Snapshot the full resumable state, atomically replacing the previous
    /// checkpoint file, and reschedule if periodic checkpointing is on.
    pub(crate) fn write_checkpoint(&mut self, t: f64) -> io::Result<()> {
        let checkpoint = Checkpoint {
            t,
            rng: self.rng.clone(),
            hosts: self
                .hosts
                .iter()
                .map(|host| CheckpointHost {
                    birth_time: host.birth_time,
                    lifetime: host.lifetime(),
                    colonizations: host.colonizations.clone(),
                    past_colonizations: host.past_colonizations.clone(),
                    treatment_times: host.treatment_times.clone(),
                })
                .collect(),
        };
        checkpoint.save(&self.config.checkpoint_save_prefix)?;
        log::info!("t = {t}: wrote checkpoint");

        if let Some(step) = self.config.checkpoint_timestep {
            if step > 0.0 {
                let next_time = t + step;
                if next_time <= self.config.t_end {
                    self.queue.add(Event::WriteCheckpoint, next_time);
                }
            }
        }
        Ok(())
    }
}
