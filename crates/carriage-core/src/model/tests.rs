use super::Model;
use crate::config::{MatrixParam, Parameters, VectorParam};
use crate::sink::{MemorySink, OutputRow};

fn small_params(n_serotypes: usize, n_ages: usize) -> Parameters {
    Parameters {
        n_hosts: 300,
        n_serotypes,
        n_ages,
        demographic_burnin_time: 20.0 * 365.0,
        t_end: 10.0 * 365.0,
        gamma: VectorParam::Values((0..n_serotypes).map(|s| 30.0 - s as f64).collect()),
        lifetime_distribution: VectorParam::Values(vec![1.0; n_ages]),
        mean_n_treatments_per_age: VectorParam::Values(vec![1.0; n_ages]),
        init_prob_host_colonized: Some(vec![0.5; n_serotypes]),
        treatment_multiplier: 0.0,
        immigration_rate: 0.0,
        beta: 0.0,
        sigma: 0.0,
        mu_max: 0.0,
        enable_output_by_age: false,
        random_seed: Some(20_240_117),
        ..Parameters::default()
    }
}

fn run_model(params: Parameters) -> Model<MemorySink> {
    let config = params.build().unwrap();
    let mut model = Model::new(config, MemorySink::new()).unwrap();
    model.run().unwrap();
    model
}

#[test]
fn startup_rows_lead_with_parameters_and_the_ageclass_map() {
    let model = run_model(Parameters {
        t_end: 365.0,
        ..small_params(1, 30)
    });
    let rows = model.sink().rows();
    assert!(matches!(rows[0], OutputRow::Parameters { .. }));
    let n_ageclass_rows = rows
        .iter()
        .filter(|row| matches!(row, OutputRow::Ageclasses(_)))
        .count();
    assert_eq!(n_ageclass_rows, 30);
}

#[test]
fn colonizations_die_out_without_transmission_or_immigration() {
    let model = run_model(small_params(1, 60));
    let summaries = model.sink().summary_rows();
    assert_eq!(summaries.len(), 11);
    assert!(
        summaries[0].n_colonizations > 0,
        "initial seeding produced no colonizations"
    );
    for pair in summaries.windows(2) {
        assert!(
            pair[1].n_colonizations <= pair[0].n_colonizations,
            "colonizations rose with no source of new ones"
        );
    }
    assert_eq!(summaries.last().unwrap().n_colonizations, 0);
    assert_eq!(model.colonizations_by_age.total(), 0);
}

#[test]
fn immigration_alone_holds_an_endemic_floor() {
    // With beta = 0 and a flat clearance time (kappa = gamma), the
    // stationary colonization count is n_hosts * rate * duration = 15.
    let params = Parameters {
        n_hosts: 500,
        t_end: 120.0 * 365.0,
        immigration_rate: 0.001,
        p_immigration_resistant: 0.0,
        init_prob_host_colonized: Some(vec![0.0]),
        gamma: VectorParam::Values(vec![30.0]),
        kappa: 30.0,
        ..small_params(1, 60)
    };
    let model = run_model(params);
    let summaries = model.sink().summary_rows();
    let tail = &summaries[summaries.len() - 50..];
    let mean = tail.iter().map(|row| row.n_colonizations as f64).sum::<f64>() / tail.len() as f64;
    assert!(
        (9.0..=21.0).contains(&mean),
        "stationary colonization count {mean} far from the expected 15"
    );
}

#[test]
fn identical_seeds_reproduce_identical_trajectories() {
    let params = Parameters {
        n_hosts: 200,
        demographic_burnin_time: 10.0 * 365.0,
        t_end: 5.0 * 365.0,
        beta: 0.05,
        immigration_rate: 1e-4,
        sigma: 0.3,
        mu_max: 0.25,
        ..small_params(3, 50)
    };
    let a = run_model(params.clone());
    let b = run_model(params);
    assert_eq!(a.sink().rows(), b.sink().rows());
}

#[test]
fn heap_queue_reproduces_the_calendar_queue_exactly() {
    // Both structures implement the same (time, insertion) ordering, so a
    // shared seed must yield event-for-event identical trajectories.
    let base = Parameters {
        t_end: 4.0 * 365.0,
        beta: 0.03,
        immigration_rate: 1e-4,
        ..small_params(2, 50)
    };
    let calendar = run_model(base.clone());
    let heap = run_model(Parameters {
        use_calendar_queue: false,
        ..base
    });
    // The parameters rows differ in the queue flag; every simulated row
    // after them must agree.
    assert_eq!(calendar.sink().rows()[1..], heap.sink().rows()[1..]);
}

#[test]
fn immigrants_land_uniformly_across_ages_under_identity_mixing() {
    let n_ages = 40;
    let identity: Vec<Vec<f64>> = (0..n_ages)
        .map(|i| {
            let mut row = vec![0.0; n_ages];
            row[i] = 1.0;
            row
        })
        .collect();
    let params = Parameters {
        n_hosts: 400,
        t_end: 30.0 * 365.0,
        use_random_mixing: false,
        alpha: Some(MatrixParam::Values(identity)),
        immigration_rate: 0.004,
        init_prob_host_colonized: Some(vec![0.0]),
        gamma: VectorParam::Values(vec![30.0]),
        kappa: 30.0,
        ..small_params(1, 40)
    };
    let model = run_model(params);

    let mut colonized_ages = Vec::new();
    let mut all_ages = Vec::new();
    for host in &model.hosts {
        all_ages.push(host.age as f64);
        if host.colonizations.total() > 0 {
            colonized_ages.push(host.age as f64);
        }
    }
    assert!(
        colonized_ages.len() > 10,
        "too few colonized hosts ({}) to compare age distributions",
        colonized_ages.len()
    );
    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    let difference = (mean(&colonized_ages) - mean(&all_ages)).abs();
    assert!(
        difference < 8.0,
        "colonized hosts' mean age differs from the population by {difference} years"
    );
}

#[test]
fn treatment_courses_fire_and_are_visible_in_output() {
    let params = Parameters {
        n_hosts: 150,
        demographic_burnin_time: 10.0 * 365.0,
        t_end: 6.0 * 365.0,
        beta: 0.02,
        immigration_rate: 1e-4,
        treatment_multiplier: 3.0,
        ..small_params(2, 50)
    };
    let model = run_model(params);
    let treated_host_rows = model
        .sink()
        .rows()
        .iter()
        .filter_map(|row| match row {
            OutputRow::CountsByAgeclassTreatment(r) if r.in_treatment && r.n_hosts > 0 => Some(r),
            _ => None,
        })
        .count();
    assert!(
        treated_host_rows > 0,
        "no output row ever saw a host in treatment"
    );
}

#[test]
fn treatment_raises_the_resistant_fraction() {
    // Treated hosts clear sensitive strains five times faster than
    // resistant ones, so switching treatment on must push the long-run
    // resistant share of colonizations up.
    let base = Parameters {
        n_hosts: 300,
        t_end: 40.0 * 365.0,
        beta: 0.04,
        immigration_rate: 1e-3,
        p_immigration_resistant: 0.5,
        xi: 0.95,
        ..small_params(1, 60)
    };
    let resistant_fraction = |model: &Model<MemorySink>| {
        let cutoff = 20.0 * 365.0;
        let mut by_class = [0i64; 2];
        for row in model.sink().rows() {
            if let OutputRow::CountsByAgeclassTreatmentStrain(r) = row {
                if r.t >= cutoff {
                    by_class[r.resistant as usize] += r.n_colonizations;
                }
            }
        }
        by_class[1] as f64 / (by_class[0] + by_class[1]).max(1) as f64
    };

    let untreated = run_model(base.clone());
    let treated = run_model(Parameters {
        treatment_multiplier: 4.0,
        ..base
    });
    let f_untreated = resistant_fraction(&untreated);
    let f_treated = resistant_fraction(&treated);
    assert!(
        f_treated > f_untreated,
        "resistant fraction fell from {f_untreated} to {f_treated} under treatment"
    );
}

#[test]
fn cotransmission_model_runs_with_both_scalings() {
    for scaling in [
        crate::config::TransmissionScaling::ByColonization,
        crate::config::TransmissionScaling::ByHost,
    ] {
        let params = Parameters {
            n_hosts: 200,
            demographic_burnin_time: 10.0 * 365.0,
            t_end: 4.0 * 365.0,
            transmission_model: crate::config::TransmissionModel::Cotransmission,
            transmission_scaling: scaling,
            beta: 0.05,
            immigration_rate: 1e-4,
            sigma: 0.3,
            mu_max: 0.25,
            ..small_params(3, 50)
        };
        let model = run_model(params);
        assert_eq!(model.sink().summary_rows().len(), 5);
    }
}

#[test]
fn history_model_emits_immigration_resistance_rows() {
    let params = Parameters {
        n_hosts: 200,
        demographic_burnin_time: 5.0 * 365.0,
        t_end: 3.0 * 365.0,
        beta: 0.05,
        immigration_rate: 1e-3,
        immigration_resistance_model: crate::config::ImmigrationResistanceModel::HistoryBySerotype,
        resistance_history_length: 50,
        init_prob_resistant: 0.5,
        ..small_params(2, 50)
    };
    let model = run_model(params);
    let history_rows: Vec<_> = model
        .sink()
        .rows()
        .iter()
        .filter_map(|row| match row {
            OutputRow::ImmigrationResistance(r) => Some(r),
            _ => None,
        })
        .collect();
    assert!(!history_rows.is_empty());
    for row in history_rows {
        assert!(row.history_length <= 50);
        assert!(row.n_resistant as usize <= row.history_length);
        assert!((0.0..=1.0).contains(&row.p_immigration_resistant));
    }
}

#[test]
fn checkpoint_resume_matches_the_saved_state() {
    let prefix = std::env::temp_dir()
        .join("carriage_model_checkpoint_test")
        .to_string_lossy()
        .into_owned();
    let checkpoint_path = format!("{prefix}.json");
    let _ = std::fs::remove_file(&checkpoint_path);

    let base = Parameters {
        n_hosts: 200,
        demographic_burnin_time: 5.0 * 365.0,
        t_end: 2.0 * 365.0,
        beta: 0.04,
        immigration_rate: 1e-4,
        sigma: 0.3,
        mu_max: 0.25,
        ..small_params(2, 50)
    };

    let saver = run_model(Parameters {
        checkpoint_start: Some(2.0 * 365.0),
        checkpoint_save_prefix: prefix.clone(),
        ..base.clone()
    });
    let saved_colonizations = saver.sink().summary_rows().last().unwrap().n_colonizations;

    // The resumed run re-verifies every invariant as it goes; its t = 0
    // state must carry exactly the saved colonizations.
    let resumed = run_model(Parameters {
        demographic_burnin_time: 0.0,
        load_hosts_from_checkpoint: true,
        checkpoint_load_path: checkpoint_path.clone(),
        random_seed: Some(999),
        ..base
    });
    let first = resumed.sink().summary_rows()[0].clone();
    assert_eq!(first.t, 0.0);
    assert_eq!(first.n_colonizations, saved_colonizations);

    let _ = std::fs::remove_file(&checkpoint_path);
}

#[test]
fn drawn_treatment_schedules_respect_the_minimum_gap() {
    let params = Parameters {
        treatment_multiplier: 5.0,
        ..small_params(2, 50)
    };
    let config = params.build().unwrap();
    let min_gap = config.min_time_between_treatments;
    let mut model = Model::new(config, MemorySink::new()).unwrap();

    let mut saw_courses = false;
    for _ in 0..20 {
        let schedule = model.draw_treatment_times(0.0, 20.0 * 365.0);
        saw_courses |= !schedule.is_empty();
        for interval in &schedule {
            assert!(interval.end >= interval.start);
        }
        for pair in schedule.windows(2) {
            assert!(
                pair[1].start >= pair[0].end + min_gap,
                "courses {:?} and {:?} violate the minimum gap",
                pair[0],
                pair[1]
            );
        }
    }
    assert!(saw_courses, "a 5x multiplier never produced a course");
}

#[test]
fn single_host_population_is_colonized_only_by_immigration() {
    let params = Parameters {
        n_hosts: 1,
        demographic_burnin_time: 0.0,
        t_end: 50.0 * 365.0,
        beta: 0.5,
        immigration_rate: 0.001,
        init_prob_host_colonized: Some(vec![0.0]),
        gamma: VectorParam::Values(vec![30.0]),
        kappa: 30.0,
        ..small_params(1, 60)
    };
    let model = run_model(params);
    // The forced initial colonization plus immigration keep the single host
    // cycling; the run must satisfy every invariant along the way and the
    // contact terms must contribute nothing.
    assert!(!model.sink().summary_rows().is_empty());
}
