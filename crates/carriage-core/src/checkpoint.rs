use crate::host::{StrainCounts, TreatmentInterval};
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::{error::Error, fmt};

/// Saved per-host state. Times are absolute at save; `rebase()` shifts them
/// so a resumed run starts at t = 0.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointHost {
    pub birth_time: f64,
    pub lifetime: f64,
    pub colonizations: StrainCounts,
    pub past_colonizations: StrainCounts,
    pub treatment_times: Vec<TreatmentInterval>,
}

/// Full resumable state: simulation time, RNG, and the host set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub t: f64,
    pub rng: ChaCha12Rng,
    pub hosts: Vec<CheckpointHost>,
}

#[derive(Debug)]
pub enum CheckpointError {
    Missing(PathBuf),
    Io(io::Error),
    Format(serde_json::Error),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Missing(path) => {
                write!(f, "checkpoint file {} does not exist", path.display())
            }
            CheckpointError::Io(e) => write!(f, "checkpoint i/o failed: {e}"),
            CheckpointError::Format(e) => write!(f, "malformed checkpoint: {e}"),
        }
    }
}

impl Error for CheckpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointError::Io(e) => Some(e),
            CheckpointError::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        CheckpointError::Io(e)
    }
}

impl Checkpoint {
    /// Write to `<prefix>_tmp.json`, then rename over `<prefix>.json` so a
    /// crash mid-write never corrupts the previous checkpoint.
    pub fn save(&self, prefix: &str) -> io::Result<()> {
        let tmp_path = format!("{prefix}_tmp.json");
        let final_path = format!("{prefix}.json");
        {
            use std::io::Write;
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &final_path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CheckpointError::Missing(path.to_owned()));
        }
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(CheckpointError::Format)
    }

    /// Subtract the saved time from every stored time so the resumed run
    /// begins at t = 0.
    pub fn rebase(&mut self) {
        let t_offset = self.t;
        for host in &mut self.hosts {
            host.birth_time -= t_offset;
            for interval in &mut host.treatment_times {
                interval.start -= t_offset;
                interval.end -= t_offset;
            }
        }
        self.t = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sample_checkpoint() -> Checkpoint {
        let mut colonizations = StrainCounts::zeros(3);
        colonizations.increment(1, true);
        Checkpoint {
            t: 730.0,
            rng: ChaCha12Rng::seed_from_u64(99),
            hosts: vec![CheckpointHost {
                birth_time: 100.0,
                lifetime: 4000.0,
                colonizations,
                past_colonizations: StrainCounts::zeros(3),
                treatment_times: vec![TreatmentInterval {
                    start: 800.0,
                    end: 810.0,
                }],
            }],
        }
    }

    #[test]
    fn rebase_shifts_all_times_to_a_zero_origin() {
        let mut ck = sample_checkpoint();
        ck.rebase();
        assert_eq!(ck.t, 0.0);
        assert_eq!(ck.hosts[0].birth_time, -630.0);
        assert_eq!(ck.hosts[0].treatment_times[0].start, 70.0);
        assert_eq!(ck.hosts[0].treatment_times[0].end, 80.0);
    }

    #[test]
    fn save_then_load_round_trips_including_rng_state() {
        let prefix = std::env::temp_dir()
            .join("carriage_checkpoint_test")
            .to_string_lossy()
            .into_owned();
        let ck = sample_checkpoint();
        ck.save(&prefix).unwrap();

        let loaded = Checkpoint::load(format!("{prefix}.json")).unwrap();
        assert_eq!(loaded.t, ck.t);
        assert_eq!(loaded.hosts.len(), 1);
        assert_eq!(loaded.hosts[0].colonizations, ck.hosts[0].colonizations);

        // Identical RNG state must produce identical draws.
        let mut a = ck.rng.clone();
        let mut b = loaded.rng.clone();
        use rand::Rng;
        for _ in 0..16 {
            assert_eq!(a.random::<u64>(), b.random::<u64>());
        }
        let _ = fs::remove_file(format!("{prefix}.json"));
    }

    #[test]
    fn loading_a_missing_path_reports_it() {
        let err = Checkpoint::load("/nonexistent/carriage_checkpoint.json").unwrap_err();
        assert!(matches!(err, CheckpointError::Missing(_)));
    }
}
