use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::{error::Error, fmt};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgeclassRow {
    pub age: usize,
    pub ageclass: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountsByAgeTreatmentRow {
    pub t: f64,
    pub age: usize,
    pub in_treatment: bool,
    pub n_hosts: i64,
    pub n_colonized: i64,
    pub n_colonizations: i64,
    pub n_colonized_by_sensitive_and_resistant: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountsByAgeTreatmentStrainRow {
    pub t: f64,
    pub age: usize,
    pub in_treatment: bool,
    pub serotype_id: usize,
    pub resistant: bool,
    pub n_colonized: i64,
    pub n_colonizations: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountsByAgeTreatmentNColonizationsRow {
    pub t: f64,
    pub age: usize,
    pub in_treatment: bool,
    pub n_colonizations: usize,
    pub n_hosts: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountsByAgeclassTreatmentRow {
    pub t: f64,
    pub ageclass: usize,
    pub in_treatment: bool,
    pub n_hosts: i64,
    pub n_colonized: i64,
    pub n_colonizations: i64,
    pub n_colonized_by_sensitive_and_resistant: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountsByAgeclassTreatmentStrainRow {
    pub t: f64,
    pub ageclass: usize,
    pub in_treatment: bool,
    pub serotype_id: usize,
    pub resistant: bool,
    pub n_colonized: i64,
    pub n_colonizations: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountsByAgeclassTreatmentNColonizationsRow {
    pub t: f64,
    pub ageclass: usize,
    pub in_treatment: bool,
    pub n_colonizations: usize,
    pub n_hosts: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub t: f64,
    pub n_colonized: i64,
    pub n_colonizations: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgeDistributionRow {
    pub t: f64,
    pub age: usize,
    pub n_hosts: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImmigrationResistanceRow {
    pub t: f64,
    pub serotype_id: usize,
    pub history_length: usize,
    pub n_resistant: i64,
    pub p_immigration_resistant: f64,
}

/// One row of the append-only tabular store, tagged by table name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum OutputRow {
    Parameters {
        parameters: serde_json::Value,
    },
    Jobs {
        #[serde(flatten)]
        info: serde_json::Map<String, serde_json::Value>,
    },
    Ageclasses(AgeclassRow),
    CountsByAgeTreatment(CountsByAgeTreatmentRow),
    CountsByAgeTreatmentStrain(CountsByAgeTreatmentStrainRow),
    CountsByAgeTreatmentNColonizations(CountsByAgeTreatmentNColonizationsRow),
    CountsByAgeclassTreatment(CountsByAgeclassTreatmentRow),
    CountsByAgeclassTreatmentStrain(CountsByAgeclassTreatmentStrainRow),
    CountsByAgeclassTreatmentNColonizations(CountsByAgeclassTreatmentNColonizationsRow),
    Summary(SummaryRow),
    AgeDistribution(AgeDistributionRow),
    ImmigrationResistance(ImmigrationResistanceRow),
}

/// Append-only row sink. The kernel writes rows synchronously from its
/// output and checkpoint handlers; nothing else touches the sink.
pub trait OutputSink {
    fn append(&mut self, row: OutputRow) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

#[derive(Debug)]
pub enum SinkError {
    AlreadyExists(PathBuf),
    Io(io::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::AlreadyExists(path) => {
                write!(f, "{} already exists (set overwrite_db to replace it)", path.display())
            }
            SinkError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl Error for SinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        SinkError::Io(e)
    }
}

/// File sink: one JSON object per line. Creation fails when the target
/// exists unless overwriting was requested.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if path.exists() {
            if !overwrite {
                return Err(SinkError::AlreadyExists(path.to_owned()));
            }
            fs::remove_file(path)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl OutputSink for JsonlSink {
    fn append(&mut self, row: OutputRow) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &row)?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Buffering sink for tests.
#[derive(Default)]
pub struct MemorySink {
    rows: Vec<OutputRow>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub fn summary_rows(&self) -> Vec<&SummaryRow> {
        self.rows
            .iter()
            .filter_map(|row| match row {
                OutputRow::Summary(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

impl OutputSink for MemorySink {
    fn append(&mut self, row: OutputRow) -> io::Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_round_trip_with_table_tags() {
        let row = OutputRow::Summary(SummaryRow {
            t: 365.0,
            n_colonized: 10,
            n_colonizations: 14,
        });
        let text = serde_json::to_string(&row).unwrap();
        assert!(text.contains("\"table\":\"summary\""));
        let back: OutputRow = serde_json::from_str(&text).unwrap();
        assert_eq!(back, row);

        let row = OutputRow::CountsByAgeclassTreatment(CountsByAgeclassTreatmentRow {
            t: 0.0,
            ageclass: 2,
            in_treatment: true,
            n_hosts: 3,
            n_colonized: 1,
            n_colonizations: 1,
            n_colonized_by_sensitive_and_resistant: 0,
        });
        let text = serde_json::to_string(&row).unwrap();
        assert!(text.contains("\"table\":\"counts_by_ageclass_treatment\""));
    }

    #[test]
    fn jsonl_sink_refuses_to_clobber_without_overwrite() {
        let path = std::env::temp_dir().join("carriage_sink_conflict_test.jsonl");
        let _ = fs::remove_file(&path);
        drop(JsonlSink::create(&path, false).unwrap());
        assert!(matches!(
            JsonlSink::create(&path, false),
            Err(SinkError::AlreadyExists(_))
        ));
        assert!(JsonlSink::create(&path, true).is_ok());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn jsonl_sink_writes_one_row_per_line() {
        let path = std::env::temp_dir().join("carriage_sink_lines_test.jsonl");
        let _ = fs::remove_file(&path);
        {
            let mut sink = JsonlSink::create(&path, false).unwrap();
            for t in [0.0, 365.0] {
                sink.append(OutputRow::Summary(SummaryRow {
                    t,
                    n_colonized: 0,
                    n_colonizations: 0,
                }))
                .unwrap();
            }
            sink.flush().unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        for line in text.lines() {
            let _: OutputRow = serde_json::from_str(line).unwrap();
        }
        let _ = fs::remove_file(&path);
    }
}
