use std::{io::Read, path::Path};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::DataLoadError;

/// Header names of the delimited source, in file order.
pub const COLUMNS: [&str; 3] = ["studyHours", "attendance", "passed"];

/// A point in raw feature space (hours per week, attendance percentage).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    /// Weekly study hours.
    pub study_hours: f64,
    /// Attendance percentage.
    pub attendance: f64,
}

impl RawPoint {
    /// Creates a raw point.
    #[must_use]
    pub const fn new(study_hours: f64, attendance: f64) -> Self {
        Self {
            study_hours,
            attendance,
        }
    }
}

/// One labeled observation. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Weekly study hours.
    pub study_hours: f64,
    /// Attendance percentage.
    pub attendance: f64,
    /// Whether the student passed.
    pub passed: bool,
}

impl Sample {
    /// Creates a sample.
    #[must_use]
    pub const fn new(study_hours: f64, attendance: f64, passed: bool) -> Self {
        Self {
            study_hours,
            attendance,
            passed,
        }
    }

    /// Feature part of the sample.
    #[must_use]
    pub const fn features(&self) -> RawPoint {
        RawPoint::new(self.study_hours, self.attendance)
    }

    /// Label as `0.0` / `1.0`.
    #[must_use]
    pub fn label(&self) -> f64 {
        f64::from(u8::from(self.passed))
    }
}

/// Ordered collection of samples. Order is kept for display only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Samples in source order.
    pub samples: Vec<Sample>,
}

impl Dataset {
    /// Wraps already-parsed samples.
    #[must_use]
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset holds no sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Deterministic, linearly separable data: a student passes iff
    /// `study_hours / 50 + attendance / 100 > 1`.
    #[must_use]
    pub fn separable(count: usize, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let samples = (0..count)
            .map(|_| {
                let study_hours = rng.gen_range(0.0..50.0);
                let attendance = rng.gen_range(0.0..100.0);
                let passed = study_hours / 50.0 + attendance / 100.0 > 1.0;
                Sample::new(study_hours, attendance, passed)
            })
            .collect();
        Self { samples }
    }

    /// Summary statistics; `None` for an empty dataset.
    #[must_use]
    pub fn summary(&self) -> Option<DatasetSummary> {
        let first = self.samples.first()?;
        let mut summary = DatasetSummary {
            count: 0,
            passed: 0,
            study_hours: FeatureRange::at(first.study_hours),
            attendance: FeatureRange::at(first.attendance),
        };
        for sample in &self.samples {
            summary.count += 1;
            summary.passed += usize::from(sample.passed);
            summary.study_hours.include(sample.study_hours);
            summary.attendance.include(sample.attendance);
        }
        Some(summary)
    }
}

/// Observed bounds of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
}

impl FeatureRange {
    const fn at(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Counts and ranges over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Number of samples.
    pub count: usize,
    /// Number of passing samples.
    pub passed: usize,
    /// Study hours bounds.
    pub study_hours: FeatureRange,
    /// Attendance bounds.
    pub attendance: FeatureRange,
}

impl DatasetSummary {
    /// Number of failing samples.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.count - self.passed
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "studyHours")]
    study_hours: f64,
    attendance: f64,
    passed: f64,
}

/// Reads `studyHours,attendance,passed` delimited text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetLoader;

impl DatasetLoader {
    /// Loads a dataset from a file.
    ///
    /// # Errors
    ///
    /// [`DataLoadError::Csv`] when the file cannot be opened or read; see
    /// [`DatasetLoader::from_reader`] for content errors.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Dataset, DataLoadError> {
        let reader = Self::builder().from_path(path)?;
        Self::collect(reader)
    }

    /// Loads a dataset from any reader (in-memory text, network body, ...).
    ///
    /// # Errors
    ///
    /// [`DataLoadError::Csv`] for malformed rows,
    /// [`DataLoadError::MissingColumn`] when the header lacks a column,
    /// [`DataLoadError::InvalidValue`] for non-finite numbers and
    /// [`DataLoadError::InvalidLabel`] for a `passed` value other than 0 or 1.
    pub fn from_reader(source: impl Read) -> Result<Dataset, DataLoadError> {
        Self::collect(Self::builder().from_reader(source))
    }

    fn builder() -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder.trim(csv::Trim::All).flexible(true);
        builder
    }

    fn collect<R: Read>(mut reader: csv::Reader<R>) -> Result<Dataset, DataLoadError> {
        let headers = reader.headers()?.clone();
        for column in COLUMNS {
            if !headers.iter().any(|header| header == column) {
                return Err(DataLoadError::MissingColumn(column.to_owned()));
            }
        }

        let mut samples = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let line = record.position().map_or(0, csv::Position::line);
            let row: CsvRow = record.deserialize(Some(&headers))?;
            samples.push(Self::validate(line, &row)?);
        }
        Ok(Dataset { samples })
    }

    fn validate(line: u64, row: &CsvRow) -> Result<Sample, DataLoadError> {
        for (column, value) in [("studyHours", row.study_hours), ("attendance", row.attendance)] {
            if !value.is_finite() {
                return Err(DataLoadError::InvalidValue {
                    line,
                    column,
                    value,
                });
            }
        }
        #[allow(clippy::float_cmp)]
        let passed = match row.passed {
            v if v == 0.0 => false,
            v if v == 1.0 => true,
            value => return Err(DataLoadError::InvalidLabel { line, value }),
        };
        Ok(Sample::new(row.study_hours, row.attendance, passed))
    }
}
