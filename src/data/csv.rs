//! CSV format dataset implementation
//!
//! Supports loading dense numeric datasets from CSV files where:
//! - The last `n_targets` columns are targets
//! - All other columns are features
//! - First row can be headers (automatically detected)
//! - Lines starting with `#` are comments

use crate::core::{Dataset, KrrError, Result};
use ndarray::{s, Array2, ArrayView2};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Dense dataset loaded from a CSV file
#[derive(Debug, Clone)]
pub struct CSVDataset {
    features: Array2<f64>,
    targets: Array2<f64>,
}

impl CSVDataset {
    /// Build a dataset from already loaded arrays
    pub fn new(features: Array2<f64>, targets: Array2<f64>) -> Result<Self> {
        if features.nrows() != targets.nrows() {
            return Err(KrrError::DimensionMismatch {
                expected: features.nrows(),
                actual: targets.nrows(),
            });
        }
        Ok(Self { features, targets })
    }

    /// Load a dataset from a CSV file
    ///
    /// The last `n_targets` columns are targets; `0` loads features only.
    pub fn from_file<P: AsRef<Path>>(path: P, n_targets: usize) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), n_targets)
    }

    /// Load a dataset from a reader, detecting a header line
    pub fn from_reader<R: BufRead>(reader: R, n_targets: usize) -> Result<Self> {
        Self::from_reader_with_options(reader, n_targets, true)
    }

    /// Load a dataset from a reader with explicit header option
    pub fn from_reader_with_options<R: BufRead>(
        reader: R,
        n_targets: usize,
        auto_detect_header: bool,
    ) -> Result<Self> {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut width = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if rows.is_empty() && width.is_none() && auto_detect_header && Self::is_header_line(line)
            {
                width = Some(line.split(',').count());
                continue;
            }

            let row = Self::parse_data_line(line, line_no + 1)?;
            match width {
                Some(w) if w != row.len() => {
                    return Err(KrrError::ParseError(format!(
                        "Line {} has {} fields, expected {w}",
                        line_no + 1,
                        row.len()
                    )))
                }
                _ => width = Some(row.len()),
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(KrrError::EmptyDataset);
        }
        let width = rows[0].len();
        if n_targets >= width {
            return Err(KrrError::InvalidParameter(format!(
                "{n_targets} target columns leave no features in {width} columns"
            )));
        }

        let n = rows.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let all = Array2::from_shape_vec((n, width), flat)
            .map_err(|e| KrrError::ParseError(e.to_string()))?;
        let split = width - n_targets;
        Ok(Self {
            features: all.slice(s![.., ..split]).to_owned(),
            targets: all.slice(s![.., split..]).to_owned(),
        })
    }

    /// Check if a line appears to be a header
    fn is_header_line(line: &str) -> bool {
        let fields: Vec<&str> = line.split(',').collect();
        let non_numeric = fields
            .iter()
            .filter(|field| field.trim().parse::<f64>().is_err())
            .count();
        non_numeric * 2 > fields.len()
    }

    /// Parse a CSV data line into a row of numbers
    fn parse_data_line(line: &str, line_no: usize) -> Result<Vec<f64>> {
        line.split(',')
            .enumerate()
            .map(|(col, field)| {
                let field = field.trim();
                field.parse::<f64>().map_err(|_| {
                    KrrError::ParseError(format!(
                        "Invalid value at line {line_no}, column {}: {field}",
                        col + 1
                    ))
                })
            })
            .collect()
    }

    /// Take ownership of the feature and target matrices
    pub fn into_parts(self) -> (Array2<f64>, Array2<f64>) {
        (self.features, self.targets)
    }

    pub fn n_targets(&self) -> usize {
        self.targets.ncols()
    }
}

impl Dataset for CSVDataset {
    fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    fn targets(&self) -> ArrayView2<'_, f64> {
        self.targets.view()
    }
}

/// Write a matrix as CSV, one row per line
pub fn write_csv<W: Write>(mut writer: W, values: ArrayView2<f64>) -> Result<()> {
    for row in values.outer_iter() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(writer, "{}", line.join(","))?;
    }
    writer.flush()?;
    Ok(())
}
