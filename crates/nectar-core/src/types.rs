//! Numerical vectors exchanged with foreign functions.

use serde::{Deserialize, Serialize};

/// Declared shape of a foreign function, as reported by its `info` entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub input_dimension: usize,
    pub output_dimension: usize,
    pub description: Option<String>,
}

/// A batch of fixed-dimension points stored row-major.
///
/// Deserialization goes through [`Sample::from_flat`], so a sample whose
/// value count does not match `dimension * rows` is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSample")]
pub struct Sample {
    dimension: usize,
    rows: usize,
    values: Vec<f64>,
    description: Option<String>,
}

/// Unchecked wire form of a [`Sample`].
#[derive(Deserialize)]
struct RawSample {
    dimension: usize,
    rows: usize,
    values: Vec<f64>,
    #[serde(default)]
    description: Option<String>,
}

impl TryFrom<RawSample> for Sample {
    type Error = String;

    fn try_from(raw: RawSample) -> Result<Self, Self::Error> {
        let value_count = raw.values.len();
        Sample::from_flat(raw.dimension, raw.rows, raw.values)
            .map(|sample| sample.with_description(raw.description))
            .ok_or_else(|| {
                format!(
                    "{} values cannot form {} rows of dimension {}",
                    value_count, raw.rows, raw.dimension
                )
            })
    }
}

impl Sample {
    /// Create an empty sample of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: 0,
            values: Vec::new(),
            description: None,
        }
    }

    /// Create an empty sample with room for `rows` points.
    pub fn with_capacity(dimension: usize, rows: usize) -> Self {
        Self {
            dimension,
            rows: 0,
            values: Vec::with_capacity(dimension * rows),
            description: None,
        }
    }

    /// Build a sample from row-major values.
    ///
    /// Returns `None` if `values` is not a whole number of rows.
    pub fn from_flat(dimension: usize, rows: usize, values: Vec<f64>) -> Option<Self> {
        if values.len() != dimension * rows {
            return None;
        }
        Some(Self {
            dimension,
            rows,
            values,
            description: None,
        })
    }

    /// Build a sample from rows that must all share `dimension`.
    ///
    /// Returns the index of the first offending row on mismatch.
    pub fn from_rows<R: AsRef<[f64]>>(dimension: usize, rows: &[R]) -> Result<Self, usize> {
        let mut sample = Self::with_capacity(dimension, rows.len());
        for (index, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != dimension {
                return Err(index);
            }
            sample.values.extend_from_slice(row);
            sample.rows += 1;
        }
        Ok(sample)
    }

    /// Attach a description taken from function introspection.
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Append one point. The caller guarantees `point.len() == dimension`.
    pub(crate) fn push(&mut self, point: &[f64]) {
        debug_assert_eq!(point.len(), self.dimension);
        self.values.extend_from_slice(point);
        self.rows += 1;
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Borrow point `index`.
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dimension;
        Some(&self.values[start..start + self.dimension])
    }

    /// Iterate over points in order.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |index| {
            let start = index * self.dimension;
            &self.values[start..start + self.dimension]
        })
    }

    /// Row-major values.
    pub fn as_flat(&self) -> &[f64] {
        &self.values
    }

    /// Copy out every point as its own vector.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows().map(<[f64]>::to_vec).collect()
    }
}
