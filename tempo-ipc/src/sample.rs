//! The published sample value type.
//!
//! A [`Sample`] is what the application publishes to the monitor for one
//! sampling window: componentwise arithmetic, a labeled text form, and a
//! parser for it.

use crate::MAX_CUSTOM_FIELDS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Aggregated measurements covering one sampling window.
///
/// All numeric fields are doubles so that cross-thread averaging and
/// throughput extrapolation never truncate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// If true, `latency` and `load_percentage` are not reliable for this
    /// sample. Throughput and task counts are never affected.
    pub inconsistent: bool,

    /// Percentage ([0, 100]) of wall time spent in the compute section.
    pub load_percentage: f64,

    /// Tasks per second.
    pub throughput: f64,

    /// Mean per-task latency in nanoseconds.
    pub latency: f64,

    /// Number of tasks accounted for in this window.
    pub num_tasks: f64,

    /// User-defined counters, stored via `store_custom_value`.
    pub custom_fields: [f64; MAX_CUSTOM_FIELDS],
}

impl Sample {
    /// Applies `op` to every numeric field pair, and marks the result
    /// inconsistent if either operand is.
    fn zip(mut self, rhs: &Sample, op: impl Fn(f64, f64) -> f64) -> Sample {
        self.inconsistent |= rhs.inconsistent;
        self.load_percentage = op(self.load_percentage, rhs.load_percentage);
        self.throughput = op(self.throughput, rhs.throughput);
        self.latency = op(self.latency, rhs.latency);
        self.num_tasks = op(self.num_tasks, rhs.num_tasks);
        for (lhs, rhs) in self.custom_fields.iter_mut().zip(rhs.custom_fields) {
            *lhs = op(*lhs, rhs);
        }
        self
    }

    /// Applies `op` with a scalar to every numeric field. The inconsistency
    /// flag is untouched: scaling cannot make a sample less reliable.
    fn map(mut self, x: f64, op: impl Fn(f64, f64) -> f64) -> Sample {
        self.load_percentage = op(self.load_percentage, x);
        self.throughput = op(self.throughput, x);
        self.latency = op(self.latency, x);
        self.num_tasks = op(self.num_tasks, x);
        for field in &mut self.custom_fields {
            *field = op(*field, x);
        }
        self
    }
}

impl Add for Sample {
    type Output = Sample;
    fn add(self, rhs: Sample) -> Sample {
        self.zip(&rhs, |a, b| a + b)
    }
}

impl Sub for Sample {
    type Output = Sample;
    fn sub(self, rhs: Sample) -> Sample {
        self.zip(&rhs, |a, b| a - b)
    }
}

impl Mul for Sample {
    type Output = Sample;
    fn mul(self, rhs: Sample) -> Sample {
        self.zip(&rhs, |a, b| a * b)
    }
}

impl Div for Sample {
    type Output = Sample;
    fn div(self, rhs: Sample) -> Sample {
        self.zip(&rhs, |a, b| a / b)
    }
}

impl Mul<f64> for Sample {
    type Output = Sample;
    fn mul(self, x: f64) -> Sample {
        self.map(x, |a, b| a * b)
    }
}

impl Div<f64> for Sample {
    type Output = Sample;
    fn div(self, x: f64) -> Sample {
        self.map(x, |a, b| a / b)
    }
}

impl AddAssign for Sample {
    fn add_assign(&mut self, rhs: Sample) {
        *self = *self + rhs;
    }
}

impl SubAssign for Sample {
    fn sub_assign(&mut self, rhs: Sample) {
        *self = *self - rhs;
    }
}

impl MulAssign<f64> for Sample {
    fn mul_assign(&mut self, x: f64) {
        *self = *self * x;
    }
}

impl DivAssign<f64> for Sample {
    fn div_assign(&mut self, x: f64) {
        *self = *self / x;
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Inconsistent: {} Load: {} Throughput: {} Latency: {} NumTasks: {}",
            self.inconsistent as u8,
            self.load_percentage,
            self.throughput,
            self.latency,
            self.num_tasks,
        )?;
        for (i, field) in self.custom_fields.iter().enumerate() {
            write!(f, " CustomField{}: {}", i, field)?;
        }
        write!(f, "]")
    }
}

/// Failure to parse the labeled text form of a [`Sample`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseSampleError {
    #[error("sample text is not delimited by '[' and ']'")]
    Unbracketed,
    #[error("expected label `{expected}`, found `{found}`")]
    Label { expected: String, found: String },
    #[error("missing value for `{0}`")]
    MissingValue(String),
    #[error("invalid value `{found}` for `{label}`")]
    Value { label: String, found: String },
}

/// Reads one `Label: value` pair from the token stream.
fn take_field<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    label: &str,
) -> Result<f64, ParseSampleError> {
    match tokens.next() {
        Some(tok) if tok == format!("{}:", label) => {}
        Some(tok) => {
            return Err(ParseSampleError::Label {
                expected: label.to_string(),
                found: tok.to_string(),
            })
        }
        None => return Err(ParseSampleError::MissingValue(label.to_string())),
    }
    let value = tokens
        .next()
        .ok_or_else(|| ParseSampleError::MissingValue(label.to_string()))?;
    value.parse().map_err(|_| ParseSampleError::Value {
        label: label.to_string(),
        found: value.to_string(),
    })
}

impl FromStr for Sample {
    type Err = ParseSampleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or(ParseSampleError::Unbracketed)?;
        let mut tokens = body.split_whitespace();

        let mut sample = Sample {
            inconsistent: take_field(&mut tokens, "Inconsistent")? != 0.0,
            load_percentage: take_field(&mut tokens, "Load")?,
            throughput: take_field(&mut tokens, "Throughput")?,
            latency: take_field(&mut tokens, "Latency")?,
            num_tasks: take_field(&mut tokens, "NumTasks")?,
            ..Sample::default()
        };
        for i in 0..MAX_CUSTOM_FIELDS {
            sample.custom_fields[i] = take_field(&mut tokens, &format!("CustomField{}", i))?;
        }
        Ok(sample)
    }
}
