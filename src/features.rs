use std::fmt::Debug;

use log::debug;
use num::Integer;
use polars::prelude::*;
use serde::Serialize;

use crate::error::{EdaError, Result};
use crate::records::{APPOINTMENT_DAY, DAY_GAP, SCHEDULED_DAY};

/// Cutoff names of the quartile groups, in label order.
pub const QUARTILE_NAMES: [&str; 4] = ["25%", "50%", "75%", "max"];

/// Ascending edges and one label per interval between them.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSpec {
    pub edges: Vec<f64>,
    pub labels: Vec<String>,
}

impl BucketSpec {
    /// Labels the intervals `Group_1`, `Group_2`, ...
    pub fn numbered(edges: Vec<f64>) -> Self {
        let labels = (1..edges.len()).map(|n| format!("Group_{}", n)).collect();
        BucketSpec { edges, labels }
    }

    /// Day gaps in days, edges taken from the quartiles of the full dataset.
    pub fn day_gap() -> Self {
        Self::numbered(vec![-7.0, 0.0, 4.0, 15.0, 179.0])
    }

    pub fn age() -> Self {
        Self::numbered(vec![f64::NEG_INFINITY, 18.0, 37.0, 55.0, 115.0])
    }

    /// `Group_2 (50%)` style label for the report.
    pub fn display_label(&self, label: &str) -> String {
        match self.labels.iter().position(|l| l == label) {
            Some(i) if self.labels.len() == QUARTILE_NAMES.len() => {
                format!("{} ({})", label, QUARTILE_NAMES[i])
            }
            _ => label.to_string(),
        }
    }
}

/// Adds `Days_Between_Ad_Sd`: calendar days from the scheduling date to the
/// appointment date, both taken in UTC. Time of day is ignored.
pub fn derive_day_gap(df: &DataFrame) -> Result<DataFrame> {
    let scheduled = day_numbers(df.column(SCHEDULED_DAY)?)?;
    let appointment = day_numbers(df.column(APPOINTMENT_DAY)?)?;

    let gaps: Vec<Option<i64>> = scheduled
        .iter()
        .zip(&appointment)
        .map(|(scheduled, appointment)| match (scheduled, appointment) {
            (Some(s), Some(a)) => Some(a - s),
            _ => None,
        })
        .collect();

    let negative = gaps.iter().flatten().filter(|gap| **gap < 0).count();
    if negative > 0 {
        debug!("{} appointments are dated before they were scheduled", negative);
    }

    let mut out = df.clone();
    out.with_column(Series::new(DAY_GAP, gaps))?;
    Ok(out)
}

fn day_numbers(series: &Series) -> Result<Vec<Option<i64>>> {
    let per_day: i64 = match series.dtype() {
        DataType::Datetime(TimeUnit::Milliseconds, _) => 86_400_000,
        DataType::Datetime(TimeUnit::Microseconds, _) => 86_400_000_000,
        DataType::Datetime(TimeUnit::Nanoseconds, _) => 86_400_000_000_000,
        DataType::Date => 1,
        dtype => {
            return Err(EdaError::NotTimestamp {
                column: series.name().to_string(),
                dtype: dtype.clone(),
            })
        }
    };
    let physical = series.to_physical_repr().cast(&DataType::Int64)?;
    Ok(physical
        .i64()?
        .into_iter()
        .map(|t| t.map(|t| Integer::div_floor(&t, &per_day)))
        .collect())
}

/// Assigns every value to the interval `(edges[i], edges[i + 1]]` and returns
/// `labels[i]`. Values at or below the first edge, above the last edge, or
/// missing are left unclassified.
pub fn bucketize<'a, T, I>(values: I, edges: &[T], labels: &'a [String]) -> Result<Vec<Option<&'a str>>>
where
    T: PartialOrd + Copy + Debug,
    I: IntoIterator<Item = Option<T>>,
{
    if edges.len() < 2 {
        return Err(EdaError::Buckets(format!("need at least two edges, got {}", edges.len())));
    }
    if labels.len() + 1 != edges.len() {
        return Err(EdaError::Buckets(format!(
            "{} edges need {} labels, got {}",
            edges.len(),
            edges.len() - 1,
            labels.len()
        )));
    }
    if let Some(pair) = edges.windows(2).find(|pair| !(pair[0] < pair[1])) {
        return Err(EdaError::Buckets(format!("edges not ascending at {:?}", pair)));
    }

    Ok(values
        .into_iter()
        .map(|value| {
            let value = value?;
            match edges.partition_point(|edge| *edge < value) {
                0 => None,
                i if i == edges.len() => None,
                i => Some(labels[i - 1].as_str()),
            }
        })
        .collect())
}

/// Adds a Utf8 column `target` with the bucket label of each value in `source`.
pub fn bucketize_column(df: &DataFrame, source: &str, target: &str, spec: &BucketSpec) -> Result<DataFrame> {
    let values = df.column(source)?.cast(&DataType::Float64)?;
    let labels = bucketize(values.f64()?.into_iter(), &spec.edges, &spec.labels)?;

    let unclassified = labels.iter().filter(|label| label.is_none()).count();
    if unclassified > 0 {
        debug!("{} values of {} fall outside every bucket", unclassified, source);
    }

    let mut out = df.clone();
    out.with_column(Series::new(target, labels))?;
    Ok(out)
}

/// Five number summary, quartiles linearly interpolated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Describe {
    pub count: usize,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

/// Summary of the non-null, non-NaN values of a numeric column. `None` when
/// there are no such values.
pub fn describe(series: &Series) -> Result<Option<Describe>> {
    let values = series.cast(&DataType::Float64)?;
    let values = values.f64()?;
    let values = values.filter(&values.is_not_nan())?;

    let count = values.len() - values.null_count();
    let (Some(min), Some(max)) = (values.min(), values.max()) else {
        return Ok(None);
    };
    let quantile = |p: f64| -> Result<f64> {
        Ok(values
            .quantile(p, QuantileInterpolOptions::Linear)?
            .unwrap_or(min))
    };

    Ok(Some(Describe {
        count,
        min,
        q25: quantile(0.25)?,
        q50: quantile(0.5)?,
        q75: quantile(0.75)?,
        max,
    }))
}
