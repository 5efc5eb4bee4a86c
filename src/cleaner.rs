//! Cleaning steps applied to the appointment frame before any analysis.
//!
//! Every step takes a frame and returns a new one; nothing is modified in
//! place.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use num::ToPrimitive;
use polars::prelude::*;
use serde::Serialize;

use crate::error::{EdaError, Result};
use crate::records::{
    FieldType, AGE, APPOINTMENT_DAY, FLAG_FIELDS, NO_SHOW, PATIENT_ID, RAW_NO_SHOW,
    SCHEDULED_DAY,
};

/// Row accounting for `remove_nulls_and_duplicates`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleaningSummary {
    pub rows_in: usize,
    pub duplicates_removed: usize,
    pub rows_with_nulls_removed: usize,
    pub ages_repaired: usize,
    pub replacement_age: Option<i64>,
    pub rows_out: usize,
}

/// Drops duplicate rows (first occurrence wins), then rows holding any
/// missing value, then replaces negative ages with the rounded mean of the
/// ages that are left. Blank strings count as missing.
pub fn remove_nulls_and_duplicates(df: &DataFrame) -> Result<(DataFrame, CleaningSummary)> {
    let rows_in = df.height();

    let deduped = blank_strings_to_null(df)?.unique_stable(None, UniqueKeepStrategy::First, None)?;
    let duplicates_removed = rows_in - deduped.height();

    let complete = deduped.drop_nulls::<String>(None)?;
    let rows_with_nulls_removed = deduped.height() - complete.height();

    let (cleaned, ages_repaired, replacement_age) = repair_negative_ages(complete)?;

    let summary = CleaningSummary {
        rows_in,
        duplicates_removed,
        rows_with_nulls_removed,
        ages_repaired,
        replacement_age,
        rows_out: cleaned.height(),
    };
    info!(
        "Removed {} duplicate rows and {} incomplete rows, {} rows left",
        summary.duplicates_removed, summary.rows_with_nulls_removed, summary.rows_out
    );
    Ok((cleaned, summary))
}

fn blank_strings_to_null(df: &DataFrame) -> Result<DataFrame> {
    let mut out = df.clone();
    for series in df.get_columns() {
        if series.dtype() != &DataType::Utf8 {
            continue;
        }
        let text = series.utf8()?;
        let blank = text.apply(|s| Cow::Borrowed(s.trim())).equal("");
        let mut normalised = text.set(&blank, None)?.into_series();
        normalised.rename(series.name());
        out.with_column(normalised)?;
    }
    Ok(out)
}

fn repair_negative_ages(df: DataFrame) -> Result<(DataFrame, usize, Option<i64>)> {
    let ages = df.column(AGE)?.cast(&DataType::Int64)?;
    let ages = ages.i64()?;

    let negative = ages.filter(&ages.lt(0))?.len();
    if negative == 0 {
        return Ok((df, 0, None));
    }

    // half to even, the way the source analysis rounded the mean
    let mean = ages
        .filter(&ages.gt_eq(0))?
        .mean()
        .map(|mean| mean.round_ties_even() as i64)
        .ok_or(EdaError::NoValidAges)?;
    warn!("Replacing {} negative ages with the mean age {}", negative, mean);

    let repaired = df
        .lazy()
        .with_column(
            when(col(AGE).lt(lit(0)))
                .then(lit(mean))
                .otherwise(col(AGE))
                .alias(AGE),
        )
        .collect()?;
    Ok((repaired, negative, Some(mean)))
}

/// Converts each named column to `target`. Nulls stay null; any other value
/// that does not convert aborts the whole cast.
pub fn cast_fields(df: &DataFrame, fields: &[&str], target: FieldType) -> Result<DataFrame> {
    let mut out = df.clone();
    for field in fields {
        let series = df.column(field)?;
        let mut cast = match target {
            FieldType::Integer => to_integer(series)?,
            FieldType::Timestamp => to_timestamp(series)?,
            FieldType::Boolean => to_boolean(series)?,
        };
        cast.rename(field);
        debug!("Cast {} from {} to {}", field, series.dtype(), cast.dtype());
        out.with_column(cast)?;
    }
    Ok(out)
}

/// The type fixes the raw file needs: integer ids, parsed timestamps,
/// boolean flags and a boolean `No_show` column.
pub fn fix_types(df: &DataFrame) -> Result<DataFrame> {
    let df = cast_fields(df, &[PATIENT_ID], FieldType::Integer)?;
    let df = cast_fields(&df, &[SCHEDULED_DAY, APPOINTMENT_DAY], FieldType::Timestamp)?;
    let mut df = cast_fields(&df, &FLAG_FIELDS, FieldType::Boolean)?;
    if df.column(RAW_NO_SHOW).is_ok() {
        df.rename(RAW_NO_SHOW, NO_SHOW)?;
    }
    cast_fields(&df, &[NO_SHOW], FieldType::Boolean)
}

fn cast_error(column: &str, row: usize, value: impl ToString, target: FieldType) -> EdaError {
    EdaError::Cast {
        column: column.to_string(),
        row,
        value: value.to_string(),
        target,
    }
}

fn unsupported(series: &Series, target: FieldType) -> EdaError {
    EdaError::UnsupportedCast {
        column: series.name().to_string(),
        dtype: series.dtype().clone(),
        target,
    }
}

fn to_integer(series: &Series) -> Result<Series> {
    let name = series.name();
    let values = match series.dtype() {
        DataType::Int64 => return Ok(series.clone()),
        DataType::Int32 | DataType::UInt32 | DataType::UInt64 | DataType::Boolean => {
            return Ok(series.strict_cast(&DataType::Int64)?)
        }
        DataType::Float32 | DataType::Float64 => {
            let floats = series.cast(&DataType::Float64)?;
            // truncates toward zero, NaN and out of range values fail
            floats
                .f64()?
                .into_iter()
                .enumerate()
                .map(|(row, v)| match v {
                    None => Ok(None),
                    Some(f) => f
                        .to_i64()
                        .map(Some)
                        .ok_or_else(|| cast_error(name, row, f, FieldType::Integer)),
                })
                .collect::<Result<Vec<_>>>()?
        }
        DataType::Utf8 => series
            .utf8()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| match v {
                None => Ok(None),
                Some(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| cast_error(name, row, s, FieldType::Integer)),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(unsupported(series, FieldType::Integer)),
    };
    Ok(Series::new(name, values))
}

fn to_timestamp(series: &Series) -> Result<Series> {
    let name = series.name();
    match series.dtype() {
        DataType::Datetime(TimeUnit::Milliseconds, _) => Ok(series.clone()),
        DataType::Datetime(_, _) | DataType::Date => {
            Ok(series.cast(&FieldType::Timestamp.dtype())?)
        }
        DataType::Utf8 => {
            let millis: Int64Chunked = series
                .utf8()?
                .into_iter()
                .enumerate()
                .map(|(row, v)| match v {
                    None => Ok(None),
                    Some(s) => parse_timestamp(s)
                        .map(Some)
                        .ok_or_else(|| cast_error(name, row, s, FieldType::Timestamp)),
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .collect();
            let mut out = millis.into_datetime(TimeUnit::Milliseconds, None).into_series();
            out.rename(name);
            Ok(out)
        }
        _ => Err(unsupported(series, FieldType::Timestamp)),
    }
}

/// Milliseconds since the epoch, UTC.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.timestamp_millis());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc().timestamp_millis())
}

fn to_boolean(series: &Series) -> Result<Series> {
    let name = series.name();
    let values: Vec<Option<bool>> = match series.dtype() {
        DataType::Boolean => return Ok(series.clone()),
        DataType::Int32
        | DataType::Int64
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Float32
        | DataType::Float64 => {
            let floats = series.cast(&DataType::Float64)?;
            floats.f64()?.into_iter().map(|v| v.map(|f| f != 0.0)).collect()
        }
        DataType::Utf8 => series
            .utf8()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| match v {
                None => Ok(None),
                Some(s) => parse_flag(s)
                    .map(Some)
                    .ok_or_else(|| cast_error(name, row, s, FieldType::Boolean)),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(unsupported(series, FieldType::Boolean)),
    };
    Ok(Series::new(name, values))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}
