//! Aggregates behind the no-show charts: show rate per group, the SMS
//! cross-tabulation and the day-gap/no-show relation.

use std::fmt;
use std::io::Write;

use polars::prelude::*;
use serde::Serialize;

use crate::cleaner::CleaningSummary;
use crate::error::Result;
use crate::features::{describe, BucketSpec, Describe};
use crate::records::{AGE, AGE_GROUP, DAY_GAP, DAY_GAP_GROUP, NO_SHOW, SMS_RECEIVED};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupShowRate {
    pub group: String,
    pub label: String,
    pub total: usize,
    pub showed: usize,
    /// Percentage of the group with `No_show == false`.
    pub show_rate: f64,
}

/// Show rate for every non-null value of `group_key`, ordered by the key
/// value (numeric keys numerically, labels by text, `false` before `true`).
/// Rows with a missing `No_show` are not counted.
pub fn aggregate_show_rate(df: &DataFrame, group_key: &str) -> Result<Vec<GroupShowRate>> {
    let groups = df
        .clone()
        .lazy()
        .filter(col(group_key).is_not_null().and(col(NO_SHOW).is_not_null()))
        .groupby([col(group_key)])
        .agg([
            count().alias("total"),
            col(NO_SHOW).not().cast(DataType::Int64).sum().alias("showed"),
        ])
        .sort(group_key, SortOptions::default())
        .collect()?;

    let keys = groups.column(group_key)?.cast(&DataType::Utf8)?;
    let totals = counts(&groups, "total")?;
    let showed = counts(&groups, "showed")?;

    Ok(keys
        .utf8()?
        .into_iter()
        .zip(totals)
        .zip(showed)
        .map(|((group, total), showed)| {
            let group = group.unwrap_or_default().to_string();
            GroupShowRate {
                label: group.clone(),
                group,
                total,
                showed,
                show_rate: showed as f64 / total as f64 * 100.0,
            }
        })
        .collect())
}

/// An aggregated count column as `usize`, missing sums read as zero.
fn counts(df: &DataFrame, name: &str) -> Result<Vec<usize>> {
    let values = df.column(name)?.cast(&DataType::Int64)?;
    let values = values
        .i64()?
        .into_iter()
        .map(|v| v.unwrap_or(0) as usize)
        .collect();
    Ok(values)
}

fn ratio(part: usize, whole: usize) -> Option<f64> {
    if whole == 0 {
        None
    } else {
        Some(part as f64 / whole as f64)
    }
}

/// Show/no-show crossed with SMS reminders. Shares are fractions of one and
/// absent when their denominator is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SmsBreakdown {
    pub showed: usize,
    pub no_show: usize,
    pub sms_showed: usize,
    pub sms_no_show: usize,
    pub no_sms_showed: usize,
    pub no_sms_no_show: usize,
    /// Among patients who got an SMS, the share that showed up.
    pub sms_show_share: Option<f64>,
    pub sms_no_show_share: Option<f64>,
    /// Among patients who got no SMS, the share that showed up.
    pub no_sms_show_share: Option<f64>,
    pub no_sms_no_show_share: Option<f64>,
    /// Among patients who showed up, the share that got an SMS.
    pub showed_with_sms_share: Option<f64>,
    pub showed_without_sms_share: Option<f64>,
    /// Among no-shows, the share that got an SMS.
    pub no_show_with_sms_share: Option<f64>,
    pub no_show_without_sms_share: Option<f64>,
}

pub fn sms_breakdown(df: &DataFrame) -> Result<SmsBreakdown> {
    let tally = |sms: Expr, no_show: Expr, name: &str| {
        sms.and(no_show).cast(DataType::Int64).sum().alias(name)
    };
    let totals = df
        .clone()
        .lazy()
        .select([
            tally(col(SMS_RECEIVED), col(NO_SHOW).not(), "sms_showed"),
            tally(col(SMS_RECEIVED), col(NO_SHOW), "sms_no_show"),
            tally(col(SMS_RECEIVED).not(), col(NO_SHOW).not(), "no_sms_showed"),
            tally(col(SMS_RECEIVED).not(), col(NO_SHOW), "no_sms_no_show"),
        ])
        .collect()?;
    let total = |name: &str| -> Result<usize> {
        Ok(counts(&totals, name)?.first().copied().unwrap_or(0))
    };

    let mut b = SmsBreakdown {
        sms_showed: total("sms_showed")?,
        sms_no_show: total("sms_no_show")?,
        no_sms_showed: total("no_sms_showed")?,
        no_sms_no_show: total("no_sms_no_show")?,
        ..SmsBreakdown::default()
    };
    b.showed = b.sms_showed + b.no_sms_showed;
    b.no_show = b.sms_no_show + b.no_sms_no_show;

    let sms_total = b.sms_showed + b.sms_no_show;
    let no_sms_total = b.no_sms_showed + b.no_sms_no_show;
    b.sms_show_share = ratio(b.sms_showed, sms_total);
    b.sms_no_show_share = ratio(b.sms_no_show, sms_total);
    b.no_sms_show_share = ratio(b.no_sms_showed, no_sms_total);
    b.no_sms_no_show_share = ratio(b.no_sms_no_show, no_sms_total);
    b.showed_with_sms_share = ratio(b.sms_showed, b.showed);
    b.showed_without_sms_share = ratio(b.no_sms_showed, b.showed);
    b.no_show_with_sms_share = ratio(b.sms_no_show, b.no_show);
    b.no_show_without_sms_share = ratio(b.no_sms_no_show, b.no_show);
    Ok(b)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayGapPoint {
    pub day_gap: i64,
    pub appointments: usize,
    pub no_shows: usize,
}

/// Appointments and no-shows per distinct day gap, ascending.
pub fn day_gap_relation(df: &DataFrame) -> Result<Vec<DayGapPoint>> {
    let points = df
        .clone()
        .lazy()
        .filter(col(DAY_GAP).is_not_null().and(col(NO_SHOW).is_not_null()))
        .groupby([col(DAY_GAP)])
        .agg([
            count().alias("appointments"),
            col(NO_SHOW).cast(DataType::Int64).sum().alias("no_shows"),
        ])
        .sort(DAY_GAP, SortOptions::default())
        .collect()?;

    let gaps = points.column(DAY_GAP)?.cast(&DataType::Int64)?;
    let appointments = counts(&points, "appointments")?;
    let no_shows = counts(&points, "no_shows")?;
    Ok(gaps
        .i64()?
        .into_iter()
        .zip(appointments)
        .zip(no_shows)
        .filter_map(|((day_gap, appointments), no_shows)| {
            Some(DayGapPoint {
                day_gap: day_gap?,
                appointments,
                no_shows,
            })
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub cleaning: CleaningSummary,
    pub day_gap: Option<Describe>,
    pub age: Option<Describe>,
    pub show_rate_by_day_gap: Vec<GroupShowRate>,
    pub show_rate_by_sms: Vec<GroupShowRate>,
    pub show_rate_by_age: Vec<GroupShowRate>,
    pub sms: SmsBreakdown,
    pub day_gap_relation: Vec<DayGapPoint>,
}

#[derive(Serialize)]
struct ShowRateRow<'a> {
    chart: &'a str,
    group: &'a str,
    total: usize,
    showed: usize,
    show_rate: f64,
}

impl AnalysisReport {
    /// Expects the frame produced by the gold stage: cleaned, typed, with
    /// the day-gap and both bucket columns present.
    pub fn build(
        df: &DataFrame,
        cleaning: CleaningSummary,
        day_gap_buckets: &BucketSpec,
        age_buckets: &BucketSpec,
    ) -> Result<Self> {
        let labelled = |mut rates: Vec<GroupShowRate>, spec: &BucketSpec| {
            for rate in rates.iter_mut() {
                rate.label = spec.display_label(&rate.group);
            }
            rates
        };

        let mut by_sms = aggregate_show_rate(df, SMS_RECEIVED)?;
        for rate in by_sms.iter_mut() {
            rate.label = match rate.group.as_str() {
                "true" => "Received SMS".to_string(),
                _ => "No SMS".to_string(),
            };
        }

        Ok(AnalysisReport {
            cleaning,
            day_gap: describe(df.column(DAY_GAP)?)?,
            age: describe(df.column(AGE)?)?,
            show_rate_by_day_gap: labelled(aggregate_show_rate(df, DAY_GAP_GROUP)?, day_gap_buckets),
            show_rate_by_sms: by_sms,
            show_rate_by_age: labelled(aggregate_show_rate(df, AGE_GROUP)?, age_buckets),
            sms: sms_breakdown(df)?,
            day_gap_relation: day_gap_relation(df)?,
        })
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// One row per group of each show-rate chart.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let charts = [
            ("day_gap", &self.show_rate_by_day_gap),
            ("sms_received", &self.show_rate_by_sms),
            ("age", &self.show_rate_by_age),
        ];
        for (chart, rates) in charts {
            for rate in rates.iter() {
                wtr.serialize(ShowRateRow {
                    chart,
                    group: &rate.label,
                    total: rate.total,
                    showed: rate.showed,
                    show_rate: rate.show_rate,
                })?;
            }
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

fn fmt_share(share: Option<f64>) -> String {
    match share {
        Some(share) => format!("{:.3}", share),
        None => "-".to_string(),
    }
}

fn fmt_rates(f: &mut fmt::Formatter<'_>, title: &str, rates: &[GroupShowRate]) -> fmt::Result {
    writeln!(f, "{}", title)?;
    for rate in rates {
        writeln!(
            f,
            "  {:<20} {:>4.0}%  ({} of {})",
            rate.label, rate.show_rate, rate.showed, rate.total
        )?;
    }
    Ok(())
}

fn fmt_describe(f: &mut fmt::Formatter<'_>, title: &str, d: &Option<Describe>) -> fmt::Result {
    match d {
        Some(d) => writeln!(
            f,
            "{:<10} min {}  25% {}  50% {}  75% {}  max {}",
            title, d.min, d.q25, d.q50, d.q75, d.max
        ),
        None => writeln!(f, "{:<10} no values", title),
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.cleaning;
        writeln!(f, "Cleaning")?;
        writeln!(f, "  rows read             {}", c.rows_in)?;
        writeln!(f, "  duplicates removed    {}", c.duplicates_removed)?;
        writeln!(f, "  incomplete removed    {}", c.rows_with_nulls_removed)?;
        match c.replacement_age {
            Some(age) => writeln!(f, "  negative ages fixed   {} (set to {})", c.ages_repaired, age)?,
            None => writeln!(f, "  negative ages fixed   0")?,
        }
        writeln!(f, "  rows kept             {}", c.rows_out)?;
        writeln!(f)?;

        fmt_describe(f, "Day gap", &self.day_gap)?;
        fmt_describe(f, "Age", &self.age)?;
        writeln!(f)?;

        fmt_rates(f, "% of patients that showed up per day gap group", &self.show_rate_by_day_gap)?;
        fmt_rates(f, "% of patients that showed up by SMS received", &self.show_rate_by_sms)?;
        fmt_rates(f, "% of patients that showed up per age group", &self.show_rate_by_age)?;
        writeln!(f)?;

        let s = &self.sms;
        writeln!(f, "SMS reminders (share out of 1)")?;
        writeln!(
            f,
            "  received SMS:    showed {}  no-show {}",
            fmt_share(s.sms_show_share),
            fmt_share(s.sms_no_show_share)
        )?;
        writeln!(
            f,
            "  no SMS:          showed {}  no-show {}",
            fmt_share(s.no_sms_show_share),
            fmt_share(s.no_sms_no_show_share)
        )?;
        writeln!(
            f,
            "  showed up:       with SMS {}  without {}",
            fmt_share(s.showed_with_sms_share),
            fmt_share(s.showed_without_sms_share)
        )?;
        writeln!(
            f,
            "  did not show:    with SMS {}  without {}",
            fmt_share(s.no_show_with_sms_share),
            fmt_share(s.no_show_without_sms_share)
        )
    }
}
