mod analysis;
mod cleaner;
mod error;
mod features;
mod records;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{ArgAction, Parser, ValueEnum};
use env_logger::{Builder, Env};
use log::{debug, info, LevelFilter};
use polars::prelude::*;
use polars_io::parquet::ParquetWriter;
use sysinfo::{get_current_pid, ProcessExt, System, SystemExt};

use analysis::AnalysisReport;
use cleaner::CleaningSummary;
use error::{EdaError, Result};
use features::BucketSpec;
use records::{AppointmentRecord, AGE, AGE_GROUP, DAY_GAP, DAY_GAP_GROUP};

static DEFAULT_INPUT: &str = "data/noshowappointments-kagglev2-may-2016.csv";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct EdaArgs {
    #[arg(default_value = DEFAULT_INPUT, help = "Appointment CSV to analyse")]
    input: PathBuf,
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text, help = "Report format")]
    format: ReportFormat,
    #[arg(short, long, help = "Write the report here instead of stdout")]
    report: Option<PathBuf>,
    #[arg(short, long, help = "Also write the cleaned dataset (.csv or .parquet)")]
    cleaned: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, help = "Verbose level")]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
    Csv,
}

fn monitor_memory() -> u64 {
    let mut sys = System::new();
    match get_current_pid() {
        Ok(pid) => {
            sys.refresh_process(pid);
            sys.process(pid).map(|process| process.memory()).unwrap_or(0)
        }
        Err(_) => 0,
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| EdaError::io(path, e))
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| EdaError::io(path, e))
}

pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let file = open(path.as_ref())?;

    let df = CsvReader::new(file)
        .has_header(true)
        .with_dtypes(Some(AppointmentRecord::shared_raw_schema()))
        .finish()?;
    Ok(df)
}

pub fn write_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = create(path)?;

    CsvWriter::new(&mut file).finish(df)?;

    Ok(())
}

pub fn write_parquet(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = create(path)?;

    ParquetWriter::new(&mut file).finish(df)?;

    Ok(())
}

/// Picks the writer from the file extension.
fn write_cleaned(path: &Path, df: &mut DataFrame) -> Result<()> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("csv") => write_csv(path, df),
        Some("parquet") => write_parquet(path, df),
        _ => Err(EdaError::OutputFormat {
            path: path.to_path_buf(),
        }),
    }
}

fn process_raw(path: &Path) -> Result<DataFrame> {
    let df = read_csv(path)?;
    info!("Read {} rows from {}", df.height(), path.display());
    Ok(df)
}

fn process_silver(df: &DataFrame) -> Result<(DataFrame, CleaningSummary)> {
    let (df, summary) = cleaner::remove_nulls_and_duplicates(df)?;
    let df = cleaner::fix_types(&df)?;
    debug!("Silver schema {:?}", df.schema());
    Ok((df, summary))
}

fn process_gold(df: &DataFrame, day_gap: &BucketSpec, age: &BucketSpec) -> Result<DataFrame> {
    let df = features::derive_day_gap(df)?;
    let df = features::bucketize_column(&df, DAY_GAP, DAY_GAP_GROUP, day_gap)?;
    features::bucketize_column(&df, AGE, AGE_GROUP, age)
}

/// `target` names the destination in I/O errors.
fn write_report(
    report: &AnalysisReport,
    format: ReportFormat,
    out: &mut dyn Write,
    target: &Path,
) -> Result<()> {
    match format {
        ReportFormat::Text => write!(out, "{}", report).map_err(|e| EdaError::io(target, e)),
        ReportFormat::Json => report.write_json(out),
        ReportFormat::Csv => report.write_csv(out),
    }
}

fn eda_app(args: &EdaArgs) -> Result<()> {
    let day_gap = BucketSpec::day_gap();
    let age = BucketSpec::age();

    let raw = process_raw(&args.input)?;
    let (silver, summary) = process_silver(&raw)?;
    let mut gold = process_gold(&silver, &day_gap, &age)?;

    if let Some(path) = &args.cleaned {
        write_cleaned(path, &mut gold)?;
        info!("Wrote cleaned dataset to {}", path.display());
    }

    let report = AnalysisReport::build(&gold, summary, &day_gap, &age)?;
    match &args.report {
        Some(path) => {
            let mut file = create(path)?;
            write_report(&report, args.format, &mut file, path)?;
            info!("Wrote report to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            write_report(&report, args.format, &mut stdout.lock(), Path::new("<stdout>"))?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = EdaArgs::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let env = Env::new().filter("NOSHOW_LOG");
    Builder::new()
        .filter(Some("noshow_eda"), log_level)
        .parse_env(env)
        .init();

    debug!("Arguments {:#?}", args);

    let start_time = Instant::now();
    let start_memory = monitor_memory();

    eda_app(&args)?;

    let end_memory = monitor_memory();
    info!("Time elapsed: {:?}", start_time.elapsed());
    info!("Memory used: {} bytes", end_memory.saturating_sub(start_memory));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NO_SHOW;

    const SAMPLE: &str = "\
PatientId,AppointmentID,Gender,ScheduledDay,AppointmentDay,Age,Neighbourhood,Scholarship,Hipertension,Diabetes,Alcoholism,Handcap,SMS_received,No-show
29872499824296,5642903,F,2016-04-29T18:38:08Z,2016-04-29T00:00:00Z,62,JARDIM DA PENHA,0,1,0,0,0,0,No
558997776694438,5642503,M,2016-04-29T16:08:27Z,2016-04-29T00:00:00Z,56,JARDIM DA PENHA,0,0,0,0,0,0,No
558997776694438,5642503,M,2016-04-29T16:08:27Z,2016-04-29T00:00:00Z,56,JARDIM DA PENHA,0,0,0,0,0,0,No
4262962299951,5642549,F,2016-04-29T16:19:04Z,2016-04-29T00:00:00Z,,MATA DA PRAIA,0,0,0,0,0,0,No
867951213174,5642828,F,2016-04-29T17:29:31Z,2016-05-02T00:00:00Z,-1,PONTAL DE CAMBURI,0,0,0,0,0,1,Yes
8841186448183,5642494,F,2016-04-25T16:07:23Z,2016-05-06T00:00:00Z,8,PONTAL DE CAMBURI,0,0,0,0,0,1,No
";

    fn sample_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_csv_uses_raw_schema() {
        let file = sample_file();
        let df = read_csv(file.path()).unwrap();
        assert_eq!(df.height(), 6);
        assert_eq!(df.column(AGE).unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column(AGE).unwrap().null_count(), 1);
    }

    #[test]
    fn test_missing_file_is_reported_with_path() {
        match read_csv("does/not/exist.csv") {
            Err(EdaError::Io { path, .. }) => assert_eq!(path, PathBuf::from("does/not/exist.csv")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let file = sample_file();
        let day_gap = BucketSpec::day_gap();
        let age = BucketSpec::age();

        let raw = process_raw(file.path()).unwrap();
        let (silver, summary) = process_silver(&raw).unwrap();
        assert_eq!(silver.height(), raw.height() - 2);
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.rows_with_nulls_removed, 1);
        // mean of 62, 56 and 8
        assert_eq!(summary.replacement_age, Some(42));
        assert_eq!(silver.column(NO_SHOW).unwrap().dtype(), &DataType::Boolean);

        let gold = process_gold(&silver, &day_gap, &age).unwrap();
        let gaps: Vec<i64> = gold.column(DAY_GAP).unwrap().i64().unwrap().into_no_null_iter().collect();
        assert_eq!(gaps, vec![0, 0, 3, 11]);

        let report = AnalysisReport::build(&gold, summary, &day_gap, &age).unwrap();
        assert_eq!(report.sms.sms_no_show, 1);
        let first_gap_group = &report.show_rate_by_day_gap[0];
        assert_eq!((first_gap_group.total, first_gap_group.showed), (2, 2));
    }

    #[test]
    fn test_cleaned_output_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFrame::new(vec![Series::new("a", &[1i64, 2])]).unwrap();

        let csv_path = dir.path().join("cleaned.csv");
        write_cleaned(&csv_path, &mut df).unwrap();
        assert!(csv_path.exists());

        let parquet_path = dir.path().join("cleaned.parquet");
        write_cleaned(&parquet_path, &mut df).unwrap();
        assert!(parquet_path.exists());

        assert!(matches!(
            write_cleaned(&dir.path().join("cleaned.xlsx"), &mut df),
            Err(EdaError::OutputFormat { .. })
        ));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_report_write_error_names_destination() {
        let file = sample_file();
        let day_gap = BucketSpec::day_gap();
        let age = BucketSpec::age();
        let (silver, summary) = process_silver(&process_raw(file.path()).unwrap()).unwrap();
        let gold = process_gold(&silver, &day_gap, &age).unwrap();
        let report = AnalysisReport::build(&gold, summary, &day_gap, &age).unwrap();

        let target = Path::new("reports/no-show.txt");
        match write_report(&report, ReportFormat::Text, &mut BrokenPipe, target) {
            Err(EdaError::Io { path, .. }) => assert_eq!(path, target),
            other => panic!("unexpected {other:?}"),
        }
    }
}
