//! CSV exporters for Warren simulation artifacts.
//!
//! Two artifact families: per-month population traces for the runs that
//! opted into snapshots, and the batch-level statistics table. Both are
//! plain formatted lines so downstream analysis tooling can ingest them
//! without a schema.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use warren_core::{BatchReport, MetricSummary, RunTrace};

/// Header of a per-run population trace file.
pub const TRACE_HEADER: &str =
    "Month,Total_Alive,Males,Females,Mature,Pregnant,Births,Deaths,Avg_Age,Min_Age,Max_Age";

/// Header of the batch report table.
pub const REPORT_HEADER: &str = "Metric,Mean,Std_Dev,Min,Max,CI_Low,CI_High";

/// Errors raised while writing export files.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv export failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Render one run's snapshot sequence as a CSV document.
#[must_use]
pub fn trace_csv(trace: &RunTrace) -> String {
    let mut out = String::with_capacity(64 * (trace.snapshots.len() + 1));
    out.push_str(TRACE_HEADER);
    out.push('\n');
    for snapshot in &trace.snapshots {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{:.2},{},{}",
            snapshot.month,
            snapshot.alive,
            snapshot.males,
            snapshot.females,
            snapshot.mature,
            snapshot.pregnant,
            snapshot.births,
            snapshot.deaths,
            snapshot.average_age,
            snapshot.min_age,
            snapshot.max_age,
        );
    }
    out
}

fn metric_row(out: &mut String, name: &str, summary: &MetricSummary) {
    let _ = writeln!(
        out,
        "{name},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4}",
        summary.mean, summary.std_dev, summary.min, summary.max, summary.ci_low, summary.ci_high,
    );
}

/// Render the batch report as a CSV document: a short input preamble, the
/// per-metric statistics table, and the extinction tail.
#[must_use]
pub fn report_csv(report: &BatchReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Months,{}", report.config.months);
    let _ = writeln!(out, "Initial_Population,{}", report.config.initial_population);
    let _ = writeln!(out, "Runs,{}", report.runs);
    let _ = writeln!(out, "Failures,{}", report.failures);
    let _ = writeln!(out, "Base_Seed,{}", report.config.base_seed);
    let _ = writeln!(out, "Survival_Model,{:?}", report.config.survival_model);
    out.push_str(REPORT_HEADER);
    out.push('\n');
    metric_row(&mut out, "Final_Alive", &report.final_alive);
    metric_row(&mut out, "Final_Dead", &report.final_dead);
    metric_row(&mut out, "Peak_Population", &report.peak_population);
    metric_row(&mut out, "Peak_Month", &report.peak_month);
    metric_row(&mut out, "Trough_Population", &report.trough_population);
    metric_row(&mut out, "Trough_Month", &report.trough_month);
    metric_row(&mut out, "Extinction_Month", &report.extinction_month);
    let _ = writeln!(out, "Extinctions,{}", report.extinctions);
    let _ = writeln!(out, "Extinction_Rate,{:.2}", report.extinction_rate);
    out
}

/// Write every trace in the report plus the summary table under `dir`.
///
/// Creates the directory if needed. Returns the paths written, summary
/// first.
pub fn export_batch(report: &BatchReport, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(report.traces.len() + 1);

    let summary_path = dir.join("batch_report.csv");
    fs::write(&summary_path, report_csv(report))?;
    written.push(summary_path);

    for trace in &report.traces {
        let path = dir.join(format!("simulation_{}.csv", trace.run_index + 1));
        fs::write(&path, trace_csv(trace))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warren_core::{BatchConfig, MonthSnapshot, run_batch};

    fn sample_trace() -> RunTrace {
        RunTrace {
            run_index: 0,
            snapshots: vec![
                MonthSnapshot {
                    month: 0,
                    alive: 2,
                    males: 1,
                    females: 1,
                    mature: 2,
                    pregnant: 0,
                    births: 0,
                    deaths: 0,
                    average_age: 9.0,
                    min_age: 9,
                    max_age: 9,
                },
                MonthSnapshot {
                    month: 1,
                    alive: 6,
                    males: 3,
                    females: 3,
                    mature: 2,
                    pregnant: 1,
                    births: 4,
                    deaths: 0,
                    average_age: 3.5,
                    min_age: 0,
                    max_age: 10,
                },
            ],
        }
    }

    #[test]
    fn trace_csv_has_header_and_one_row_per_month() {
        let rendered = trace_csv(&sample_trace());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], TRACE_HEADER);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "0,2,1,1,2,0,0,0,9.00,9,9");
        assert_eq!(lines[2], "1,6,3,3,2,1,4,0,3.50,0,10");
    }

    #[test]
    fn report_csv_lists_every_metric() {
        let config = BatchConfig {
            months: 12,
            initial_population: 2,
            runs: 3,
            base_seed: 99,
            initial_capacity: 64,
            snapshot_runs: 1,
            ..BatchConfig::default()
        };
        let report = run_batch(&config).expect("batch");
        let rendered = report_csv(&report);
        for metric in [
            "Final_Alive",
            "Final_Dead",
            "Peak_Population",
            "Peak_Month",
            "Trough_Population",
            "Trough_Month",
            "Extinction_Month",
            "Extinction_Rate",
        ] {
            assert!(rendered.contains(metric), "missing {metric}");
        }
        assert!(rendered.contains("Runs,3"));
    }

    #[test]
    fn export_batch_writes_summary_and_traces() {
        let config = BatchConfig {
            months: 6,
            initial_population: 2,
            runs: 2,
            base_seed: 7,
            initial_capacity: 64,
            snapshot_runs: 2,
            ..BatchConfig::default()
        };
        let report = run_batch(&config).expect("batch");
        let dir = std::env::temp_dir().join("warren-storage-export-test");
        let _ = fs::remove_dir_all(&dir);

        let written = export_batch(&report, &dir).expect("export");
        assert_eq!(written.len(), 3);
        assert!(written[0].ends_with("batch_report.csv"));
        let trace_body = fs::read_to_string(&written[1]).expect("trace file");
        assert!(trace_body.starts_with(TRACE_HEADER));

        let _ = fs::remove_dir_all(&dir);
    }
}
