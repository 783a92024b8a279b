//! Markdown rendering of forecasts, comparisons and pools

use comfy_table::Table;
use comfy_table::presets::ASCII_MARKDOWN;

use crate::error::ErrorReport;
use crate::model::ModelMetrics;
use crate::pool::{ExclusionReason, StockPool};
use crate::predictor::{
    CompareOutcome, CompareReport, Confidence, ForecastSummary, PredictionHistory, PredictionResult,
    Trend,
};
use crate::trainer::WalkForwardReport;

fn markdown_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(ASCII_MARKDOWN).set_header(header);
    table
}

fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

/// Single forecast with the model's recorded validation metrics
pub fn prediction_markdown(result: &PredictionResult) -> String {
    let mut table = markdown_table(vec!["metric", "value"]);
    for (name, value) in &result.metrics {
        table.add_row(vec![name.clone(), format!("{value:.4}")]);
    }
    format!(
        "## {} volatility forecast\n\n\
         Predicted annualised volatility over the next {} trading days: **{}** (as of {})\n\n\
         Model validation metrics:\n\n{table}\n",
        result.ts_code,
        result.days,
        percent(result.predicted_volatility),
        result.as_of_date,
    )
}

/// Side-by-side forecasts with the highest and lowest highlighted
pub fn compare_markdown(report: &CompareReport) -> String {
    let mut table = markdown_table(vec!["ts_code", "predicted volatility", "as of", "status"]);
    for (ts_code, outcome) in &report.results {
        match outcome {
            CompareOutcome::Prediction(p) => table.add_row(vec![
                ts_code.to_string(),
                percent(p.predicted_volatility),
                p.as_of_date.to_string(),
                "ok".to_string(),
            ]),
            CompareOutcome::Error(e) => table.add_row(vec![
                ts_code.to_string(),
                "-".to_string(),
                "-".to_string(),
                format!("[{}] {}", e.kind, e.message),
            ]),
        };
    }

    let mut out = format!("## Volatility comparison\n\n{table}\n");
    if let (Some(high), Some(low)) = (report.highest(), report.lowest()) {
        out.push_str(&format!(
            "\nHighest forecast: {} ({})\nLowest forecast: {} ({})\n",
            high.ts_code,
            percent(high.predicted_volatility),
            low.ts_code,
            percent(low.predicted_volatility),
        ));
    }
    out
}

/// Recent forecasts against the volatility that followed
pub fn history_markdown(history: &PredictionHistory) -> String {
    let mut table = markdown_table(vec!["reference date", "predicted", "actual", "abs error"]);
    for point in &history.points {
        let (actual, error) = match point.actual {
            Some(actual) => (percent(actual), percent((actual - point.predicted).abs())),
            None => ("pending".to_string(), "-".to_string()),
        };
        table.add_row(vec![
            point.reference_date.to_string(),
            percent(point.predicted),
            actual,
            error,
        ]);
    }

    let mut out = format!(
        "## {} recent forecasts ({} day horizon)\n\n{table}\n",
        history.ts_code, history.days
    );
    if let Some(mae) = history.mean_abs_error() {
        out.push_str(&format!("\nMean absolute error over realised points: {}\n", percent(mae)));
    }
    out
}

pub fn summary_markdown(summary: &ForecastSummary) -> String {
    let trend = match summary.trend {
        Trend::Rising => "rising",
        Trend::Falling => "falling",
        Trend::Stable => "stable",
        Trend::Unknown => "unknown",
    };
    let confidence = match summary.confidence {
        Confidence::High => "high",
        Confidence::Medium => "medium",
        Confidence::Low => "low",
    };
    format!(
        "## {} volatility summary\n\n\
         - Current forecast: {} (as of {})\n\
         - Trend: {trend} over the last {} forecasts\n\
         - Model confidence: {confidence} (r2 {:.4})\n",
        summary.ts_code,
        percent(summary.predicted_volatility),
        summary.as_of_date,
        summary.forecasts,
        summary.r2,
    )
}

pub fn metrics_markdown(metrics: &ModelMetrics) -> String {
    let mut table = markdown_table(vec!["r2", "mae", "mse", "rmse", "samples"]);
    table.add_row(vec![
        format!("{:.4}", metrics.r2),
        format!("{:.4}", metrics.mae),
        format!("{:.6}", metrics.mse),
        format!("{:.4}", metrics.rmse),
        metrics.samples.to_string(),
    ]);
    table.to_string()
}

pub fn walk_forward_markdown(report: &WalkForwardReport) -> String {
    let mut table = markdown_table(vec!["fold", "split date", "train rows", "validation rows", "r2", "rmse"]);
    for (i, fold) in report.folds.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            fold.split_date.to_string(),
            fold.train_rows.to_string(),
            fold.validation_rows.to_string(),
            format!("{:.4}", fold.metrics.r2),
            format!("{:.4}", fold.metrics.rmse),
        ]);
    }
    table.add_row(vec![
        "mean".to_string(),
        "-".to_string(),
        "-".to_string(),
        report.mean.samples.to_string(),
        format!("{:.4}", report.mean.r2),
        format!("{:.4}", report.mean.rmse),
    ]);
    table.to_string()
}

pub fn pool_markdown(pool: &StockPool) -> String {
    let mut members = markdown_table(vec!["#", "ts_code", "weight"]);
    for (i, m) in pool.members.iter().enumerate() {
        members.add_row(vec![(i + 1).to_string(), m.ts_code.to_string(), format!("{:.3}", m.weight)]);
    }
    let mut out = format!(
        "## Stock pool {} as of {}\n\n{members}\n",
        pool.index_code, pool.as_of
    );

    if !pool.exclusions.is_empty() {
        let mut excluded = markdown_table(vec!["ts_code", "reason"]);
        for e in &pool.exclusions {
            excluded.add_row(vec![e.ts_code.to_string(), describe_exclusion(&e.reason)]);
        }
        out.push_str(&format!("\nExcluded:\n\n{excluded}\n"));
    }
    out
}

fn describe_exclusion(reason: &ExclusionReason) -> String {
    match reason {
        ExclusionReason::UnknownListing => "no listing record".to_string(),
        ExclusionReason::UnknownListDate => "listing date unknown".to_string(),
        ExclusionReason::NotListed { status } => format!("status {status:?}"),
        ExclusionReason::TooNew {
            list_date,
            listed_days,
        } => format!("listed {list_date} ({listed_days} days)"),
        ExclusionReason::Illiquid { avg_turnover } => {
            format!("average turnover {avg_turnover:.0}")
        }
        ExclusionReason::Stale {
            last_trade: Some(date),
        } => format!("last traded {date}"),
        ExclusionReason::Stale { last_trade: None } => "no recent trades".to_string(),
        ExclusionReason::FetchFailed { error } => error.to_string(),
    }
}

pub fn error_markdown(error: &ErrorReport) -> String {
    format!("**Error** ({}) {error}", error.kind)
}
