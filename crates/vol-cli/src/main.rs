//! Command-line interface for the volatility forecasting pipeline

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use vol_forecast::series::parse_date;
use vol_forecast::trainer::{holdout_dates, split_date_for_ratio};
use vol_forecast::{
    DatasetAssembler, ForecastConfig, MarketDataClient, ModelArtifact, ModelTrainer, StockPoolBuilder,
    TrainerConfig, TrainingTable, TsCode, VolatilityPredictor, report,
};
use vol_utils::{Settings, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "volforecast")]
#[command(about = "Forecast stock volatility from A-share market data", long_about = None)]
struct Cli {
    /// Print JSON instead of markdown tables
    #[arg(long, global = true)]
    json: bool,

    /// Run as of this date (YYYYMMDD) instead of today
    #[arg(long, global = true, value_parser = parse_day)]
    as_of: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the stock pool from index constituents
    Pool {
        /// Index whose constituents are screened
        #[arg(long)]
        index: Option<String>,
        /// Write the pool as JSON to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Assemble a training table and fit a model
    Train {
        /// Where to write the model artifact
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        index: Option<String>,
        /// Years of history used for training
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(i64).range(1..))]
        years: i64,
        #[arg(long)]
        window_size: Option<usize>,
        #[arg(long)]
        days: Option<usize>,
        /// First validation date (YYYYMMDD)
        #[arg(long, value_parser = parse_day, conflicts_with = "train_ratio")]
        split_date: Option<NaiveDate>,
        /// Share of reference dates used for training
        #[arg(long)]
        train_ratio: Option<f64>,
        /// First date of a held-out test block (YYYYMMDD)
        #[arg(long, value_parser = parse_day, conflicts_with = "test_ratio")]
        test_date: Option<NaiveDate>,
        /// Share of the latest reference dates held out for testing
        #[arg(long)]
        test_ratio: Option<f64>,
        /// Also run walk-forward evaluation over this many folds
        #[arg(long)]
        folds: Option<usize>,
    },
    /// Forecast volatility for one ticker
    Predict {
        #[arg(long)]
        model: PathBuf,
        ts_code: TsCode,
        /// Horizon in trading days; the model's own when unset
        #[arg(long)]
        days: Option<usize>,
        #[arg(long)]
        window_size: Option<usize>,
        /// Also show forecasts for this many recent dates beside realised volatility
        #[arg(long)]
        history: Option<usize>,
    },
    /// Latest forecast with its recent trend and the model's confidence
    Summary {
        #[arg(long)]
        model: PathBuf,
        ts_code: TsCode,
        /// Recent forecasts the trend is computed over
        #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u64).range(1..))]
        forecasts: u64,
    },
    /// Forecast and rank several tickers
    Compare {
        #[arg(long)]
        model: PathBuf,
        #[arg(required = true)]
        ts_codes: Vec<TsCode>,
    },
}

fn parse_day(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;
    init_tracing(settings.log_format);

    let cli = Cli::parse();

    info!(app = %settings.app_name, environment = %settings.environment, "starting");

    let mut config = ForecastConfig::default().with_env();
    if let Some(as_of) = cli.as_of {
        config.as_of = Some(as_of);
        config.pool.as_of = Some(as_of);
    }
    config.validate()?;
    let client = Arc::new(MarketDataClient::from_config(Arc::new(config))?);

    match cli.command {
        Command::Pool { index, out } => run_pool(client, index, out.as_deref(), cli.json).await,
        Command::Train {
            model,
            index,
            years,
            window_size,
            days,
            split_date,
            train_ratio,
            test_date,
            test_ratio,
            folds,
        } => {
            let args = TrainArgs {
                index,
                years,
                window_size,
                days,
                split_date,
                train_ratio,
                test_date,
                test_ratio,
                folds,
            };
            run_train(client, &model, args, cli.json).await
        }
        Command::Predict {
            model,
            ts_code,
            days,
            window_size,
            history,
        } => {
            let artifact = Arc::new(ModelArtifact::load(&model)?);
            let days = days.unwrap_or(artifact.schema.days);
            let window_size = window_size.unwrap_or(artifact.schema.window_size);
            let predictor = VolatilityPredictor::new(artifact, client);
            let result = predictor.predict(&ts_code, days, window_size).await?;
            let Some(lookback) = history else {
                return emit(cli.json, &result, report::prediction_markdown);
            };

            let history = predictor.history(&ts_code, lookback).await?;
            if cli.json {
                let value = serde_json::json!({ "prediction": result, "history": history });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", report::prediction_markdown(&result));
                println!("{}", report::history_markdown(&history));
            }
            Ok(())
        }
        Command::Summary {
            model,
            ts_code,
            forecasts,
        } => {
            let artifact = Arc::new(ModelArtifact::load(&model)?);
            let predictor = VolatilityPredictor::new(artifact, client);
            let summary = predictor.summary(&ts_code, forecasts as usize).await?;
            emit(cli.json, &summary, report::summary_markdown)
        }
        Command::Compare { model, ts_codes } => {
            let artifact = Arc::new(ModelArtifact::load(&model)?);
            let predictor = VolatilityPredictor::new(artifact, client);
            let comparison = predictor.compare(&ts_codes).await;
            emit(cli.json, &comparison, report::compare_markdown)
        }
    }
}

fn emit<T: Serialize>(json: bool, value: &T, render: impl Fn(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", render(value));
    }
    Ok(())
}

async fn run_pool(
    client: Arc<MarketDataClient>,
    index: Option<String>,
    out: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let mut filters = client.config().pool.clone();
    if let Some(index) = index {
        filters.index_code = index;
    }

    let pool = StockPoolBuilder::new(client).build_pool(&filters).await?;
    if let Some(out) = out {
        pool.save(out)?;
        info!(path = %out.display(), members = pool.len(), "stock pool written");
    }
    emit(json, &pool, report::pool_markdown)
}

struct TrainArgs {
    index: Option<String>,
    years: i64,
    window_size: Option<usize>,
    days: Option<usize>,
    split_date: Option<NaiveDate>,
    train_ratio: Option<f64>,
    test_date: Option<NaiveDate>,
    test_ratio: Option<f64>,
    folds: Option<usize>,
}

/// Validation split and optional test start, from explicit dates or the ratios
fn resolve_split(
    table: &TrainingTable,
    args: &TrainArgs,
    config: &TrainerConfig,
) -> anyhow::Result<(NaiveDate, Option<NaiveDate>)> {
    match (args.test_date, config.test_ratio) {
        (None, Some(test_ratio)) => {
            let (split_date, test_start) = holdout_dates(table, config.train_ratio, test_ratio)?;
            Ok((args.split_date.unwrap_or(split_date), Some(test_start)))
        }
        (test_date, _) => {
            let split_date = match args.split_date {
                Some(date) => date,
                None => split_date_for_ratio(table, config.train_ratio)?,
            };
            Ok((split_date, test_date))
        }
    }
}

async fn run_train(
    client: Arc<MarketDataClient>,
    model: &Path,
    args: TrainArgs,
    json: bool,
) -> anyhow::Result<()> {
    let config = client.config();
    let window_size = args.window_size.unwrap_or(config.window_size);
    let days = args.days.unwrap_or(config.days);

    let mut filters = config.pool.clone();
    if let Some(index) = &args.index {
        filters.index_code.clone_from(index);
    }
    let mut trainer_config = config.trainer.clone();
    if let Some(ratio) = args.train_ratio {
        trainer_config.train_ratio = ratio;
    }
    if args.test_ratio.is_some() {
        trainer_config.test_ratio = args.test_ratio;
    }

    let pool = StockPoolBuilder::new(Arc::clone(&client))
        .build_pool(&filters)
        .await?;
    if pool.is_empty() {
        anyhow::bail!("stock pool for {} is empty on {}", pool.index_code, pool.as_of);
    }

    let end = pool.as_of;
    let start = end
        .checked_sub_signed(TimeDelta::days(args.years * 365))
        .unwrap_or(NaiveDate::MIN);
    let assembly = DatasetAssembler::new(client)
        .assemble(&pool.tickers(), window_size, days, (start, end))
        .await?;

    let (split_date, test_start) = resolve_split(&assembly.table, &args, &trainer_config)?;
    let trainer = ModelTrainer::new(trainer_config);
    let outcome = trainer.train_with_holdout(&assembly.table, split_date, test_start)?;
    let walk_forward = args
        .folds
        .map(|folds| trainer.walk_forward(&assembly.table, folds))
        .transpose()?;

    outcome.artifact.save(model)?;

    if json {
        let summary = serde_json::json!({
            "model": model.display().to_string(),
            "window_size": window_size,
            "days": days,
            "split_date": split_date,
            "test_start": test_start,
            "metrics": outcome.metrics,
            "test_metrics": outcome.test_metrics,
            "row_counts": assembly.row_counts,
            "failures": assembly.failures,
            "walk_forward": walk_forward,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "## Model saved to {}\n\nwindow_size {window_size}, days {days}, split {split_date}, {} training rows, {} validation rows\n",
        model.display(),
        outcome.artifact.train_rows,
        outcome.artifact.validation_rows,
    );
    println!("Validation metrics:\n\n{}\n", report::metrics_markdown(&outcome.metrics));
    if let (Some(test_start), Some(test_metrics)) = (test_start, &outcome.test_metrics) {
        println!(
            "Test metrics from {test_start} ({} rows):\n\n{}\n",
            outcome.artifact.test_rows,
            report::metrics_markdown(test_metrics)
        );
    }
    for failure in &assembly.failures {
        println!("{}", report::error_markdown(failure));
    }
    if let Some(walk_forward) = walk_forward {
        println!("\nWalk-forward evaluation:\n\n{}", report::walk_forward_markdown(&walk_forward));
    }
    Ok(())
}
