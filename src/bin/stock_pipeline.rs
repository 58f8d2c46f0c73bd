use stock_pipeline::config::{ConfigSource, PipelineConfig, DEFAULT_CONFIG_FILE};
use stock_pipeline::data_provider::{coverage, DatasetStore};
use stock_pipeline::services::{LiveRunner, Pipeline, Scheduler, TickOutcome};
use stock_pipeline::util::new_run_id;

use anyhow::{bail, Context};
use clap::{App, Arg, ArgMatches, SubCommand};
use chrono::Utc;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn config_path(matches: &ArgMatches) -> PathBuf {
    let value = matches
        .subcommand()
        .and_then(|(_, sub)| sub.value_of("config"))
        .or_else(|| matches.value_of("config"));
    PathBuf::from(value.unwrap_or(DEFAULT_CONFIG_FILE))
}

/// 读取配置文件，不存在时使用默认配置
fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    if path.exists() {
        PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        warn!("{} not found, using built-in defaults", path.display());
        Ok(PipelineConfig::default())
    }
}

/// 命令行参数覆盖配置
fn apply_overrides(mut config: PipelineConfig, matches: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    if let Some(symbols) = matches.value_of("symbols") {
        let symbols: Vec<String> = symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        config = config.with_symbols(symbols);
    }
    if let Some(dir) = matches.value_of("data-dir") {
        config = config.with_data_dir(dir);
    }
    if let Some(dir) = matches.value_of("output-dir") {
        config = config.with_output_dir(dir);
    }
    if let Some(days) = matches.value_of("lookback-days") {
        let days = days.parse::<u32>().with_context(|| format!("invalid --lookback-days {}", days))?;
        config = config.with_lookback_days(days);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn override_args<'a>(cmd: App<'a>) -> App<'a> {
    cmd.arg(
        Arg::with_name("symbols")
            .short('s')
            .long("symbols")
            .value_name("SYMBOLS")
            .help("Comma separated symbols, replaces the configured list")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("data-dir")
            .long("data-dir")
            .value_name("DIR")
            .help("Directory for the persisted dataset and analysis")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("output-dir")
            .long("output-dir")
            .value_name("DIR")
            .help("Directory for report artifacts")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("lookback-days")
            .long("lookback-days")
            .value_name("DAYS")
            .help("History window in days")
            .takes_value(true),
    )
}

async fn run_once(config: PipelineConfig) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config).context("building pipeline")?;
    let run_id = new_run_id(Utc::now());
    match pipeline.run_as(&run_id).await {
        Ok(summary) => {
            info!(
                "Run {} ok: {} symbols, {} records dropped, {} values imputed, {} outliers",
                summary.run_id,
                summary.symbols.len(),
                summary.clean.dropped_records,
                summary.clean.imputed_values,
                summary.clean.outliers
            );
            for path in &summary.artifacts {
                info!("  artifact: {}", path.display());
            }
            Ok(())
        }
        Err(e) => {
            if pipeline.config().schedule.notify_on_failure {
                pipeline.notify_failure(&run_id, &e).await;
            }
            Err(e).with_context(|| format!("run {} failed", run_id))
        }
    }
}

async fn schedule(matches: &ArgMatches, path: PathBuf) -> anyhow::Result<()> {
    let source = if path.exists() {
        ConfigSource::File(path)
    } else {
        warn!("{} not found, scheduling with built-in defaults", path.display());
        ConfigSource::Fixed(PipelineConfig::default())
    };
    let scheduler = Arc::new(Scheduler::new(source, Arc::new(LiveRunner)).context("loading configuration")?);

    if matches.is_present("once") {
        return match scheduler.try_run_once().await {
            TickOutcome::Failed { attempts, error } => bail!("run failed after {} attempt(s): {}", attempts, error),
            _ => Ok(()),
        };
    }

    info!("Scheduler started: {}", scheduler.current_config().schedule.cadence.describe());
    scheduler
        .run_forever(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("scheduler stopped")?;
    info!("Scheduler stopped");
    Ok(())
}

/// `--limit`，缺省为 10
fn parse_limit(value: Option<&str>) -> anyhow::Result<usize> {
    let value = value.unwrap_or("10");
    value
        .parse::<usize>()
        .with_context(|| format!("invalid --limit {}", value))
}

fn explore(matches: &ArgMatches, config: &PipelineConfig) -> anyhow::Result<()> {
    let symbol_filter = matches.value_of("symbol").map(|s| s.trim().to_uppercase());
    let limit = parse_limit(matches.value_of("limit"))?;

    let store = DatasetStore::from_config(config);
    let Some(latest) = store.load_latest().context("reading stored run")? else {
        info!("No stored dataset in {}", store.data_dir().display());
        return Ok(());
    };
    let dataset = &latest.dataset;
    let window = dataset.window();
    info!(
        "Run {} ({} records, {} to {})",
        dataset.run_id(),
        dataset.len(),
        window.start.format("%Y-%m-%d"),
        window.end.format("%Y-%m-%d")
    );
    if !latest.is_consistent() {
        warn!("Stored analysis does not belong to this dataset");
    }

    info!("{:-<72}", "");
    info!(
        "{:<8} {:>7} {:<12} {:<12} {:>10} {:>9} {:>8}",
        "Symbol", "Records", "First", "Last", "Close", "Change", "Cluster"
    );
    info!("{:-<72}", "");
    for c in coverage(dataset) {
        if symbol_filter.as_deref().map_or(false, |f| !c.symbol.contains(f)) {
            continue;
        }
        let stats = latest.analysis.as_ref().and_then(|a| a.stats.get(&c.symbol));
        let cluster = latest.analysis.as_ref().and_then(|a| a.clusters.get(&c.symbol));
        info!(
            "{:<8} {:>7} {:<12} {:<12} {:>10} {:>9} {:>8}",
            c.symbol,
            c.records,
            c.first.format("%Y-%m-%d"),
            c.last.format("%Y-%m-%d"),
            c.last_close.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into()),
            stats
                .and_then(|s| s.change_percent)
                .map(|v| format!("{:+.2}%", v))
                .unwrap_or_else(|| "-".into()),
            cluster.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        );
    }

    if let Some(symbol) = &symbol_filter {
        let series = dataset.series(symbol);
        if series.is_empty() {
            info!("No records for {}", symbol);
            return Ok(());
        }
        info!("");
        info!(
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>12}",
            "Timestamp", "Open", "High", "Low", "Close", "Volume"
        );
        let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
        for r in series.iter().rev().take(limit) {
            info!(
                "{:<20} {:>10} {:>10} {:>10} {:>10} {:>12}{}",
                r.timestamp.format("%Y-%m-%d %H:%M"),
                fmt(r.open),
                fmt(r.high),
                fmt(r.low),
                fmt(r.close),
                r.volume.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                if r.outlier { "  outlier" } else { "" }
            );
        }
        if series.len() > limit {
            info!("... and {} more records", series.len() - limit);
        }
    }
    Ok(())
}

fn init_config(matches: &ArgMatches, path: &Path) -> anyhow::Result<()> {
    if path.exists() && !matches.is_present("force") {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let text = PipelineConfig::default().to_toml().context("serializing default configuration")?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = App::new("stock_pipeline")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scheduled stock data scraping, cleaning, analysis and reporting")
        .arg(
            Arg::with_name("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the TOML configuration")
                .takes_value(true)
                .global(true),
        )
        .subcommand(override_args(
            SubCommand::with_name("run").about("Run the pipeline once and exit"),
        ))
        .subcommand(
            SubCommand::with_name("schedule")
                .about("Run the pipeline on the configured cadence until Ctrl-C")
                .arg(
                    Arg::with_name("once")
                        .long("once")
                        .help("Run a single scheduled tick (with retries) and exit")
                        .takes_value(false),
                ),
        )
        .subcommand(
            SubCommand::with_name("explore")
                .about("Show the latest stored dataset and analysis")
                .arg(
                    Arg::with_name("symbol")
                        .short('s')
                        .long("symbol")
                        .value_name("SYMBOL")
                        .help("Only show this symbol, with its latest records")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("limit")
                        .short('l')
                        .long("limit")
                        .value_name("LIMIT")
                        .help("Limit the number of records to display")
                        .takes_value(true)
                        .default_value("10"),
                )
                .arg(
                    Arg::with_name("data-dir")
                        .long("data-dir")
                        .value_name("DIR")
                        .help("Directory holding the persisted dataset")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("init-config")
                .about("Write a default configuration file")
                .arg(
                    Arg::with_name("force")
                        .short('f')
                        .long("force")
                        .help("Overwrite an existing file")
                        .takes_value(false),
                ),
        );

    let matches = app.get_matches();
    let path = config_path(&matches);

    match matches.subcommand() {
        Some(("run", sub)) => {
            let config = apply_overrides(load_config(&path)?, sub)?;
            run_once(config).await
        }
        Some(("schedule", sub)) => schedule(sub, path).await,
        Some(("explore", sub)) => {
            let mut config = load_config(&path)?;
            if let Some(dir) = sub.value_of("data-dir") {
                config = config.with_data_dir(dir);
            }
            explore(sub, &config)
        }
        Some(("init-config", sub)) => init_config(sub, &path),
        _ => {
            info!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_rejects_garbage() {
        assert_eq!(parse_limit(None).unwrap(), 10);
        assert_eq!(parse_limit(Some("25")).unwrap(), 25);
        let err = parse_limit(Some("ten")).unwrap_err();
        assert!(err.to_string().contains("invalid --limit ten"));
        assert!(parse_limit(Some("-1")).is_err());
    }
}
