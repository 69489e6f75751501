//! Command-line interface for the macro regime engine
//!
//! # Usage
//!
//! ```bash
//! # Live data from FRED
//! export FRED_API_KEY="your-key"
//! macro-cli regime
//!
//! # Offline, from a fixture file, with a persistent cache
//! macro-cli --fixture fixture.json --cache ~/.cache/macro.json brief -o macro_briefing.md
//! ```

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use macro_regime::{
    CacheSettings, FredClient, FredSource, JsonFileStore, MacroService, MacroSnapshot, Metric,
    RegimeConfig, SeriesCache, SeriesSource, Signal, StaticSource, parse_regime,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "macro-cli")]
#[command(about = "Macro regime classification and cross-asset signals", long_about = None)]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache file (overrides MACRO_CACHE_PATH)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Serve series from a JSON fixture instead of FRED
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Rebuild the snapshot even if the cached one is fresh
    #[arg(long, global = true)]
    refresh: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current snapshot
    Snapshot {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify the current regime
    Regime {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the signal detectors
    Signals {
        /// Only list signals that fired
        #[arg(long)]
        fired: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render the markdown briefing
    Brief {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Read the regime label back from a briefing file
    ParseRegime {
        /// Markdown file
        file: PathBuf,
    },
}

fn load_config(args: &Args) -> anyhow::Result<RegimeConfig> {
    let mut config = match &args.config {
        Some(path) => RegimeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RegimeConfig::default(),
    }
    .with_env();

    if let Some(cache) = &args.cache {
        config.cache_path = Some(cache.clone());
    }
    Ok(config)
}

fn build_source(args: &Args, config: &RegimeConfig) -> anyhow::Result<Arc<dyn SeriesSource>> {
    if let Some(path) = &args.fixture {
        info!("Serving series from fixture {}", path.display());
        let source = StaticSource::from_json_file(path)
            .with_context(|| format!("loading fixture {}", path.display()))?;
        return Ok(Arc::new(source));
    }

    let Some(key) = &config.fred_api_key else {
        bail!("FRED_API_KEY is not set; export it or pass --fixture");
    };
    Ok(Arc::new(FredSource::new(FredClient::new(key.clone(), None))))
}

async fn build_service(args: &Args) -> anyhow::Result<MacroService> {
    let config = Arc::new(load_config(args)?);
    let source = build_source(args, &config)?;

    let cache = match &config.cache_path {
        Some(path) => {
            info!("Using cache file {}", path.display());
            SeriesCache::open(
                CacheSettings::from(&*config),
                Arc::new(config.session),
                Arc::new(JsonFileStore::new(path)),
            )
            .await
        }
        None => SeriesCache::from_config(&config),
    };

    Ok(MacroService::new(source, cache, config)?)
}

fn format_metric(metric: &Metric) -> String {
    match metric {
        Metric::Available(v) => format!("{v:.2}"),
        Metric::Unavailable(reason) => format!("n/a ({reason})"),
    }
}

fn print_snapshot(snapshot: &MacroSnapshot) {
    println!("Snapshot at {}", snapshot.timestamp().format("%Y-%m-%d %H:%M UTC"));
    println!();
    for (series, metric) in snapshot.raw() {
        println!("  {:<20} {}", series.label(), format_metric(metric));
    }
    println!();
    for (field, metric) in snapshot.derived() {
        println!("  {:<20} {}", field.label(), format_metric(metric));
    }
    if let Some(previous) = snapshot.previous() {
        println!();
        println!("Previous snapshot: {}", previous.timestamp().format("%Y-%m-%d %H:%M UTC"));
    }
}

fn print_signals(signals: &[&Signal]) {
    for signal in signals {
        let status = match (signal.fired, signal.strength) {
            (true, _) => "FIRED",
            (false, Some(_)) => "quiet",
            (false, None) => "n/a",
        };
        let strength = signal
            .strength
            .map_or_else(|| "-".to_string(), |s| format!("{s:.2}"));
        println!("  [{status:<5}] {:<24} strength {strength}", signal.label);
        if let Some(note) = &signal.note {
            println!("          {note}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    if args.json_logs {
        macro_utils::init_json_tracing();
    } else {
        macro_utils::init_tracing();
    }

    if let Command::ParseRegime { file } = &args.command {
        let markdown = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        match parse_regime(&markdown) {
            Some(label) => println!("{label}"),
            None => bail!("no regime line found in {}", file.display()),
        }
        return Ok(());
    }

    let service = build_service(&args).await?;
    let snapshot = if args.refresh {
        service.refresh_snapshot().await?
    } else {
        service.get_current_snapshot().await?
    };

    match &args.command {
        Command::Snapshot { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Command::Regime { json } => {
            let assessment = service.classify(&snapshot)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&assessment)?);
            } else {
                println!(
                    "Regime: {} (position multiplier {:.2}) via {}",
                    assessment.label, assessment.position_multiplier, assessment.matched_rule
                );
                for skipped in &assessment.skipped_rules {
                    let fields: Vec<String> =
                        skipped.unavailable.iter().map(ToString::to_string).collect();
                    println!("  skipped {}: {} unavailable", skipped.rule, fields.join(", "));
                }
            }
        }
        Command::Signals { fired, json } => {
            let signals = service.detect(&snapshot);
            let shown: Vec<&Signal> = if *fired {
                macro_regime::fired_only(&signals)
            } else {
                signals.iter().collect()
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                print_signals(&shown);
            }
        }
        Command::Brief { output } => {
            let assessment = service.classify(&snapshot)?;
            let signals = service.detect(&snapshot);
            let markdown = macro_regime::render_briefing(&snapshot, &assessment, &signals)?;
            match output {
                Some(path) => {
                    std::fs::write(path, &markdown)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Briefing written to {}", path.display());
                }
                None => print!("{markdown}"),
            }
        }
        Command::ParseRegime { .. } => {}
    }

    Ok(())
}
