use std::{path::PathBuf, process, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use dining::{DinnerConfig, Sink, Table};

#[derive(Parser)]
#[command(name = "dining")]
#[command(version)]
#[command(about = "Chandy-Misra dining philosophers")]
struct Cli {
    /// TOML config file (CLI flags override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of philosophers around the ring
    #[arg(short = 'n', long)]
    philosophers: Option<usize>,

    /// Meals each philosopher eats
    #[arg(short = 'k', long)]
    portions: Option<usize>,

    /// Request slots per mailbox
    #[arg(long)]
    mailbox_capacity: Option<usize>,

    /// Upper bound of the random pause after each meal, in microseconds
    #[arg(long)]
    think_jitter_us: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<DinnerConfig> {
    let mut config = match &cli.config {
        Some(path) => DinnerConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DinnerConfig::default(),
    };

    if let Some(n) = cli.philosophers {
        config.philosophers = n;
        // -n を指定したら円卓にする
        config.table = None;
    }
    if let Some(k) = cli.portions {
        config.portions = k;
    }
    if let Some(c) = cli.mailbox_capacity {
        config.mailbox_capacity = c;
    }
    if let Some(us) = cli.think_jitter_us {
        config.think_jitter_us = us;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // イベント行は stdout、ログは stderr
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = load_config(&cli)?;
    let table = Table::from_config(&config).context("building the table")?;

    let sink = Arc::new(Sink::stdio());
    match table.serve(&config, sink) {
        Ok(report) => {
            for r in &report.philosophers {
                info!(
                    philosopher = %r.name,
                    meals = r.meals,
                    requests_sent = r.requests_sent,
                    requests_dropped = r.requests_dropped,
                    deferred = r.requests_deferred,
                    surrendered = r.surrendered,
                    iterations = r.iterations,
                    "summary"
                );
            }
            Ok(())
        }
        // 診断メッセージは serve が sink 経由で出している
        Err(e) => {
            error!(error = %e, "dinner failed");
            process::exit(1)
        }
    }
}
