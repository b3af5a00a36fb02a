use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod ai;
mod app;
mod config;
mod db;
mod dedup;
mod digest;
mod error;
mod models;
mod schedule;
mod services;

use app::App;
use config::Config;
use db::Repository;
use error::Result;

const USAGE: &str = "usage: newsletter-digest [--config <path>] [--once] [--force] [--send-pending] [--status]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    once: bool,
    force: bool,
    send_pending: bool,
    status: bool,
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--once" => args.once = true,
            "--force" => args.force = true,
            "--send-pending" => args.send_pending = true,
            "--status" => args.status = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument {}\n{}", other, USAGE)),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    let config = Config::load(args.config.as_deref())?;

    // Read-only, so it works without an API key.
    if args.status {
        let repository = Repository::open(
            &config.db_path,
            Duration::from_millis(config.database.busy_timeout_ms),
            config.database.retry_policy(),
        )
        .await?;
        print_status(&repository).await?;
        return Ok(());
    }

    let app = App::new(&config).await?;

    if args.send_pending {
        let outcomes = app.send_pending().await?;
        println!("Retried {} undelivered summaries", outcomes.len());
        for outcome in outcomes {
            println!("  {:?}", outcome);
        }
        return Ok(());
    }

    if args.once || args.force {
        app.fetch_cycle().await;
        app.delivery_cycle(args.force).await;
        return Ok(());
    }

    schedule::run(Arc::new(app), &config.schedule).await
}

async fn print_status(repository: &Repository) -> Result<()> {
    let counts = repository.status_counts().await?;
    println!("Content");
    println!("  pending:      {}", counts.pending_items);
    println!("  summarized:   {}", counts.summarized_items);
    println!("  suppressed:   {}", counts.suppressed_items);
    println!("Summaries");
    println!("  sent:         {}", counts.sent_summaries);
    println!("  retrying:     {}", counts.retryable_summaries);
    println!("  abandoned:    {}", counts.abandoned_summaries);
    println!("  failed:       {}", counts.failed_generations);
    println!("Fingerprints:   {}", counts.fingerprints);
    match counts.last_fetch {
        Some(at) => println!("Last fetch:     {}", at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")),
        None => println!("Last fetch:     never"),
    }
    Ok(())
}
