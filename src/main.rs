use std::io::{self, BufReader};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use media_scrape::cli::Args;
use media_scrape::console::spawn_console;
use media_scrape::{HttpClient, ScrapeControl, Scraper, SessionOutcome};

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn spawn_interrupt_handler(control: ScrapeControl) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping after the current request...");
            control.stop();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.scrape_config().context("Invalid arguments")?;
    let options = args.session_options();

    let client = Arc::new(HttpClient::new(
        options.nav_timeout,
        options.ready_timeout,
        options.stall_timeout,
        args.proxy.as_deref(),
    )?);

    let captcha_mode = config.captcha_mode;
    let mut scraper = Scraper::new(client.clone(), client, options);
    let control = scraper.start(config)?;

    if captcha_mode {
        println!("CAPTCHA mode: type 'resume' once the start page or a detected CAPTCHA is cleared, 'stop' to abort");
    }
    spawn_console(BufReader::new(io::stdin()), control.clone());
    spawn_interrupt_handler(control);

    let state = scraper.wait().await;

    println!(
        "\nDone: {} found, {} downloaded, {} failed",
        state.items_found, state.items_downloaded, state.items_failed
    );

    match state.outcome {
        Some(SessionOutcome::Failed { reason }) => Err(anyhow!("Scrape failed: {}", reason)),
        _ => Ok(()),
    }
}
