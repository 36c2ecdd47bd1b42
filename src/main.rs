mod category;
mod config;
mod error;
mod models;
mod pipeline;
mod scraper;
mod sink;
mod utils;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::models::CategoryDef;
use crate::pipeline::Pipeline;
use crate::scraper::ReqwestTransport;
use crate::scraper::session::SessionManager;

#[derive(Parser)]
#[command(name = "msisdn-harvester", about = "Mega24 number-search harvester", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every configured prefix to CSV files
    Run,

    /// Print the flattened category filter with known tariffs
    Categories,

    /// Bootstrap a session and print the composed cookie
    Session,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "msisdn_harvester=info,warn",
        1 => "msisdn_harvester=debug,info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .with_target(false)
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let _t = utils::Timer::start("Harvest run");

            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = Arc::clone(&cancel);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received — stopping after the current page");
                        cancel.store(true, Ordering::Relaxed);
                    }
                });
            }

            let stats = Pipeline::new(config).run(cancel).await?;
            info!(
                "Done: {} prefixes, {} pages, {} rows, {} errors",
                stats.prefixes_processed,
                stats.pages_fetched,
                utils::fmt_number(stats.rows_written as i64),
                stats.errors
            );
        }

        Command::Categories => {
            let index = category::build(&config.categories)
                .context("category tree in config is invalid")?;

            println!("filter: {} ids (request order)", index.id_set.len());
            print_tree(&config.categories, &index, 0);
        }

        Command::Session => {
            let transport = Arc::new(ReqwestTransport::new(&config.search)?);
            let session = SessionManager::new(transport, &config.search.base_url);
            session.refresh().await.context("session bootstrap failed")?;
            println!("{}", session.current().await?);
        }
    }

    Ok(())
}

fn print_tree(defs: &[CategoryDef], index: &category::CategoryIndex, depth: usize) {
    for def in defs {
        let price = index
            .price(def.id)
            .map(|p| utils::fmt_number(p as i64))
            .unwrap_or_else(|| "—".to_string());
        println!("{}{:>4}  {:<12} {}", "  ".repeat(depth + 1), def.id, def.name, price);
        print_tree(&def.items, index, depth + 1);
    }
}
