use clap::Parser;
use tracing::info;

use feedpress::core::storage::repository::FeedRepository;
use feedpress::core::sync;
use feedpress::logging;
use feedpress::Config;

/// Scan due feeds and ingest their new entries.
#[derive(Debug, Parser)]
#[command(name = "update_feeds", version)]
struct Args {
    /// Maximum number of feeds to scan in this batch.
    #[arg(long, default_value_t = sync::DEFAULT_BATCH_SIZE)]
    num: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init();
    let config = Config::from_env();

    let repository = FeedRepository::connect(&config.database_url).await?;
    let summary = sync::update_feeds(&repository, &config, args.num).await?;

    info!(
        scanned = summary.scanned,
        new_entries = summary.new_entries,
        "update_feeds finished"
    );
    Ok(())
}
