use tracing::info;

use feedpress::core::storage::repository::FeedRepository;
use feedpress::core::subscription;
use feedpress::logging;
use feedpress::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let config = Config::from_env();

    let repository = FeedRepository::connect(&config.database_url).await?;
    let summary = subscription::update_subscriptions(&repository, &config).await?;

    info!(
        feeds = summary.feeds,
        user_entries = summary.user_entries,
        "update_subscriptions finished"
    );
    Ok(())
}
