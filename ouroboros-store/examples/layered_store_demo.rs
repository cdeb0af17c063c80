//! Layered Store Demo Application
//!
//! Opens a store, writes a small thread, then reads it back through the
//! cache layers and prints the cache counters.
//!
//! Usage:
//!   cargo run --example layered_store_demo
//!
//! Environment variables:
//!   OUROBOROS_SQL_DRIVER      - sqlite or postgres (default: sqlite)
//!   OUROBOROS_SQL_DATA_SOURCE - connection URL (default: sqlite://demo.db?mode=rwc)
//!   OUROBOROS_SQL_REPLICAS    - comma-separated read replica URLs

use ouroboros_store::{
    new_id, CachePolicy, Channel, ChannelMember, ChannelType, LayeredStore, Post, SearchParams,
    SqlSettings, StoreOptions,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut settings = SqlSettings::from_env()?;
    if settings.data_source.is_empty() {
        settings.data_source = "sqlite://demo.db?mode=rwc".to_string();
    }

    info!("=== Layered Store Demo ===");

    let store = match LayeredStore::open_sql(&settings, CachePolicy::default(), StoreOptions::default()).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    let team_id = new_id();
    let user_id = new_id();

    let channel = store
        .channels()
        .save(Channel::new(&team_id, "demo", ChannelType::Open))
        .await?;
    store
        .channels()
        .add_member(ChannelMember::new(&channel.id, &user_id))
        .await?;
    info!("Created channel {}", channel.id);

    let root = store
        .posts()
        .save(Post::new(&channel.id, &user_id, "Kicking off the #release thread"))
        .await?;
    store
        .posts()
        .save(Post::reply_to(&root, &user_id, "Changelog is ready"))
        .await?;

    let thread = store.posts().get(&root.id).await?;
    info!("Thread has {} posts", thread.len());

    // Second read is answered from memory
    for _ in 0..2 {
        let page = store.posts().get_posts(&channel.id, 0, 60, true).await?;
        info!("Channel page holds {} posts", page.len());
    }

    let etag = store.posts().get_etag(&channel.id, true).await?;
    info!("Channel etag: {}", etag);

    let hits = store
        .posts()
        .search(&team_id, &user_id, SearchParams::new("changelog"))
        .await?;
    info!("Search found {} posts", hits.len());

    for (cache, stats) in store.cache_stats() {
        info!(
            "{:<16} hits={} misses={} entries={} hit_rate={:.1}%",
            cache.as_str(),
            stats.hits,
            stats.misses,
            stats.entries,
            stats.hit_rate()
        );
    }

    store.close().await;
    info!("=== Demo Complete ===");
    Ok(())
}
