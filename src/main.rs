//! beegramd - the BeeGramm realtime messaging backend.

use beegramd::config::Config;
use beegramd::db::Database;
use beegramd::gateway::Gateway;
use beegramd::moderation::AuditSink;
use beegramd::pipeline::Pipeline;
use beegramd::rooms::RoomRegistry;
use beegramd::security::{IpAbuseTracker, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How often aged-out rate limit windows are swept.
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    beegramd::telemetry::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting beegramd");

    let db_path = config
        .database
        .as_ref()
        .map_or(":memory:", |db| db.path.as_str());
    let db = Database::new(db_path).await?;
    db.seed_defaults().await?;

    let tracker = Arc::new(IpAbuseTracker::new(db.clone()));
    tracker.load().await?;

    let limiter = Arc::new(RateLimiter::new(config.limits.clone()));
    {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        });
    }

    let rooms = Arc::new(RoomRegistry::new());
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        Arc::clone(&limiter),
        Arc::clone(&rooms),
    ));

    let audit = AuditSink::spawn(db.clone());
    let moderation = Arc::new(beegramd::moderation::ModerationEngine::new(
        db.clone(),
        Arc::clone(&rooms),
        audit,
        config.moderation.clone(),
    ));

    let gateway = Gateway::bind(
        config.listen.address,
        db,
        pipeline,
        moderation,
        rooms,
        limiter,
        tracker,
    )
    .await?;
    gateway.run().await
}
