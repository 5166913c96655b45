//! Background job: roll over rate limits whose reset date has arrived.
//!
//! Runs hourly. A limit due today is reset once; the reset moves its
//! date a full period ahead, so later ticks the same day skip it.

use std::time::Duration;

use chrono::Utc;
use tokio::time;

use crate::registry::RateLimitLedger;

/// Spawn the background rollover task. Call this once at startup.
pub fn spawn(ledger: RateLimitLedger) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;
            run_once(&ledger).await;
        }
    });
}

async fn run_once(ledger: &RateLimitLedger) {
    match ledger.rollover_due(Utc::now().date_naive()).await {
        Ok(rolled) if !rolled.is_empty() => {
            tracing::info!(services = ?rolled, "rolled over rate limits");
        }
        Ok(_) => {}
        Err(e) => tracing::error!("rate limit rollover failed: {}", e),
    }
}
