//! Read-through cache for completed/in-flight analyses, keyed by analysis id.
//!
//! Best-effort: every operation swallows its own Redis error after logging it.
//! A cache miss or failure always falls back to the database, never the caller.

use rand::Rng;
use redis::AsyncCommands;
use redis_utils::SharedConnectionManager;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::models::Analysis;

pub struct AnalysisCache {
    manager: SharedConnectionManager,
    ttl: Duration,
}

impl AnalysisCache {
    pub fn new(manager: SharedConnectionManager, ttl: Duration) -> Self {
        Self { manager, ttl }
    }

    fn key(id: Uuid) -> String {
        format!("analysis:{id}")
    }

    pub async fn get(&self, id: Uuid) -> Option<Analysis> {
        let mut conn = self.manager.lock().await;
        match conn.get::<_, Option<String>>(Self::key(id)).await {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, analysis_id = %id, "analysis cache get failed");
                None
            }
        }
    }

    pub async fn set(&self, analysis: &Analysis) {
        let Ok(json) = serde_json::to_string(analysis) else {
            return;
        };

        let ttl_secs = jittered_ttl_secs(self.ttl);
        let mut conn = self.manager.lock().await;
        if let Err(e) = conn
            .set_ex::<_, _, ()>(Self::key(analysis.id), json, ttl_secs)
            .await
        {
            warn!(error = %e, analysis_id = %analysis.id, "analysis cache set failed");
        }
    }

    pub async fn invalidate(&self, id: Uuid) {
        let mut conn = self.manager.lock().await;
        if let Err(e) = conn.del::<_, ()>(Self::key(id)).await {
            warn!(error = %e, analysis_id = %id, "analysis cache invalidate failed");
        }
    }
}

/// +/-10% jitter so a burst of identical completions doesn't expire in lockstep.
fn jittered_ttl_secs(base: Duration) -> u64 {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.9..1.1);
    ((base.as_secs() as f64) * factor).max(1.0) as u64
}
