//! `pendingSpawns`: correlates concurrent spawn calls sharing a
//! `requestId` so exactly one Terminal is created (§4.C, invariant 3).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use tt_core::error::{Result, ServerError};
use tt_core::types::Terminal;

pub struct PendingSpawns {
    entries: DashMap<String, Arc<OnceCell<Terminal>>>,
}

impl PendingSpawns {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
        })
    }

    /// Run `work` at most once per `request_id` among however many
    /// concurrent callers arrive with it; all callers observe the same
    /// `Terminal` on success. The entry expires after `ttl` regardless of
    /// outcome, bounding memory for abandoned correlation ids.
    pub async fn dedup<F, Fut>(self: &Arc<Self>, request_id: &str, ttl: Duration, work: F) -> Result<Terminal>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Terminal>>,
    {
        let cell = self
            .entries
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let expiry = self.clone();
        let expiry_id = request_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            expiry.entries.remove(&expiry_id);
        });

        match cell.get_or_try_init(work).await {
            Ok(terminal) => Ok(terminal.clone()),
            Err(e) => {
                // Do not cache failures: a retried spawn with the same
                // requestId should get a fresh attempt, not a frozen error.
                self.entries.remove(request_id);
                Err(e)
            }
        }
    }
}
