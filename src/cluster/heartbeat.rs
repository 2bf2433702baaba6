use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::cluster::Cluster;
use crate::error::Result;

impl Cluster {
    /// Register the local member with the KV's service registry.
    pub(crate) async fn register_service(&self) -> Result<()> {
        self.kv
            .register_service(
                &self.config.member_id,
                &self.config.member_id,
                self.config.timings.heartbeat_ttl,
            )
            .await
    }

    /// Keep the local member's TTL check passing for the life of the
    /// cluster. Stops when the cluster's lifecycle token is cancelled.
    pub(crate) fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let cluster = Arc::clone(self);
        let token = self.lifecycle.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cluster.config.timings.heartbeat_interval);
            // The service was registered just now; skip the immediate tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Heartbeat loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        while let Err(err) = cluster.kv.pass_ttl(&cluster.config.member_id).await {
                            tracing::warn!(member_id = %cluster.config.member_id, error = %err, "TTL heartbeat failed");
                            tokio::select! {
                                _ = token.cancelled() => return,
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            }
                        }
                    }
                }
            }
        })
    }
}
