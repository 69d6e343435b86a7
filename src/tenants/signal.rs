use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{InvalidationBus, TenantAllowList};
use crate::store::StoreError;

pub const DEFAULT_CHANNEL: &str = "tenant_updated";
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

const REFRESH: &str = "refresh";

/// Wire payload on the invalidation channel: `{"type":"refresh","ts":...}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSignal {
    #[serde(rename = "type")]
    pub kind: String,
    pub ts: i64,
}

impl RefreshSignal {
    #[must_use]
    pub fn now() -> Self {
        Self {
            kind: REFRESH.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Decode a payload, ignoring anything that is not a refresh signal.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(payload)
            .ok()
            .filter(|signal| signal.kind == REFRESH)
    }
}

/// Tell every subscribed process to reload its allow-list.
///
/// # Errors
/// Returns an error if the payload cannot be encoded or published.
pub async fn publish_refresh(bus: &dyn InvalidationBus) -> Result<(), StoreError> {
    let payload = serde_json::to_vec(&RefreshSignal::now())?;
    bus.publish(&payload).await
}

/// Subscribe to the invalidation channel until `shutdown` flips to true or
/// its sender is dropped. Lost subscriptions are retried after `backoff`.
pub fn spawn_listener(
    allow_list: Arc<TenantAllowList>,
    bus: Arc<dyn InvalidationBus>,
    shutdown: watch::Receiver<bool>,
    backoff: Duration,
) -> JoinHandle<()> {
    tokio::spawn(listen(allow_list, bus, shutdown, backoff))
}

async fn listen(
    allow_list: Arc<TenantAllowList>,
    bus: Arc<dyn InvalidationBus>,
    mut shutdown: watch::Receiver<bool>,
    backoff: Duration,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match bus.subscribe().await {
            Ok(mut stream) => {
                info!("Subscribed to tenant invalidation channel");
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Tenant invalidation listener stopped");
                            return;
                        }
                        message = stream.next() => match message {
                            Some(Ok(payload)) => on_payload(&allow_list, &payload),
                            Some(Err(err)) => {
                                warn!("Tenant invalidation subscription failed: {err}");
                                break;
                            }
                            None => {
                                warn!("Tenant invalidation subscription closed");
                                break;
                            }
                        }
                    }
                }
            }
            Err(err) => warn!("Failed to subscribe to tenant invalidation channel: {err}"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(backoff) => debug!("Resubscribing to tenant invalidation channel"),
        }
    }
    info!("Tenant invalidation listener stopped");
}

fn on_payload(allow_list: &Arc<TenantAllowList>, payload: &[u8]) {
    if RefreshSignal::parse(payload).is_some() {
        debug!("Tenant refresh signal received");
        allow_list.spawn_refresh();
    } else {
        debug!("Ignoring unrecognised invalidation payload");
    }
}
