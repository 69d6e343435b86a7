use anyhow::{anyhow, Result};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::TenantDirectory;

pub const DEFAULT_STALENESS: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REFRESH_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_INIT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Snapshot {
    ids: HashSet<Uuid>,
    ordered: Vec<Uuid>,
    last_updated: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call ran the refresh and loaded this many tenants.
    Refreshed(usize),
    /// Another call was already refreshing; this one waited for it.
    Joined,
    /// The load failed or timed out; the previous snapshot is kept.
    Failed,
}

type InFlightSlot = Mutex<Option<watch::Receiver<bool>>>;

/// Clears the in-flight slot and wakes joined callers on every exit path.
struct InFlight<'a> {
    slot: &'a InFlightSlot,
    done: watch::Sender<bool>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.done.send_replace(true);
    }
}

/// Process-local set of tenants allowed to use the API.
///
/// The id set and its ordered copy are swapped together under one write
/// lock. Whether a refresh is running is tracked under a separate mutex so
/// readers never contend with it.
pub struct TenantAllowList {
    directory: Arc<dyn TenantDirectory>,
    data: RwLock<Snapshot>,
    in_flight: InFlightSlot,
    staleness: Duration,
    refresh_deadline: Duration,
}

impl std::fmt::Debug for TenantAllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantAllowList")
            .field("staleness", &self.staleness)
            .field("refresh_deadline", &self.refresh_deadline)
            .finish_non_exhaustive()
    }
}

impl TenantAllowList {
    #[must_use]
    pub fn new(directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            directory,
            data: RwLock::new(Snapshot::default()),
            in_flight: Mutex::new(None),
            staleness: DEFAULT_STALENESS,
            refresh_deadline: DEFAULT_REFRESH_DEADLINE,
        }
    }

    #[must_use]
    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    #[must_use]
    pub fn with_refresh_deadline(mut self, deadline: Duration) -> Self {
        self.refresh_deadline = deadline;
        self
    }

    /// Initial load at startup. Unlike [`safe_refresh`](Self::safe_refresh)
    /// a failure here is returned, since there is no previous set to keep.
    ///
    /// # Errors
    /// Returns an error if the directory fails or exceeds the init deadline.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<usize> {
        let ids = tokio::time::timeout(DEFAULT_INIT_DEADLINE, self.directory.allowed_tenant_ids())
            .await
            .map_err(|_| anyhow!("Timed out loading allowed tenants"))??;
        let count = self.swap(ids);
        info!("Loaded {count} allowed tenants");
        Ok(count)
    }

    #[must_use]
    pub fn is_allowed(&self, tenant_id: Uuid) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .contains(&tenant_id)
    }

    /// Copy of the current ids. A stale cache schedules a background refresh
    /// and still answers immediately with what it has.
    #[must_use]
    pub fn snapshot(self: &Arc<Self>) -> Vec<Uuid> {
        let (ordered, stale) = {
            let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
            (data.ordered.clone(), self.is_stale(data.last_updated))
        };
        if stale {
            self.spawn_refresh();
        }
        ordered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn last_updated(&self) -> Option<Instant> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_updated
    }

    fn is_stale(&self, last_updated: Option<Instant>) -> bool {
        last_updated.map_or(true, |at| at.elapsed() >= self.staleness)
    }

    pub(super) fn spawn_refresh(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available for background tenant refresh");
            return;
        };
        let this = Arc::clone(self);
        handle.spawn(async move {
            this.safe_refresh().await;
        });
    }

    /// Reload from the directory unless a reload is already running, in
    /// which case wait for that one instead of starting another.
    #[instrument(skip(self))]
    pub async fn safe_refresh(&self) -> RefreshOutcome {
        let leader = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(running) => Err(running.clone()),
                None => {
                    let (done, running) = watch::channel(false);
                    *slot = Some(running);
                    Ok(done)
                }
            }
        };

        let done = match leader {
            Ok(done) => done,
            Err(mut running) => {
                debug!("Tenant refresh already in flight, joining");
                let _ = running.wait_for(|finished| *finished).await;
                return RefreshOutcome::Joined;
            }
        };
        let _in_flight = InFlight {
            slot: &self.in_flight,
            done,
        };

        match tokio::time::timeout(self.refresh_deadline, self.directory.allowed_tenant_ids()).await {
            Ok(Ok(ids)) => {
                let count = self.swap(ids);
                info!("Refreshed allowed tenants: {count}");
                RefreshOutcome::Refreshed(count)
            }
            Ok(Err(err)) => {
                warn!("Tenant refresh failed, keeping previous snapshot: {err:#}");
                RefreshOutcome::Failed
            }
            Err(_) => {
                warn!(
                    "Tenant refresh exceeded {:?}, keeping previous snapshot",
                    self.refresh_deadline
                );
                RefreshOutcome::Failed
            }
        }
    }

    fn swap(&self, ids: Vec<Uuid>) -> usize {
        let ids: HashSet<Uuid> = ids.into_iter().collect();
        let mut ordered: Vec<Uuid> = ids.iter().copied().collect();
        ordered.sort_unstable();
        let count = ordered.len();

        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *data = Snapshot {
            ids,
            ordered,
            last_updated: Some(Instant::now()),
        };
        count
    }
}
