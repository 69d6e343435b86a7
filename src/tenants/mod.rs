//! Tenant allow-list kept in memory on every process.
//!
//! Reads are served from a local snapshot. Changes to the tenant table are
//! announced on an [`InvalidationBus`]; each process reloads from the
//! [`TenantDirectory`] when it hears one, and also when its snapshot goes
//! stale. Reload failures keep serving the last good set.

mod allow_list;
mod bus;
mod directory;
mod signal;

pub use allow_list::{
    RefreshOutcome, TenantAllowList, DEFAULT_INIT_DEADLINE, DEFAULT_REFRESH_DEADLINE,
    DEFAULT_STALENESS,
};
pub use bus::{InvalidationBus, MemoryBus, RedisBus, SignalStream};
pub use directory::{PgTenantDirectory, TenantDirectory};
pub use signal::{publish_refresh, spawn_listener, RefreshSignal, DEFAULT_CHANNEL, RECONNECT_BACKOFF};
