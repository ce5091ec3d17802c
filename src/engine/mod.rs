mod alternatives;
mod availability;
mod error;
mod mutations;
mod queries;
mod slots;
mod store;
mod validator;
#[cfg(test)]
mod tests;

pub use alternatives::{horizon, rank_alternatives};
pub use availability::{free_windows, merge_busy};
pub use error::{EngineError, Rejection};
pub use slots::{align_up, generate_slots, SlotPolicy};
pub use store::{BookingStore, InMemoryStore, StoreError};
pub use validator::{validate_booking, Proposal};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;

/// Availability and booking engine for a set of service centers.
///
/// Reads go straight to the store. Booking writes for one center are
/// serialized so the validator always sees the latest committed bookings.
pub struct Engine {
    store: Arc<dyn BookingStore>,
    config: EngineConfig,
    /// Per-center write lock held across validate + insert.
    write_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn BookingStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            write_locks: DashMap::new(),
        }
    }

    /// Engine over a fresh in-memory store.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(super) fn center_lock(&self, center_id: Ulid) -> Arc<Mutex<()>> {
        self.write_locks.entry(center_id).or_default().clone()
    }

    pub(super) fn require_center(&self, id: Ulid) -> Result<Center, EngineError> {
        self.store.get_center(&id).ok_or(EngineError::CenterNotFound(id))
    }

    pub(super) fn require_service(&self, id: Ulid) -> Result<Service, EngineError> {
        self.store.get_service(&id).ok_or(EngineError::ServiceNotFound(id))
    }
}
