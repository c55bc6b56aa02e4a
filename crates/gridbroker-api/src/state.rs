//! Application state.

use std::sync::Arc;

use gridbroker_core::config::Config;
use gridbroker_core::escrow::{AddressValidator, Escrow, NetworkAddressValidator};
use gridbroker_db::{
    FarmStore, NodeStore, PgFarmStore, PgNodeStore, PgReservationStore, PgUserStore,
    PgWorkloadQueue, ReservationStore, UserStore, WorkloadQueue,
};
use sqlx::PgPool;

/// Shared application state.
///
/// Stores are held as trait objects so tests can swap in the in-memory
/// engine and a recording escrow.
#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<dyn ReservationStore>,
    pub queue: Arc<dyn WorkloadQueue>,
    pub users: Arc<dyn UserStore>,
    pub nodes: Arc<dyn NodeStore>,
    pub farms: Arc<dyn FarmStore>,
    pub escrow: Arc<dyn Escrow>,
    pub address_validator: Arc<dyn AddressValidator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, escrow: Arc<dyn Escrow>) -> Self {
        let address_validator = Arc::new(NetworkAddressValidator::new(config.assets.clone()));
        Self {
            reservations: Arc::new(PgReservationStore::new(pool.clone())),
            queue: Arc::new(PgWorkloadQueue::new(pool.clone())),
            users: Arc::new(PgUserStore::new(pool.clone())),
            nodes: Arc::new(PgNodeStore::new(pool.clone())),
            farms: Arc::new(PgFarmStore::new(pool)),
            escrow,
            address_validator,
            config: Arc::new(config),
        }
    }
}
