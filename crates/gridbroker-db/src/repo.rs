//! Repository traits and implementations.

pub mod directory;
pub mod queue;
pub mod reservation;
pub mod user;

pub use directory::{FarmStore, NodeStore, PgFarmStore, PgNodeStore};
pub use queue::{PgWorkloadQueue, WorkloadQueue};
pub use reservation::{
    Page, PgReservationStore, ReservationFilter, ReservationStore, SignatureKind,
};
pub use user::{PgUserStore, UserFilter, UserStore};
