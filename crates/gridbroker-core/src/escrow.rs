//! Escrow and wallet address collaborator interfaces.
//!
//! The escrow runs outside the core: it is called on well-defined lifecycle
//! edges (register on create, deployed on full success, canceled on delete)
//! and flips reservations from `Pay` to `Deploy` out-of-band through the
//! store. Callbacks are best-effort with at-least-once semantics; the
//! collaborator is responsible for idempotence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::reservation::Reservation;

/// Currency code accepted only when every referenced node is free to use.
pub const FREE_TFT: &str = "FreeTFT";

/// Payment details returned to the customer on create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerEscrowInformation {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub asset: String,
}

#[async_trait]
pub trait Escrow: Send + Sync {
    /// Register a freshly created reservation with the allowed currencies.
    async fn register_reservation(
        &self,
        reservation: &Reservation,
        supported_currencies: &[String],
    ) -> Result<CustomerEscrowInformation>;

    /// Notify that every workload of the reservation deployed successfully.
    async fn reservation_deployed(&self, reservation_id: i64) -> Result<()>;

    /// Notify that the reservation was canceled before completing.
    async fn reservation_canceled(&self, reservation_id: i64) -> Result<()>;
}

/// Escrow used when no payment network is configured.
pub struct DisabledEscrow;

#[async_trait]
impl Escrow for DisabledEscrow {
    async fn register_reservation(
        &self,
        reservation: &Reservation,
        _supported_currencies: &[String],
    ) -> Result<CustomerEscrowInformation> {
        debug!(id = reservation.id, "escrow disabled, skipping registration");
        Ok(CustomerEscrowInformation::default())
    }

    async fn reservation_deployed(&self, reservation_id: i64) -> Result<()> {
        debug!(id = reservation_id, "escrow disabled, skipping deployed notification");
        Ok(())
    }

    async fn reservation_canceled(&self, reservation_id: i64) -> Result<()> {
        debug!(id = reservation_id, "escrow disabled, skipping cancellation");
        Ok(())
    }
}

/// Outcome of validating one farmer wallet address.
#[derive(Debug)]
pub enum AddressCheck {
    Valid,
    /// The asset code is not handled by this validator; the address is
    /// skipped rather than rejected.
    UnsupportedAsset,
    Invalid(String),
}

/// Validates farmer wallet addresses for a declared asset.
pub trait AddressValidator: Send + Sync {
    fn check(&self, asset: &str, address: &str) -> AddressCheck;
}

/// Address validator for a configured payment network.
pub struct NetworkAddressValidator {
    assets: Vec<String>,
}

impl NetworkAddressValidator {
    pub fn new(assets: Vec<String>) -> Self {
        Self { assets }
    }
}

impl AddressValidator for NetworkAddressValidator {
    fn check(&self, asset: &str, address: &str) -> AddressCheck {
        if !self.assets.iter().any(|a| a == asset) {
            return AddressCheck::UnsupportedAsset;
        }
        if address.is_empty() {
            return AddressCheck::Invalid("empty wallet address".to_string());
        }
        AddressCheck::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_assets_are_skipped() {
        let validator = NetworkAddressValidator::new(vec!["TFT".to_string()]);
        assert!(matches!(
            validator.check("BTC", ""),
            AddressCheck::UnsupportedAsset
        ));
        assert!(matches!(
            validator.check("TFT", ""),
            AddressCheck::Invalid(_)
        ));
        assert!(matches!(
            validator.check("TFT", "GABC123"),
            AddressCheck::Valid
        ));
    }
}
