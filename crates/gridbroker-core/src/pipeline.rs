//! Reservation lifecycle pipeline.
//!
//! Every reservation must be processed through the pipeline before any
//! action is taken on it, so callers always observe the correct state. The
//! pipeline is pure: it reads the clock it is given and performs no I/O.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::reservation::{NextAction, Reservation, SigningRequest, SigningSignature};

/// Computes the next lifecycle state of a reservation.
pub struct Pipeline {
    r: Reservation,
}

fn quorum_count(request: &SigningRequest, signatures: &[SigningSignature]) -> i64 {
    signatures
        .iter()
        .filter(|s| request.signers.contains(&s.tid))
        .count() as i64
}

impl Pipeline {
    pub fn new(r: Reservation) -> Self {
        Self { r }
    }

    /// Signature validation happens when a signature is added; here we only
    /// check that the required quorum has been reached.
    fn provision_signed(&self) -> bool {
        let request = &self.r.data_reservation.signing_request_provision;
        if request.quorum_min == 0 {
            return true;
        }
        quorum_count(request, &self.r.signatures_provision) >= request.quorum_min
    }

    fn delete_signed(&self) -> bool {
        let request = &self.r.data_reservation.signing_request_delete;
        if request.quorum_min == 0 {
            // a zero quorum means deletion can never be triggered by
            // signatures, only by expiry
            return false;
        }
        quorum_count(request, &self.r.signatures_delete) >= request.quorum_min
    }

    /// Returns the updated reservation and whether it changed from the input.
    pub fn next(mut self, now: DateTime<Utc>) -> (Reservation, bool) {
        if self.r.next_action.is_terminal() {
            return (self.r, false);
        }

        // once the reservation expiry is exceeded the reservation must be
        // deleted
        if self.r.expired(now) || self.delete_signed() {
            debug!(id = self.r.id, "expired or to be deleted");
            self.r.next_action = NextAction::Delete;
            return (self.r, true);
        }

        if now >= self.r.data_reservation.expiration_provisioning
            && !self.r.is_successfully_deployed()
        {
            debug!(id = self.r.id, "provision expiration reached and not fully provisioned");
            self.r.next_action = NextAction::Delete;
            return (self.r, true);
        }

        let mut current = self.r.next_action;
        let mut modified = false;
        loop {
            match self.r.next_action {
                NextAction::Create => {
                    debug!(id = self.r.id, "ready to sign");
                    self.r.next_action = NextAction::Sign;
                }
                NextAction::Sign => {
                    if self.provision_signed() {
                        debug!(id = self.r.id, "ready to pay");
                        self.r.next_action = NextAction::Pay;
                    }
                }
                NextAction::Pay => {
                    // blocks until the escrow moves us past this point
                    debug!(id = self.r.id, "awaiting reservation payment");
                }
                NextAction::Deploy => {
                    debug!(id = self.r.id, "deployed, nothing to do");
                }
                _ => {}
            }

            if current == self.r.next_action {
                break;
            }

            current = self.r.next_action;
            modified = true;
        }

        (self.r, modified)
    }
}
