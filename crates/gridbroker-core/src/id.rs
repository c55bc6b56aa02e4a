//! Workload identifiers.
//!
//! A workload is globally addressed as `<reservation_id>-<workload_id>`,
//! where the second part is the workload's own numeric id inside its
//! reservation.

use crate::error::{Error, Result};

/// Format the global id of a workload.
pub fn global_workload_id(reservation_id: i64, workload_id: i64) -> String {
    format!("{reservation_id}-{workload_id}")
}

/// Extract the reservation id part of a global workload id.
pub fn reservation_id_of(gwid: &str) -> Result<i64> {
    let rid = gwid.split('-').next().unwrap_or_default();
    rid.parse()
        .map_err(|_| Error::InvalidInput(format!("invalid workload id '{gwid}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let gwid = global_workload_id(42, 3);
        assert_eq!(gwid, "42-3");
        assert_eq!(reservation_id_of(&gwid).unwrap(), 42);
    }

    #[test]
    fn rejects_garbage() {
        assert!(reservation_id_of("not-a-number").is_err());
        assert!(reservation_id_of("").is_err());
    }
}
