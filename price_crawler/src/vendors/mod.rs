//! Vendor drivers
//!
//! The set of vendors is fixed at build time; [`Driver`] dispatches the
//! inventory protocol to the concrete implementation.

pub mod hcloud;
pub mod upcloud;

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::inventory::{Inventory, VendorContext};
use crawler_common::Row;

pub use hcloud::Hcloud;
pub use upcloud::Upcloud;

/// Every supported vendor id
pub const VENDOR_IDS: &[&str] = &[hcloud::VENDOR_ID, upcloud::VENDOR_ID];

pub enum Driver {
    Hcloud(Hcloud),
    Upcloud(Upcloud),
}

impl Driver {
    /// Build the driver for `vendor_id` with credentials from the environment
    pub fn from_env(vendor_id: &str, retry: &RetryConfig) -> Result<Self> {
        match vendor_id {
            hcloud::VENDOR_ID => Ok(Driver::Hcloud(Hcloud::from_env(retry)?)),
            upcloud::VENDOR_ID => Ok(Driver::Upcloud(Upcloud::from_env(retry)?)),
            other => Err(Error::UnknownVendor(other.to_string())),
        }
    }
}

macro_rules! delegate {
    ($($op:ident),+ $(,)?) => {
        $(
            async fn $op(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
                match self {
                    Driver::Hcloud(d) => d.$op(ctx).await,
                    Driver::Upcloud(d) => d.$op(ctx).await,
                }
            }
        )+
    };
}

impl Inventory for Driver {
    fn vendor_id(&self) -> &'static str {
        match self {
            Driver::Hcloud(d) => d.vendor_id(),
            Driver::Upcloud(d) => d.vendor_id(),
        }
    }

    fn vendor_row(&self) -> Row {
        match self {
            Driver::Hcloud(d) => d.vendor_row(),
            Driver::Upcloud(d) => d.vendor_row(),
        }
    }

    delegate!(
        compliance_frameworks,
        regions,
        zones,
        servers,
        server_prices,
        server_prices_spot,
        storages,
        storage_prices,
        traffic_prices,
        ipv4_prices,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_vendor_is_rejected() {
        match Driver::from_env("nosuchcloud", &RetryConfig::default()) {
            Err(Error::UnknownVendor(id)) => assert_eq!(id, "nosuchcloud"),
            Err(other) => panic!("Expected UnknownVendor, got: {other:?}"),
            Ok(_) => panic!("Expected an error"),
        }
    }

    #[test]
    fn vendor_ids_are_unique() {
        let mut ids = VENDOR_IDS.to_vec();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), VENDOR_IDS.len());
    }
}
