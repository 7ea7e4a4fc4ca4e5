//! Vendor inventory protocol
//!
//! Every vendor driver implements the same fixed set of inventory operations.
//! Each operation returns row-dicts for exactly one target table and is called
//! once per pull, in [`InventoryOp::ORDER`].

use crate::cache::RecordCache;
use crate::error::Result;
use crate::insert::Scope;
use crate::progress::ProgressTracker;
use crawler_common::catalog::{
    IPV4_PRICE, REGION, SERVER, SERVER_PRICE, STORAGE, STORAGE_PRICE, TRAFFIC_PRICE,
    VENDOR_COMPLIANCE_LINK, ZONE,
};
use crawler_common::fields::Allocation;
use crawler_common::{Row, TableDef};
use std::collections::HashMap;

/// One inventory operation of a vendor driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryOp {
    ComplianceFrameworks,
    Regions,
    Zones,
    Servers,
    ServerPrices,
    ServerPricesSpot,
    Storages,
    StoragePrices,
    TrafficPrices,
    Ipv4Prices,
}

impl InventoryOp {
    /// The order operations are always called in
    pub const ORDER: [InventoryOp; 10] = [
        InventoryOp::ComplianceFrameworks,
        InventoryOp::Regions,
        InventoryOp::Zones,
        InventoryOp::Servers,
        InventoryOp::ServerPrices,
        InventoryOp::ServerPricesSpot,
        InventoryOp::Storages,
        InventoryOp::StoragePrices,
        InventoryOp::TrafficPrices,
        InventoryOp::Ipv4Prices,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InventoryOp::ComplianceFrameworks => "compliance_frameworks",
            InventoryOp::Regions => "regions",
            InventoryOp::Zones => "zones",
            InventoryOp::Servers => "servers",
            InventoryOp::ServerPrices => "server_prices",
            InventoryOp::ServerPricesSpot => "server_prices_spot",
            InventoryOp::Storages => "storages",
            InventoryOp::StoragePrices => "storage_prices",
            InventoryOp::TrafficPrices => "traffic_prices",
            InventoryOp::Ipv4Prices => "ipv4_prices",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ORDER.into_iter().find(|op| op.name() == name)
    }

    /// Table the operation's rows are written to
    pub fn table(&self) -> &'static TableDef {
        match self {
            InventoryOp::ComplianceFrameworks => &VENDOR_COMPLIANCE_LINK,
            InventoryOp::Regions => &REGION,
            InventoryOp::Zones => &ZONE,
            InventoryOp::Servers => &SERVER,
            InventoryOp::ServerPrices | InventoryOp::ServerPricesSpot => &SERVER_PRICE,
            InventoryOp::Storages => &STORAGE,
            InventoryOp::StoragePrices => &STORAGE_PRICE,
            InventoryOp::TrafficPrices => &TRAFFIC_PRICE,
            InventoryOp::Ipv4Prices => &IPV4_PRICE,
        }
    }

    /// Rows this operation owns; rows in scope it does not return become inactive
    pub fn scope(&self, vendor_id: &str) -> Scope {
        let scope = Scope::vendor(vendor_id);
        match self {
            InventoryOp::ServerPrices => scope.and_not_equals("allocation", Allocation::Spot.as_str()),
            InventoryOp::ServerPricesSpot => scope.and_equals("allocation", Allocation::Spot.as_str()),
            _ => scope,
        }
    }
}

impl std::fmt::Display for InventoryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything an inventory operation may use besides the driver itself.
///
/// Owned by the pull for the duration of one vendor.
pub struct VendorContext {
    pub vendor_id: String,
    pub cache: RecordCache,
    pub progress: ProgressTracker,
    /// Active rows of this vendor, per table, as stored after earlier operations
    stored: HashMap<&'static str, Vec<Row>>,
}

impl VendorContext {
    pub fn new(vendor_id: &str, cache: RecordCache) -> Self {
        Self {
            vendor_id: vendor_id.to_string(),
            cache,
            progress: ProgressTracker::new(vendor_id),
            stored: HashMap::new(),
        }
    }

    /// Rows of `table` written by earlier operations of this pull
    pub fn rows(&self, table: &str) -> &[Row] {
        self.stored.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&mut self, table: &'static str, rows: Vec<Row>) {
        self.stored.insert(table, rows);
    }
}

/// The capability set every vendor driver provides
#[allow(async_fn_in_trait)]
pub trait Inventory {
    fn vendor_id(&self) -> &'static str;

    /// Static vendor metadata written before any operation runs
    fn vendor_row(&self) -> Row;

    async fn compliance_frameworks(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn regions(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn zones(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn servers(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn server_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn server_prices_spot(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn storages(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn storage_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn traffic_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>>;
    async fn ipv4_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>>;

    /// Dispatch a single operation
    async fn run(&self, op: InventoryOp, ctx: &VendorContext) -> Result<Vec<Row>> {
        match op {
            InventoryOp::ComplianceFrameworks => self.compliance_frameworks(ctx).await,
            InventoryOp::Regions => self.regions(ctx).await,
            InventoryOp::Zones => self.zones(ctx).await,
            InventoryOp::Servers => self.servers(ctx).await,
            InventoryOp::ServerPrices => self.server_prices(ctx).await,
            InventoryOp::ServerPricesSpot => self.server_prices_spot(ctx).await,
            InventoryOp::Storages => self.storages(ctx).await,
            InventoryOp::StoragePrices => self.storage_prices(ctx).await,
            InventoryOp::TrafficPrices => self.traffic_prices(ctx).await,
            InventoryOp::Ipv4Prices => self.ipv4_prices(ctx).await,
        }
    }
}
