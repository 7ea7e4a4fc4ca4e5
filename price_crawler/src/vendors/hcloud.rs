//! Hetzner Cloud driver
//!
//! Regions are Hetzner locations and zones are their datacenters. Server types
//! carry their per-location prices, so servers and server prices come from the
//! same (cached) listing. Prices are net, in euros.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::http::{ApiClient, Auth};
use crate::inventory::{Inventory, VendorContext};
use crate::lookup::compliance_links;
use crawler_common::fields::{
    Allocation, CpuAllocation, CpuArchitecture, PriceUnit, StorageType, TrafficDirection,
};
use crawler_common::row::row_from_json;
use crawler_common::Row;
use serde::Deserialize;
use serde_json::{json, Value};

pub const VENDOR_ID: &str = "hcloud";
pub const BASE_URL: &str = "https://api.hetzner.cloud/v1";
const CURRENCY: &str = "EUR";
const PAGE_SIZE: u32 = 50;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

// ── API payloads ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Location {
    name: String,
    description: String,
    country: String,
    city: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct Datacenter {
    name: String,
    description: String,
    location: LocationRef,
}

#[derive(Debug, Deserialize)]
struct LocationRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServerType {
    name: String,
    description: String,
    cores: i64,
    /// GB
    memory: f64,
    /// GB
    disk: i64,
    storage_type: String,
    cpu_type: String,
    architecture: String,
    #[serde(default)]
    deprecated: Option<bool>,
    prices: Vec<LocationPrice>,
}

impl ServerType {
    fn is_deprecated(&self) -> bool {
        self.deprecated.unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct LocationPrice {
    location: String,
    price_hourly: Amount,
    #[serde(default)]
    included_traffic: Option<f64>,
    #[serde(default)]
    price_per_tb_traffic: Option<Amount>,
}

/// Decimal amounts are sent as strings
#[derive(Debug, Deserialize)]
struct Amount {
    net: String,
}

impl Amount {
    fn value(&self) -> Result<f64> {
        self.net
            .parse()
            .map_err(|_| malformed(format!("invalid amount '{}'", self.net)))
    }
}

#[derive(Debug, Deserialize)]
struct PricingResponse {
    pricing: Pricing,
}

#[derive(Debug, Deserialize)]
struct Pricing {
    volume: VolumePricing,
    #[serde(default)]
    primary_ips: Vec<PrimaryIpPricing>,
}

#[derive(Debug, Deserialize)]
struct VolumePricing {
    price_per_gb_month: Amount,
}

#[derive(Debug, Deserialize)]
struct PrimaryIpPricing {
    #[serde(rename = "type")]
    kind: String,
    prices: Vec<PrimaryIpPrice>,
}

#[derive(Debug, Deserialize)]
struct PrimaryIpPrice {
    location: String,
    price_monthly: Amount,
}

fn malformed(detail: String) -> Error {
    Error::MalformedResponse {
        vendor: VENDOR_ID.to_string(),
        detail,
    }
}

// ── Driver ───────────────────────────────────────────────────────────

pub struct Hcloud {
    client: ApiClient,
}

impl Hcloud {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Build from `HCLOUD_TOKEN` (and optional `HCLOUD_API_URL`)
    pub fn from_env(retry: &RetryConfig) -> Result<Self> {
        let token = std::env::var("HCLOUD_TOKEN")
            .map_err(|_| Error::MissingCredentials("HCLOUD_TOKEN".to_string()))?;
        let base_url = std::env::var("HCLOUD_API_URL").unwrap_or_else(|_| BASE_URL.to_string());
        let client = ApiClient::new(base_url, Auth::Bearer(token), retry.clone())?;
        Ok(Self::new(client))
    }

    /// Collect every page of a list endpoint
    async fn paginate(&self, endpoint: &str, key: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = 1u64;
        loop {
            let query = [("page", page.to_string()), ("per_page", PAGE_SIZE.to_string())];
            let body = self.client.get_json(endpoint, &query).await?;
            match body.get(key) {
                Some(Value::Array(list)) => items.extend(list.iter().cloned()),
                _ => return Err(malformed(format!("{} response has no '{}' list", endpoint, key))),
            }
            match body.pointer("/meta/pagination/next_page").and_then(Value::as_u64) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        log::debug!("Fetched {} {} from Hetzner Cloud", items.len(), key);
        Ok(items)
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &VendorContext,
        endpoint: &str,
        key: &str,
    ) -> Result<Vec<T>> {
        let items: Vec<Value> = ctx
            .cache
            .cached(&ctx.vendor_id, endpoint, &Value::Null, || self.paginate(endpoint, key))
            .await?;
        items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect()
    }

    async fn server_types(&self, ctx: &VendorContext) -> Result<Vec<ServerType>> {
        let types: Vec<ServerType> = self.list(ctx, "server_types", "server_types").await?;
        Ok(types.into_iter().filter(|t| !t.is_deprecated()).collect())
    }

    async fn pricing(&self, ctx: &VendorContext) -> Result<Pricing> {
        let body = ctx
            .cache
            .cached(&ctx.vendor_id, "pricing", &Value::Null, || {
                self.client.get_json("pricing", &[])
            })
            .await?;
        let response: PricingResponse = serde_json::from_value(body)?;
        Ok(response.pricing)
    }

    fn region_ids(ctx: &VendorContext) -> Vec<String> {
        ctx.rows("region")
            .iter()
            .filter_map(|r| r.get("region_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

impl Inventory for Hcloud {
    fn vendor_id(&self) -> &'static str {
        VENDOR_ID
    }

    fn vendor_row(&self) -> Row {
        row_from_json(json!({
            "vendor_id": VENDOR_ID,
            "name": "Hetzner Cloud",
            "logo": "https://www.hetzner.com/assets/theme2022/frontend-assets/logo.svg",
            "homepage": "https://www.hetzner.com/cloud",
            "country_id": "DE",
            "state": "Bavaria",
            "city": "Gunzenhausen",
            "address_line": "Industriestr. 25",
            "zip_code": "91710",
            "founding_year": 1997,
            "status_page": "https://status.hetzner.com",
        }))
    }

    async fn compliance_frameworks(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(compliance_links(&ctx.vendor_id, &["iso27001"]))
    }

    async fn regions(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let locations: Vec<Location> = self.list(ctx, "locations", "locations").await?;
        Ok(locations
            .iter()
            .map(|l| {
                row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": l.name,
                    "name": l.description,
                    "api_reference": l.name,
                    "display_name": format!("{} ({})", l.city, l.country),
                    "aliases": [],
                    "country_id": l.country,
                    "city": l.city,
                    "lon": l.longitude,
                    "lat": l.latitude,
                }))
            })
            .collect())
    }

    async fn zones(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let datacenters: Vec<Datacenter> = self.list(ctx, "datacenters", "datacenters").await?;
        Ok(datacenters
            .iter()
            .map(|dc| {
                row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": dc.location.name,
                    "zone_id": dc.name,
                    "name": dc.name,
                    "api_reference": dc.name,
                    "display_name": dc.description,
                }))
            })
            .collect())
    }

    async fn servers(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let types = self.server_types(ctx).await?;
        let mut items = Vec::with_capacity(types.len());
        for t in &types {
            let cpu_allocation = match t.cpu_type.as_str() {
                "dedicated" => CpuAllocation::Dedicated,
                _ => CpuAllocation::Shared,
            };
            let architecture = match t.architecture.as_str() {
                "arm" => CpuArchitecture::Arm64,
                _ => CpuArchitecture::X86_64,
            };
            let storage_type = match t.storage_type.as_str() {
                "network" => StorageType::Network,
                _ => StorageType::NvmeSsd,
            };
            let included_traffic = t
                .prices
                .first()
                .and_then(|p| p.included_traffic)
                .map(|bytes| (bytes / BYTES_PER_GIB).round())
                .unwrap_or(0.0);
            items.push(row_from_json(json!({
                "vendor_id": ctx.vendor_id,
                "server_id": t.name,
                "name": t.name,
                "api_reference": t.name,
                "display_name": t.name.to_uppercase(),
                "description": t.description,
                "vcpus": t.cores,
                "hypervisor": "KVM",
                "cpu_allocation": cpu_allocation.as_str(),
                "cpu_architecture": architecture.as_str(),
                "memory_amount": (t.memory * 1024.0).round() as i64,
                "storage_size": t.disk,
                "storage_type": storage_type.as_str(),
                "inbound_traffic": 0,
                "outbound_traffic": included_traffic,
                "ipv4": 0,
            })));
        }
        Ok(items)
    }

    async fn server_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let mut items = Vec::new();
        for t in self.server_types(ctx).await? {
            for p in &t.prices {
                items.push(row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": p.location,
                    "server_id": t.name,
                    "operating_system": "Linux",
                    "allocation": Allocation::OnDemand.as_str(),
                    "unit": PriceUnit::Hour.as_str(),
                    "price": p.price_hourly.value()?,
                    "currency": CURRENCY,
                })));
            }
        }
        Ok(items)
    }

    async fn server_prices_spot(&self, _ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn storages(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(vec![row_from_json(json!({
            "vendor_id": ctx.vendor_id,
            "storage_id": "volume",
            "name": "Volume",
            "description": "Network-attached block storage",
            "storage_type": StorageType::Network.as_str(),
            "min_size": 10,
            "max_size": 10240,
        }))])
    }

    async fn storage_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let price = self.pricing(ctx).await?.volume.price_per_gb_month.value()?;
        Ok(Self::region_ids(ctx)
            .into_iter()
            .map(|region_id| {
                row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": region_id,
                    "storage_id": "volume",
                    "unit": PriceUnit::GbMonth.as_str(),
                    "price": price,
                    "currency": CURRENCY,
                }))
            })
            .collect())
    }

    async fn traffic_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let types = self.server_types(ctx).await?;
        let mut items = Vec::new();
        for region_id in Self::region_ids(ctx) {
            let per_tb = types
                .iter()
                .flat_map(|t| t.prices.iter())
                .find(|p| p.location == region_id)
                .and_then(|p| p.price_per_tb_traffic.as_ref());
            let Some(per_tb) = per_tb else {
                continue;
            };
            let outbound = per_tb.value()? / 1024.0;
            for direction in [TrafficDirection::Inbound, TrafficDirection::Outbound] {
                let price = match direction {
                    TrafficDirection::Outbound => outbound,
                    TrafficDirection::Inbound => 0.0,
                };
                items.push(row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": region_id,
                    "direction": direction.as_str(),
                    "unit": PriceUnit::Gb.as_str(),
                    "price": price,
                    "currency": CURRENCY,
                })));
            }
        }
        Ok(items)
    }

    async fn ipv4_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let pricing = self.pricing(ctx).await?;
        let mut items = Vec::new();
        for ip in pricing.primary_ips.iter().filter(|ip| ip.kind == "ipv4") {
            for p in &ip.prices {
                items.push(row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": p.location,
                    "unit": PriceUnit::Month.as_str(),
                    "price": p.price_monthly.value()?,
                    "currency": CURRENCY,
                })));
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
#[path = "hcloud_tests.rs"]
mod tests;
