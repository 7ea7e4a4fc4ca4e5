//! UpCloud driver
//!
//! UpCloud has no availability zones inside a region, so every zone of the
//! API becomes a region with a single zone of the same id. Prices are listed
//! in euro cents.

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
use std::collections::{HashMap, HashSet};

pub const VENDOR_ID: &str = "upcloud";
pub const BASE_URL: &str = "https://api.upcloud.com/1.3";
const CURRENCY: &str = "EUR";

/// Manually collected location details per public zone
struct Site {
    zone: &'static str,
    country_id: &'static str,
    state: &'static str,
    city: &'static str,
    founding_year: i64,
    green_energy: bool,
    lon: f64,
    lat: f64,
}

const SITES: &[Site] = &[
    Site { zone: "au-syd1", country_id: "AU", state: "New South Wales", city: "Sydney", founding_year: 2021, green_energy: false, lon: 151.189377, lat: -33.918251 },
    Site { zone: "de-fra1", country_id: "DE", state: "Hesse", city: "Frankfurt", founding_year: 2015, green_energy: true, lon: 8.735120, lat: 50.119190 },
    Site { zone: "es-mad1", country_id: "ES", state: "Madrid", city: "Madrid", founding_year: 2020, green_energy: true, lon: -3.6239873, lat: 40.4395019 },
    Site { zone: "fi-hel1", country_id: "FI", state: "Uusimaa", city: "Helsinki", founding_year: 2011, green_energy: true, lon: 24.778570, lat: 60.20323 },
    Site { zone: "fi-hel2", country_id: "FI", state: "Uusimaa", city: "Helsinki", founding_year: 2018, green_energy: true, lon: 24.876350, lat: 60.216209 },
    Site { zone: "nl-ams1", country_id: "NL", state: "Noord Holland", city: "Amsterdam", founding_year: 2017, green_energy: true, lon: 4.8400019, lat: 52.3998291 },
    Site { zone: "pl-waw1", country_id: "PL", state: "Mazowieckie", city: "Warsaw", founding_year: 2020, green_energy: true, lon: 20.9192823, lat: 52.1905901 },
    Site { zone: "se-sto1", country_id: "SE", state: "Stockholm", city: "Stockholm", founding_year: 2015, green_energy: true, lon: 18.102788, lat: 59.2636708 },
    Site { zone: "sg-sin1", country_id: "SG", state: "Singapore", city: "Singapore", founding_year: 2017, green_energy: true, lon: 103.7022636, lat: 1.3172304 },
    Site { zone: "uk-lon1", country_id: "GB", state: "London", city: "London", founding_year: 2012, green_energy: true, lon: -0.1037341, lat: 51.5232232 },
    Site { zone: "us-chi1", country_id: "US", state: "Illinois", city: "Chicago", founding_year: 2014, green_energy: false, lon: -87.6342056, lat: 41.8761287 },
    Site { zone: "us-nyc1", country_id: "US", state: "New York", city: "New York", founding_year: 2020, green_energy: false, lon: -74.0645536, lat: 40.7834325 },
    Site { zone: "us-sjo1", country_id: "US", state: "California", city: "San Jose", founding_year: 2018, green_energy: false, lon: -121.9754458, lat: 37.3764769 },
];

/// Block storage tiers; not exposed by the API
struct StorageTier {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    storage_type: StorageType,
    max_iops: i64,
}

const STORAGE_TIERS: &[StorageTier] = &[
    StorageTier { id: "hdd", name: "Archive", description: "High-capacity data storage", storage_type: StorageType::Hdd, max_iops: 600 },
    StorageTier { id: "standard", name: "Standard", description: "General purpose data storage", storage_type: StorageType::Ssd, max_iops: 10000 },
    StorageTier { id: "maxiops", name: "MaxIOPS", description: "High-performance web servers and applications", storage_type: StorageType::Ssd, max_iops: 100000 },
];

// ── API payloads ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    zones: ZoneList,
}

#[derive(Debug, Deserialize)]
struct ZoneList {
    zone: Vec<ApiZone>,
}

#[derive(Debug, Deserialize)]
struct ApiZone {
    id: String,
    description: String,
    #[serde(default)]
    public: String,
}

#[derive(Debug, Deserialize)]
struct PlansResponse {
    plans: PlanList,
}

#[derive(Debug, Deserialize)]
struct PlanList {
    plan: Vec<ApiPlan>,
}

#[derive(Debug, Deserialize)]
struct ApiPlan {
    name: String,
    core_number: i64,
    memory_amount: i64,
    #[serde(default)]
    public_traffic_out: Option<i64>,
    #[serde(default)]
    storage_size: Option<i64>,
    #[serde(default)]
    storage_tier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    prices: PriceZones,
}

#[derive(Debug, Deserialize)]
struct PriceZones {
    zone: Vec<PriceZone>,
}

/// Prices of one zone, keyed by product (`server_plan_<plan>`, `storage_<tier>`, ...)
#[derive(Debug, Deserialize)]
struct PriceZone {
    name: String,
    #[serde(flatten)]
    products: HashMap<String, Value>,
}

impl PriceZone {
    /// Product price converted from cents to euros
    fn price(&self, product: &str) -> Option<f64> {
        self.products
            .get(product)?
            .get("price")?
            .as_f64()
            .map(|cents| cents / 100.0)
    }
}

/// Family and size encoded in a plan name such as `HICPU-8xCPU-16GB`
#[derive(Debug, PartialEq)]
struct PlanName {
    family: String,
    vcpus: i64,
    memory_gb: i64,
}

fn parse_plan_name(name: &str) -> Option<PlanName> {
    let (prefix, rest) = match name.split_once('-') {
        Some((head, tail)) if !head.is_empty() && head.chars().all(|c| c.is_ascii_uppercase()) => {
            (Some(head), tail)
        }
        _ => (None, name),
    };
    let (cpus, rest) = rest.split_once("xCPU-")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !rest[digits.len()..].starts_with("GB") {
        return None;
    }
    let family = match prefix {
        None => "General Purpose",
        Some("DEV") => "Developer",
        Some("HICPU") => "High CPU",
        Some("HIMEM") => "High Memory",
        Some(other) => other,
    };
    Some(PlanName {
        family: family.to_string(),
        vcpus: cpus.parse().ok()?,
        memory_gb: digits.parse().ok()?,
    })
}

// ── Driver ───────────────────────────────────────────────────────────

pub struct Upcloud {
    client: ApiClient,
}

impl Upcloud {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Build from `UPCLOUD_USERNAME`/`UPCLOUD_PASSWORD` (and optional `UPCLOUD_API_URL`)
    pub fn from_env(retry: &RetryConfig) -> Result<Self> {
        let username = std::env::var("UPCLOUD_USERNAME")
            .map_err(|_| Error::MissingCredentials("UPCLOUD_USERNAME".to_string()))?;
        let password = std::env::var("UPCLOUD_PASSWORD")
            .map_err(|_| Error::MissingCredentials("UPCLOUD_PASSWORD".to_string()))?;
        let base_url = std::env::var("UPCLOUD_API_URL").unwrap_or_else(|_| BASE_URL.to_string());
        let client = ApiClient::new(base_url, Auth::Basic { username, password }, retry.clone())?;
        Ok(Self::new(client))
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, ctx: &VendorContext, endpoint: &str) -> Result<T> {
        let value = ctx
            .cache
            .cached(&ctx.vendor_id, endpoint, &Value::Null, || {
                self.client.get_json(endpoint, &[])
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Price list entries of the zones stored as regions
    async fn price_zones(&self, ctx: &VendorContext) -> Result<Vec<PriceZone>> {
        let prices: PricesResponse = self.fetch(ctx, "price").await?;
        let regions = stored_ids(ctx, "region", "region_id");
        Ok(prices
            .prices
            .zone
            .into_iter()
            .filter(|zone| {
                let known = regions.contains(zone.name.as_str());
                if !known {
                    log::debug!("Skipping prices of unlisted zone {}", zone.name);
                }
                known
            })
            .collect())
    }
}

/// Ids of the rows already stored for `table`
fn stored_ids<'a>(ctx: &'a VendorContext, table: &str, column: &str) -> HashSet<&'a str> {
    ctx.rows(table)
        .iter()
        .filter_map(|r| r.get(column).and_then(Value::as_str))
        .collect()
}

impl Inventory for Upcloud {
    fn vendor_id(&self) -> &'static str {
        VENDOR_ID
    }

    fn vendor_row(&self) -> Row {
        row_from_json(json!({
            "vendor_id": VENDOR_ID,
            "name": "UpCloud",
            "homepage": "https://upcloud.com",
            "country_id": "FI",
            "state": "Uusimaa",
            "city": "Helsinki",
            "address_line": "Aleksanterinkatu 15 B",
            "zip_code": "00100",
            "founding_year": 2011,
            "status_page": "https://status.upcloud.com",
        }))
    }

    async fn compliance_frameworks(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(compliance_links(&ctx.vendor_id, &["iso27001"]))
    }

    async fn regions(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let zones: ZonesResponse = self.fetch(ctx, "zone").await?;
        let mut items = Vec::new();
        for zone in zones.zones.zone.iter().filter(|z| z.public == "yes") {
            let Some(site) = SITES.iter().find(|s| s.zone == zone.id) else {
                log::warn!("Skipping UpCloud zone {}: no location details", zone.id);
                continue;
            };
            items.push(row_from_json(json!({
                "vendor_id": ctx.vendor_id,
                "region_id": zone.id,
                "name": zone.description,
                "api_reference": zone.id,
                "display_name": format!("{} ({})", zone.description, site.country_id),
                "aliases": [],
                "country_id": site.country_id,
                "state": site.state,
                "city": site.city,
                "lon": site.lon,
                "lat": site.lat,
                "founding_year": site.founding_year,
                "green_energy": site.green_energy,
            })));
        }
        Ok(items)
    }

    async fn zones(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        Ok(ctx
            .rows("region")
            .iter()
            .map(|region| {
                let id = region.get("region_id").cloned().unwrap_or(Value::Null);
                let name = region.get("name").cloned().unwrap_or(Value::Null);
                row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": id,
                    "zone_id": id,
                    "name": name,
                    "api_reference": id,
                    "display_name": name,
                }))
            })
            .collect())
    }

    async fn servers(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let plans: PlansResponse = self.fetch(ctx, "plan").await?;
        let task = ctx.progress.start_task("Parsing server plans", plans.plans.plan.len());
        let mut items = Vec::new();
        for plan in &plans.plans.plan {
            ctx.progress.advance(task, 1);
            let parsed = parse_plan_name(&plan.name);
            if parsed.is_none() {
                log::warn!("Unexpected UpCloud plan name '{}'", plan.name);
            }
            items.push(row_from_json(json!({
                "vendor_id": ctx.vendor_id,
                "server_id": plan.name,
                "name": plan.name,
                "api_reference": plan.name,
                "display_name": plan.name,
                "description": parsed.as_ref().map(|p| format!("{} {} vCPUs, {} GB RAM", p.family, p.vcpus, p.memory_gb)),
                "family": parsed.as_ref().map(|p| p.family.clone()),
                "vcpus": plan.core_number,
                "hypervisor": "KVM",
                "cpu_allocation": CpuAllocation::Dedicated.as_str(),
                "cpu_architecture": CpuArchitecture::X86_64.as_str(),
                "memory_amount": plan.memory_amount,
                "gpu_count": 0,
                "storage_size": plan.storage_size.unwrap_or(0),
                "storage_type": plan.storage_tier.as_ref().map(|_| StorageType::Ssd.as_str()),
                "inbound_traffic": 0,
                "outbound_traffic": plan.public_traffic_out.unwrap_or(0),
                "ipv4": 1,
            })));
        }
        ctx.progress.finish(task, &format!("{} plans", items.len()));
        Ok(items)
    }

    async fn server_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let servers = stored_ids(ctx, "server", "server_id");
        let mut items = Vec::new();
        for zone in self.price_zones(ctx).await? {
            let mut plans: Vec<&str> = zone
                .products
                .keys()
                .filter_map(|k| k.strip_prefix("server_plan_"))
                .filter(|plan| servers.contains(plan))
                .collect();
            plans.sort();
            for plan in plans {
                let Some(price) = zone.price(&format!("server_plan_{}", plan)) else {
                    continue;
                };
                items.push(row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": zone.name,
                    "zone_id": zone.name,
                    "server_id": plan,
                    "operating_system": "Linux",
                    "allocation": Allocation::OnDemand.as_str(),
                    "unit": PriceUnit::Hour.as_str(),
                    "price": price,
                    "price_upfront": 0,
                    "price_tiered": [],
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
        Ok(STORAGE_TIERS
            .iter()
            .map(|tier| {
                row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "storage_id": tier.id,
                    "name": tier.name,
                    "description": tier.description,
                    "storage_type": tier.storage_type.as_str(),
                    "max_iops": tier.max_iops,
                    "min_size": 1,
                    "max_size": 4096,
                }))
            })
            .collect())
    }

    async fn storage_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let storages = stored_ids(ctx, "storage", "storage_id");
        let mut items = Vec::new();
        for zone in self.price_zones(ctx).await? {
            for tier in STORAGE_TIERS.iter().filter(|t| storages.contains(t.id)) {
                if let Some(price) = zone.price(&format!("storage_{}", tier.id)) {
                    items.push(row_from_json(json!({
                        "vendor_id": ctx.vendor_id,
                        "region_id": zone.name,
                        "storage_id": tier.id,
                        "unit": PriceUnit::GbMonth.as_str(),
                        "price": price,
                        "currency": CURRENCY,
                    })));
                }
            }
        }
        Ok(items)
    }

    async fn traffic_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let mut items = Vec::new();
        for zone in self.price_zones(ctx).await? {
            let Some(outbound) = zone.price("public_ipv4_bandwidth_out") else {
                continue;
            };
            for direction in [TrafficDirection::Inbound, TrafficDirection::Outbound] {
                let price = match direction {
                    TrafficDirection::Outbound => outbound,
                    TrafficDirection::Inbound => 0.0,
                };
                items.push(row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": zone.name,
                    "direction": direction.as_str(),
                    "unit": PriceUnit::Gb.as_str(),
                    "price": price,
                    "price_tiered": [],
                    "currency": CURRENCY,
                })));
            }
        }
        Ok(items)
    }

    async fn ipv4_prices(&self, ctx: &VendorContext) -> Result<Vec<Row>> {
        let mut items = Vec::new();
        for zone in self.price_zones(ctx).await? {
            if let Some(price) = zone.price("ipv4_address") {
                items.push(row_from_json(json!({
                    "vendor_id": ctx.vendor_id,
                    "region_id": zone.name,
                    "unit": PriceUnit::Hour.as_str(),
                    "price": price,
                    "currency": CURRENCY,
                })));
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
#[path = "upcloud_tests.rs"]
mod tests;
