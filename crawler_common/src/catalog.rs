//! Static table catalog
//!
//! Describes every primary table: its columns (type, nullability, default),
//! its natural key, which key positions are optional, and its foreign keys.
//! The catalog drives row validation, dependency ordering, the SCD shadow-table
//! layout and the generated DDL.

use crate::fields::{
    Allocation, CpuAllocation, CpuArchitecture, DdrGeneration, PriceUnit, Status, StorageType,
    TrafficDirection,
};
use std::collections::{HashMap, HashSet};

/// Canonical stand-in for a missing optional key component.
///
/// Uniqueness constraints cannot contain NULL components, so optional key
/// positions always hold this value instead.
pub const EMPTY_KEY: &str = "";

/// Columns excluded from change detection and content hashing
pub const IGNORED_COLUMNS: &[&str] = &["observed_at"];

/// Suffix of the slowly-changing-dimension shadow tables
pub const SCD_SUFFIX: &str = "_scd";

/// Validity-start column of SCD shadow tables
pub const VALID_FROM: &str = "valid_from";

/// Validity-end column of SCD shadow tables (NULL while the version is current)
pub const VALID_TO: &str = "valid_to";

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    /// RFC 3339 timestamp, normalized to UTC
    Timestamp,
    /// One of a fixed set of strings
    Enum(&'static [&'static str]),
    /// JSON array where element order matters
    List,
    /// JSON array where element order does not matter
    Set,
    /// JSON object
    Object,
    /// Ordered JSON array of `{lower, upper, price}` tiers
    PriceTiers,
}

impl ColumnType {
    /// SQLite type affinity used in the generated DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Float => "REAL",
            _ => "TEXT",
        }
    }

    /// Whether values are stored as serialized JSON
    pub fn is_json(&self) -> bool {
        matches!(
            self,
            ColumnType::List | ColumnType::Set | ColumnType::Object | ColumnType::PriceTiers
        )
    }
}

/// Value used when a row omits a column
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(&'static str),
    Boolean(bool),
    EmptyList,
}

impl DefaultValue {
    pub fn to_json(self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            DefaultValue::Null => Value::Null,
            DefaultValue::Integer(i) => Value::from(i),
            DefaultValue::Float(f) => Value::from(f),
            DefaultValue::Text(s) => Value::from(s),
            DefaultValue::Boolean(b) => Value::Bool(b),
            DefaultValue::EmptyList => Value::Array(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    /// `None` means the column is required
    pub default: Option<DefaultValue>,
}

impl Column {
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
        }
    }

    pub const fn optional(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            default: Some(DefaultValue::Null),
        }
    }

    pub const fn with_default(name: &'static str, ty: ColumnType, default: DefaultValue) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: Some(default),
        }
    }
}

/// Reference from a set of child columns to the natural key of a parent table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForeignKey {
    pub columns: &'static [&'static str],
    pub parent: &'static str,
    pub parent_columns: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableDef {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: &'static [Column],
    /// Natural key, in declaration order
    pub primary_key: &'static [&'static str],
    /// Key positions that may be absent and hold [`EMPTY_KEY`] instead
    pub optional_key: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.contains(&name)
    }

    pub fn is_optional_key(&self, name: &str) -> bool {
        self.optional_key.contains(&name)
    }

    /// Non-key columns that take part in change detection
    pub fn attribute_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| !self.is_key(c.name) && !IGNORED_COLUMNS.contains(&c.name))
    }

    /// Names of the parent tables this table references
    pub fn parents(&self) -> Vec<&'static str> {
        let mut parents: Vec<&'static str> = Vec::new();
        for fk in self.foreign_keys {
            if fk.parent != self.name && !parents.contains(&fk.parent) {
                parents.push(fk.parent);
            }
        }
        parents
    }

    pub fn scd_name(&self) -> String {
        format!("{}{}", self.name, SCD_SUFFIX)
    }
}

// ── Column building blocks ──────────────────────────────────────────────────

const fn req(name: &'static str, ty: ColumnType) -> Column {
    Column::required(name, ty)
}

const fn opt(name: &'static str, ty: ColumnType) -> Column {
    Column::optional(name, ty)
}

const fn def(name: &'static str, ty: ColumnType, default: DefaultValue) -> Column {
    Column::with_default(name, ty, default)
}

use ColumnType::{Boolean, Float, Integer, List, PriceTiers, Set, Text, Timestamp};

const STATUS: Column = def("status", ColumnType::Enum(Status::VALUES), DefaultValue::Text("active"));
const OBSERVED_AT: Column = opt("observed_at", Timestamp);

const VENDOR_ID: Column = req("vendor_id", Text);
const REGION_ID: Column = req("region_id", Text);
const NAME: Column = req("name", Text);
const API_REFERENCE: Column = req("api_reference", Text);
const DISPLAY_NAME: Column = req("display_name", Text);
const DESCRIPTION: Column = opt("description", Text);

const UNIT: Column = req("unit", ColumnType::Enum(PriceUnit::VALUES));
const PRICE: Column = req("price", Float);
const PRICE_UPFRONT: Column = def("price_upfront", Float, DefaultValue::Float(0.0));
const PRICE_TIERED: Column = def("price_tiered", PriceTiers, DefaultValue::EmptyList);
const CURRENCY: Column = def("currency", Text, DefaultValue::Text("USD"));

const VENDOR_FK: ForeignKey = ForeignKey {
    columns: &["vendor_id"],
    parent: "vendor",
    parent_columns: &["vendor_id"],
};

const REGION_FK: ForeignKey = ForeignKey {
    columns: &["vendor_id", "region_id"],
    parent: "region",
    parent_columns: &["vendor_id", "region_id"],
};

const COUNTRY_FK: ForeignKey = ForeignKey {
    columns: &["country_id"],
    parent: "country",
    parent_columns: &["country_id"],
};

// ── Tables ──────────────────────────────────────────────────────────────────

pub const COUNTRY: TableDef = TableDef {
    name: "country",
    description: "Country and continent mapping.",
    columns: &[
        req("country_id", Text),
        req("continent", Text),
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["country_id"],
    optional_key: &[],
    foreign_keys: &[],
};

pub const COMPLIANCE_FRAMEWORK: TableDef = TableDef {
    name: "compliance_framework",
    description: "Compliance frameworks, such as HIPAA or SOC 2 Type 2.",
    columns: &[
        req("compliance_framework_id", Text),
        NAME,
        opt("abbreviation", Text),
        DESCRIPTION,
        opt("logo", Text),
        opt("homepage", Text),
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["compliance_framework_id"],
    optional_key: &[],
    foreign_keys: &[],
};

pub const VENDOR: TableDef = TableDef {
    name: "vendor",
    description: "Compute resource vendors, such as cloud and server providers.",
    columns: &[
        VENDOR_ID,
        NAME,
        opt("logo", Text),
        opt("homepage", Text),
        req("country_id", Text),
        opt("state", Text),
        opt("city", Text),
        opt("address_line", Text),
        opt("zip_code", Text),
        req("founding_year", Integer),
        opt("status_page", Text),
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id"],
    optional_key: &[],
    foreign_keys: &[COUNTRY_FK],
};

pub const VENDOR_COMPLIANCE_LINK: TableDef = TableDef {
    name: "vendor_compliance_link",
    description: "Compliance frameworks certified at each vendor.",
    columns: &[
        VENDOR_ID,
        req("compliance_framework_id", Text),
        opt("comment", Text),
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "compliance_framework_id"],
    optional_key: &[],
    foreign_keys: &[
        VENDOR_FK,
        ForeignKey {
            columns: &["compliance_framework_id"],
            parent: "compliance_framework",
            parent_columns: &["compliance_framework_id"],
        },
    ],
};

pub const REGION: TableDef = TableDef {
    name: "region",
    description: "Regions (datacenters) of vendors.",
    columns: &[
        VENDOR_ID,
        REGION_ID,
        NAME,
        API_REFERENCE,
        DISPLAY_NAME,
        def("aliases", Set, DefaultValue::EmptyList),
        req("country_id", Text),
        opt("state", Text),
        opt("city", Text),
        opt("address_line", Text),
        opt("zip_code", Text),
        opt("lon", Float),
        opt("lat", Float),
        opt("founding_year", Integer),
        opt("green_energy", Boolean),
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "region_id"],
    optional_key: &[],
    foreign_keys: &[VENDOR_FK, COUNTRY_FK],
};

pub const ZONE: TableDef = TableDef {
    name: "zone",
    description: "Availability zones of regions.",
    columns: &[
        VENDOR_ID,
        REGION_ID,
        req("zone_id", Text),
        NAME,
        API_REFERENCE,
        DISPLAY_NAME,
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "region_id", "zone_id"],
    optional_key: &[],
    foreign_keys: &[VENDOR_FK, REGION_FK],
};

pub const STORAGE: TableDef = TableDef {
    name: "storage",
    description: "Flexible storage options that can be attached to a server.",
    columns: &[
        VENDOR_ID,
        req("storage_id", Text),
        NAME,
        DESCRIPTION,
        req("storage_type", ColumnType::Enum(StorageType::VALUES)),
        opt("max_iops", Integer),
        opt("max_throughput", Integer),
        opt("min_size", Integer),
        opt("max_size", Integer),
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "storage_id"],
    optional_key: &[],
    foreign_keys: &[VENDOR_FK],
};

pub const SERVER: TableDef = TableDef {
    name: "server",
    description: "Server types (hardware profiles).",
    columns: &[
        VENDOR_ID,
        req("server_id", Text),
        NAME,
        API_REFERENCE,
        DISPLAY_NAME,
        DESCRIPTION,
        opt("family", Text),
        req("vcpus", Integer),
        opt("hypervisor", Text),
        req("cpu_allocation", ColumnType::Enum(CpuAllocation::VALUES)),
        opt("cpu_cores", Integer),
        opt("cpu_speed", Float),
        req("cpu_architecture", ColumnType::Enum(CpuArchitecture::VALUES)),
        opt("cpu_manufacturer", Text),
        opt("cpu_family", Text),
        opt("cpu_model", Text),
        def("cpu_flags", Set, DefaultValue::EmptyList),
        def("cpus", List, DefaultValue::EmptyList),
        req("memory_amount", Integer),
        opt("memory_generation", ColumnType::Enum(DdrGeneration::VALUES)),
        opt("memory_speed", Integer),
        opt("memory_ecc", Boolean),
        def("gpu_count", Float, DefaultValue::Float(0.0)),
        opt("gpu_memory_min", Integer),
        opt("gpu_memory_total", Integer),
        opt("gpu_manufacturer", Text),
        opt("gpu_family", Text),
        opt("gpu_model", Text),
        def("gpus", List, DefaultValue::EmptyList),
        def("storage_size", Integer, DefaultValue::Integer(0)),
        opt("storage_type", ColumnType::Enum(StorageType::VALUES)),
        def("storages", List, DefaultValue::EmptyList),
        opt("network_speed", Float),
        def("inbound_traffic", Float, DefaultValue::Float(0.0)),
        def("outbound_traffic", Float, DefaultValue::Float(0.0)),
        def("ipv4", Integer, DefaultValue::Integer(0)),
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "server_id"],
    optional_key: &[],
    foreign_keys: &[VENDOR_FK],
};

pub const SERVER_PRICE: TableDef = TableDef {
    name: "server_price",
    description: "Server prices per region/zone, allocation and operating system.",
    columns: &[
        VENDOR_ID,
        REGION_ID,
        def("zone_id", Text, DefaultValue::Text(EMPTY_KEY)),
        req("server_id", Text),
        def(
            "allocation",
            ColumnType::Enum(Allocation::VALUES),
            DefaultValue::Text("ondemand"),
        ),
        req("operating_system", Text),
        UNIT,
        PRICE,
        PRICE_UPFRONT,
        PRICE_TIERED,
        CURRENCY,
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &[
        "vendor_id",
        "region_id",
        "zone_id",
        "server_id",
        "allocation",
        "operating_system",
    ],
    optional_key: &["zone_id"],
    foreign_keys: &[
        VENDOR_FK,
        REGION_FK,
        ForeignKey {
            columns: &["vendor_id", "region_id", "zone_id"],
            parent: "zone",
            parent_columns: &["vendor_id", "region_id", "zone_id"],
        },
        ForeignKey {
            columns: &["vendor_id", "server_id"],
            parent: "server",
            parent_columns: &["vendor_id", "server_id"],
        },
    ],
};

pub const STORAGE_PRICE: TableDef = TableDef {
    name: "storage_price",
    description: "Flexible storage prices in each region.",
    columns: &[
        VENDOR_ID,
        REGION_ID,
        req("storage_id", Text),
        UNIT,
        PRICE,
        PRICE_UPFRONT,
        PRICE_TIERED,
        CURRENCY,
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "region_id", "storage_id"],
    optional_key: &[],
    foreign_keys: &[
        VENDOR_FK,
        REGION_FK,
        ForeignKey {
            columns: &["vendor_id", "storage_id"],
            parent: "storage",
            parent_columns: &["vendor_id", "storage_id"],
        },
    ],
};

pub const TRAFFIC_PRICE: TableDef = TableDef {
    name: "traffic_price",
    description: "Extra traffic prices in each region.",
    columns: &[
        VENDOR_ID,
        REGION_ID,
        req("direction", ColumnType::Enum(TrafficDirection::VALUES)),
        UNIT,
        PRICE,
        PRICE_UPFRONT,
        PRICE_TIERED,
        CURRENCY,
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "region_id", "direction"],
    optional_key: &[],
    foreign_keys: &[VENDOR_FK, REGION_FK],
};

pub const IPV4_PRICE: TableDef = TableDef {
    name: "ipv4_price",
    description: "Price of an IPv4 address in each region.",
    columns: &[
        VENDOR_ID,
        REGION_ID,
        UNIT,
        PRICE,
        PRICE_UPFRONT,
        PRICE_TIERED,
        CURRENCY,
        STATUS,
        OBSERVED_AT,
    ],
    primary_key: &["vendor_id", "region_id"],
    optional_key: &[],
    foreign_keys: &[VENDOR_FK, REGION_FK],
};

/// All primary tables, parents declared before children
pub static TABLES: &[TableDef] = &[
    COUNTRY,
    COMPLIANCE_FRAMEWORK,
    VENDOR,
    VENDOR_COMPLIANCE_LINK,
    REGION,
    ZONE,
    STORAGE,
    SERVER,
    SERVER_PRICE,
    STORAGE_PRICE,
    TRAFFIC_PRICE,
    IPV4_PRICE,
];

/// Look up a table definition by name
pub fn table(name: &str) -> Option<&'static TableDef> {
    TABLES.iter().find(|t| t.name == name)
}

/// Order tables so that every parent comes before its children.
///
/// Only references between the given tables are considered. Ties are broken by
/// the order of the input, so the result is deterministic.
pub fn dependency_order(tables: &[&'static TableDef]) -> Vec<&'static TableDef> {
    let selected: HashSet<&str> = tables.iter().map(|t| t.name).collect();
    let mut pending: HashMap<&str, usize> = tables
        .iter()
        .map(|t| {
            let n = t
                .parents()
                .iter()
                .filter(|p| selected.contains(*p))
                .count();
            (t.name, n)
        })
        .collect();

    let mut ordered: Vec<&'static TableDef> = Vec::with_capacity(tables.len());
    while ordered.len() < tables.len() {
        let next = tables
            .iter()
            .find(|t| pending.get(t.name) == Some(&0) && !ordered.iter().any(|o| o.name == t.name));
        let Some(next) = next else {
            // cycle: keep the remaining tables in input order
            for t in tables {
                if !ordered.iter().any(|o| o.name == t.name) {
                    ordered.push(*t);
                }
            }
            break;
        };
        let next = *next;
        ordered.push(next);
        for child in tables {
            if child.parents().contains(&next.name) {
                if let Some(n) = pending.get_mut(child.name) {
                    *n = n.saturating_sub(1);
                }
            }
        }
    }
    ordered
}
