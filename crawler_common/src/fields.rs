//! Enumerated field values shared by the table catalog and the vendor drivers.
//!
//! Every enum is stored as its string form, so the catalog only needs the list
//! of allowed values (`VALUES`) to validate incoming rows.

/// Generates a string-backed enum with `as_str`, `parse` and `VALUES`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// All allowed string values, in declaration order
            pub const VALUES: &'static [&'static str] = &[$($value),+];

            /// Returns the stored string form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }

            /// Parse the stored string form (exact match)
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Last known status of a resource
    Status {
        Active => "active",
        /// No longer reported by the vendor
        Inactive => "inactive",
    }
}

string_enum! {
    /// Pricing mode for compute
    Allocation {
        OnDemand => "ondemand",
        Reserved => "reserved",
        Spot => "spot",
    }
}

string_enum! {
    /// Billing unit of a price
    PriceUnit {
        Year => "year",
        Month => "month",
        Hour => "hour",
        Gib => "GiB",
        Gb => "GB",
        GbMonth => "GB/month",
    }
}

string_enum! {
    /// High-level storage category
    StorageType {
        Hdd => "hdd",
        Ssd => "ssd",
        NvmeSsd => "nvme ssd",
        Network => "network",
    }
}

string_enum! {
    TrafficDirection {
        Inbound => "inbound",
        Outbound => "outbound",
    }
}

string_enum! {
    /// How CPU time is allocated to a server
    CpuAllocation {
        Shared => "Shared",
        Burstable => "Burstable",
        Dedicated => "Dedicated",
    }
}

string_enum! {
    CpuArchitecture {
        Arm64 => "arm64",
        Arm64Mac => "arm64_mac",
        I386 => "i386",
        X86_64 => "x86_64",
        X86_64Mac => "x86_64_mac",
    }
}

string_enum! {
    /// Generation of the DDR SDRAM
    DdrGeneration {
        Ddr3 => "DDR3",
        Ddr4 => "DDR4",
        Ddr5 => "DDR5",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_value() {
        for value in PriceUnit::VALUES {
            let unit = PriceUnit::parse(value).unwrap();
            assert_eq!(unit.as_str(), *value);
        }
    }

    #[test]
    fn parse_is_case_sensitive() {
        assert_eq!(Allocation::parse("spot"), Some(Allocation::Spot));
        assert_eq!(Allocation::parse("Spot"), None);
        assert_eq!(CpuAllocation::parse("Dedicated"), Some(CpuAllocation::Dedicated));
    }

    #[test]
    fn display_uses_stored_form() {
        assert_eq!(StorageType::NvmeSsd.to_string(), "nvme ssd");
        assert_eq!(Status::Inactive.to_string(), "inactive");
    }
}
