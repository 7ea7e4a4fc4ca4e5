//! Static reference data seeded before every pull

use crawler_common::row::row_from_json;
use crawler_common::Row;
use serde_json::json;

/// ISO 3166-1 alpha-2 country code and continent
const COUNTRIES: &[(&str, &str)] = &[
    ("AE", "Asia"),
    ("AU", "Oceania"),
    ("BH", "Asia"),
    ("BR", "South America"),
    ("CA", "North America"),
    ("CH", "Europe"),
    ("CN", "Asia"),
    ("DE", "Europe"),
    ("ES", "Europe"),
    ("FI", "Europe"),
    ("FR", "Europe"),
    ("GB", "Europe"),
    ("HK", "Asia"),
    ("ID", "Asia"),
    ("IE", "Europe"),
    ("IL", "Asia"),
    ("IN", "Asia"),
    ("IT", "Europe"),
    ("JP", "Asia"),
    ("KR", "Asia"),
    ("NL", "Europe"),
    ("PL", "Europe"),
    ("SE", "Europe"),
    ("SG", "Asia"),
    ("US", "North America"),
    ("ZA", "Africa"),
];

struct Framework {
    id: &'static str,
    name: &'static str,
    abbreviation: &'static str,
    description: &'static str,
    homepage: &'static str,
}

const COMPLIANCE_FRAMEWORKS: &[Framework] = &[
    Framework {
        id: "hipaa",
        name: "The Health Insurance Portability and Accountability Act",
        abbreviation: "HIPAA",
        description: "U.S. federal law setting standards for protecting the privacy and security of health information.",
        homepage: "https://www.cdc.gov/phlp/publications/topic/hipaa.html",
    },
    Framework {
        id: "soc2t2",
        name: "System and Organization Controls Level 2 Type 2",
        abbreviation: "SOC 2 Type 2",
        description: "Assessment of how effectively a service organization's security controls operate over time.",
        homepage: "https://www.aicpa-cima.com/topic/audit-assurance/audit-and-assurance-greater-than-soc-2",
    },
    Framework {
        id: "iso27001",
        name: "ISO/IEC 27001",
        abbreviation: "ISO 27001",
        description: "International standard for information security management systems.",
        homepage: "https://www.iso.org/standard/27001",
    },
];

/// Rows for the `country` table
pub fn countries() -> Vec<Row> {
    COUNTRIES
        .iter()
        .map(|(id, continent)| row_from_json(json!({"country_id": id, "continent": continent})))
        .collect()
}

/// Rows for the `compliance_framework` table
pub fn compliance_frameworks() -> Vec<Row> {
    COMPLIANCE_FRAMEWORKS
        .iter()
        .map(|f| {
            row_from_json(json!({
                "compliance_framework_id": f.id,
                "name": f.name,
                "abbreviation": f.abbreviation,
                "description": f.description,
                "homepage": f.homepage,
            }))
        })
        .collect()
}

/// `vendor_compliance_link` rows for a vendor's certified frameworks
pub fn compliance_links(vendor_id: &str, framework_ids: &[&str]) -> Vec<Row> {
    framework_ids
        .iter()
        .map(|id| row_from_json(json!({"vendor_id": vendor_id, "compliance_framework_id": id})))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_common::catalog::{COMPLIANCE_FRAMEWORK, COUNTRY};
    use crawler_common::validate_row;

    #[test]
    fn reference_rows_are_valid() {
        for r in countries() {
            validate_row(&COUNTRY, &r).unwrap();
        }
        for r in compliance_frameworks() {
            validate_row(&COMPLIANCE_FRAMEWORK, &r).unwrap();
        }
    }

    #[test]
    fn compliance_links_name_vendor_and_framework() {
        let links = compliance_links("hcloud", &["iso27001"]);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0]["vendor_id"], "hcloud");
        assert_eq!(links[0]["compliance_framework_id"], "iso27001");
    }
}
