//! Row validation against the table catalog
//!
//! Coerces loosely typed vendor values into the column types, fills defaults,
//! enforces required fields and enumerated values, and substitutes the
//! [`EMPTY_KEY`] sentinel for missing optional key positions.

use crate::catalog::{Column, ColumnType, TableDef, EMPTY_KEY};
use crate::error::ValidationError;
use crate::row::{key_label, Row};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

/// Fixed-width timestamp format used for every stored timestamp.
///
/// Microsecond precision and a literal `Z` keep lexicographic order equal to
/// chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored or vendor-supplied RFC 3339 timestamp
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Validate a row against its table definition.
///
/// Returns the normalized row containing exactly the table's columns. Columns
/// the table does not declare are dropped.
pub fn validate_row(table: &TableDef, row: &Row) -> Result<Row, ValidationError> {
    let key = key_label(table, row);
    let mut out = Row::new();

    for column in table.columns {
        let raw = row.get(column.name);
        let value = match raw {
            None | Some(Value::Null) if table.is_optional_key(column.name) => {
                Value::from(EMPTY_KEY)
            }
            None => match column.default {
                Some(default) => default.to_json(),
                None => return Err(fail(table, &key, column, "required field is missing")),
            },
            Some(Value::Null) => {
                if column.nullable {
                    Value::Null
                } else {
                    return Err(fail(table, &key, column, "null is not allowed"));
                }
            }
            Some(v) => coerce(&column.ty, v).map_err(|reason| fail(table, &key, column, &reason))?,
        };
        out.insert(column.name.to_string(), value);
    }

    for (name, _) in row.iter() {
        if table.column(name).is_none() {
            log::trace!("{} [{}]: dropping undeclared column '{}'", table.name, key, name);
        }
    }

    Ok(out)
}

fn fail(table: &TableDef, key: &str, column: &Column, reason: &str) -> ValidationError {
    ValidationError::new(table.name, key, column.name, reason)
}

/// Coerce a single non-null value into the column type
fn coerce(ty: &ColumnType, value: &Value) -> Result<Value, String> {
    match ty {
        ColumnType::Text => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(format!("expected text, got {}", other)),
        },
        ColumnType::Integer => coerce_integer(value).map(Value::from),
        ColumnType::Float => coerce_float(value).and_then(float_value),
        ColumnType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(format!("expected boolean, got {}", other)),
        },
        ColumnType::Timestamp => match value {
            Value::String(s) => parse_timestamp(s)
                .map(|ts| Value::from(format_timestamp(&ts)))
                .ok_or_else(|| format!("invalid timestamp '{}'", s)),
            other => Err(format!("expected timestamp, got {}", other)),
        },
        ColumnType::Enum(allowed) => match value {
            Value::String(s) if allowed.contains(&s.as_str()) => Ok(value.clone()),
            other => Err(format!("{} is not one of {:?}", other, allowed)),
        },
        ColumnType::List | ColumnType::Set => match value {
            Value::Array(_) => Ok(value.clone()),
            other => Err(format!("expected array, got {}", other)),
        },
        ColumnType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            other => Err(format!("expected object, got {}", other)),
        },
        ColumnType::PriceTiers => coerce_tiers(value),
    }
}

fn coerce_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                    _ => Err(format!("expected integer, got {}", n)),
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected integer, got '{}'", s)),
        other => Err(format!("expected integer, got {}", other)),
    }
}

fn coerce_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("expected number, got {}", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("expected number, got '{}'", s)),
        other => Err(format!("expected number, got {}", other)),
    }
}

fn float_value(f: f64) -> Result<Value, String> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("non-finite number {}", f))
}

/// Tier bounds are numbers, or the string "Infinity" for an open upper bound
fn coerce_bound(value: Option<&Value>, name: &str) -> Result<(Value, f64), String> {
    match value {
        Some(Value::String(s)) if s == "Infinity" => Ok((Value::from("Infinity"), f64::INFINITY)),
        Some(v) => {
            let f = coerce_float(v).map_err(|e| format!("tier {}: {}", name, e))?;
            Ok((float_value(f)?, f))
        }
        None => Err(format!("tier is missing '{}'", name)),
    }
}

fn coerce_tiers(value: &Value) -> Result<Value, String> {
    let Value::Array(tiers) = value else {
        return Err(format!("expected array of price tiers, got {}", value));
    };

    let mut out = Vec::with_capacity(tiers.len());
    let mut previous_lower = f64::NEG_INFINITY;
    for tier in tiers {
        let Value::Object(fields) = tier else {
            return Err(format!("expected price tier object, got {}", tier));
        };
        let (lower, lower_f) = coerce_bound(fields.get("lower"), "lower")?;
        let (upper, upper_f) = coerce_bound(fields.get("upper"), "upper")?;
        let price = match fields.get("price") {
            Some(p) => float_value(coerce_float(p)?)?,
            None => return Err("tier is missing 'price'".to_string()),
        };
        if upper_f < lower_f {
            return Err(format!("tier upper bound {} is below lower bound {}", upper_f, lower_f));
        }
        if lower_f < previous_lower {
            return Err("tier bounds are not increasing".to_string());
        }
        previous_lower = lower_f;

        let mut normalized = Row::new();
        normalized.insert("lower".to_string(), lower);
        normalized.insert("upper".to_string(), upper);
        normalized.insert("price".to_string(), price);
        out.push(Value::Object(normalized));
    }
    Ok(Value::Array(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SERVER, SERVER_PRICE, ZONE};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn price_row() -> Row {
        row(json!({
            "vendor_id": "aws",
            "region_id": "us-east-1",
            "zone_id": "us-east-1a",
            "server_id": "m5.large",
            "operating_system": "Linux",
            "unit": "hour",
            "price": "0.096",
        }))
    }

    #[test]
    fn fills_defaults_and_coerces_strings() {
        let out = validate_row(&SERVER_PRICE, &price_row()).unwrap();
        assert_eq!(out["price"], json!(0.096));
        assert_eq!(out["allocation"], json!("ondemand"));
        assert_eq!(out["currency"], json!("USD"));
        assert_eq!(out["price_tiered"], json!([]));
        assert_eq!(out["status"], json!("active"));
        assert_eq!(out["observed_at"], Value::Null);
    }

    #[test]
    fn missing_required_field_names_table_key_and_field() {
        let mut r = price_row();
        r.remove("unit");
        let err = validate_row(&SERVER_PRICE, &r).unwrap_err();
        assert_eq!(err.table, "server_price");
        assert_eq!(err.field, "unit");
        assert_eq!(err.key, "aws/us-east-1/us-east-1a/m5.large/ondemand/Linux");
    }

    #[test]
    fn rejects_unknown_enum_value() {
        let mut r = price_row();
        r.insert("allocation".into(), json!("preemptible"));
        let err = validate_row(&SERVER_PRICE, &r).unwrap_err();
        assert_eq!(err.field, "allocation");
    }

    #[test]
    fn null_optional_key_becomes_sentinel() {
        let mut r = price_row();
        r.insert("zone_id".into(), Value::Null);
        let out = validate_row(&SERVER_PRICE, &r).unwrap();
        assert_eq!(out["zone_id"], json!(EMPTY_KEY));
    }

    #[test]
    fn null_in_required_key_is_rejected() {
        let r = row(json!({
            "vendor_id": "v", "region_id": null, "zone_id": "z",
            "name": "n", "api_reference": "a", "display_name": "d"
        }));
        let err = validate_row(&ZONE, &r).unwrap_err();
        assert_eq!(err.field, "region_id");
    }

    #[test]
    fn integer_accepts_whole_floats_only() {
        let base = json!({
            "vendor_id": "v", "server_id": "s", "name": "n", "api_reference": "a",
            "display_name": "d", "cpu_allocation": "Shared", "cpu_architecture": "x86_64",
            "memory_amount": 2048.0, "vcpus": 2
        });
        let out = validate_row(&SERVER, &row(base.clone())).unwrap();
        assert_eq!(out["memory_amount"], json!(2048));

        let mut bad = row(base);
        bad.insert("vcpus".into(), json!(1.5));
        assert_eq!(validate_row(&SERVER, &bad).unwrap_err().field, "vcpus");
    }

    #[test]
    fn price_tiers_must_increase() {
        let mut r = price_row();
        r.insert(
            "price_tiered".into(),
            json!([
                {"lower": 0, "upper": 100, "price": 0.1},
                {"lower": 100, "upper": "Infinity", "price": 0.05}
            ]),
        );
        let out = validate_row(&SERVER_PRICE, &r).unwrap();
        assert_eq!(out["price_tiered"][1]["upper"], json!("Infinity"));

        r.insert(
            "price_tiered".into(),
            json!([
                {"lower": 100, "upper": 200, "price": 0.1},
                {"lower": 0, "upper": 100, "price": 0.05}
            ]),
        );
        let err = validate_row(&SERVER_PRICE, &r).unwrap_err();
        assert_eq!(err.field, "price_tiered");
    }

    #[test]
    fn timestamps_are_normalized_to_utc_micros() {
        let ts = parse_timestamp("2024-03-01T12:00:00+01:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T11:00:00.000000Z");
    }

    #[test]
    fn undeclared_columns_are_dropped() {
        let mut r = price_row();
        r.insert("sku".into(), json!("abc"));
        let out = validate_row(&SERVER_PRICE, &r).unwrap();
        assert!(!out.contains_key("sku"));
    }
}
