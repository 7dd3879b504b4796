//! JSON <-> PostgreSQL value conversion
//!
//! Bind parameters arrive as JSON and are encoded into driver arguments.
//! Result columns are decoded by their PostgreSQL type into JSON values.
//! NUMERIC is rendered as exact decimal text, BYTEA as `\x` hex, network
//! addresses, MONEY and TIMETZ in their usual text shapes, and types without
//! a mapping as their text form or a `<TYPE>` placeholder naming the cast
//! that reads them.

use crate::core::{GatewayError, Result, Row};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Value};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgArguments, PgRow, PgValueFormat, PgValueRef};
use sqlx::{Arguments, Column, Row as _, TypeInfo, ValueRef};
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Encode JSON parameters positionally (`$1`, `$2`, ...).
///
/// Arrays and objects are sent as JSONB.
pub fn bind_arguments(params: &[Value]) -> Result<PgArguments> {
    let mut args = PgArguments::default();

    for (idx, value) in params.iter().enumerate() {
        let added: std::result::Result<(), BoxDynError> = match value {
            Value::Null => args.add(None::<String>),
            Value::Bool(b) => args.add(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    args.add(i)
                } else if let Some(f) = n.as_f64() {
                    args.add(f)
                } else {
                    Err(format!("unsupported number {}", n).into())
                }
            }
            Value::String(s) => args.add(s.clone()),
            Value::Array(_) | Value::Object(_) => args.add(sqlx::types::Json(value.clone())),
        };

        added.map_err(|e| {
            GatewayError::InvalidArguments(format!("parameter ${} could not be bound: {}", idx + 1, e))
        })?;
    }

    Ok(args)
}

/// Decode a result row into an ordered JSON object
pub fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())
            .map_err(|e| {
                GatewayError::Database(format!(
                    "Failed to decode column \"{}\": {}",
                    column.name(),
                    e
                ))
            })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "INT2" => json!(row.try_get::<i16, _>(idx)?),
        "INT4" => json!(row.try_get::<i32, _>(idx)?),
        "INT8" => json!(row.try_get::<i64, _>(idx)?),
        "OID" => json!(row.try_get::<Oid, _>(idx)?.0),
        "FLOAT4" => float_value(row.try_get::<f32, _>(idx)? as f64),
        "FLOAT8" => float_value(row.try_get::<f64, _>(idx)?),
        "NUMERIC" => wire_text(&raw, type_name, decode_numeric)?,
        "MONEY" => wire_text(&raw, type_name, decode_money)?,
        "INET" | "CIDR" => wire_text(&raw, type_name, decode_inet)?,
        "MACADDR" => wire_text(&raw, type_name, decode_macaddr)?,
        "TIMETZ" => wire_text(&raw, type_name, decode_timetz)?,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            Value::String(row.try_get::<String, _>(idx)?)
        }
        "\"CHAR\"" => {
            let c = row.try_get::<i8, _>(idx)?;
            Value::String(char::from(c as u8).to_string())
        }
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx)?,
        "UUID" => Value::String(row.try_get::<uuid::Uuid, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => Value::String(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339()),
        "TIMESTAMP" => Value::String(
            row.try_get::<NaiveDateTime, _>(idx)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        "INTERVAL" => {
            let interval = row.try_get::<PgInterval, _>(idx)?;
            json!({
                "months": interval.months,
                "days": interval.days,
                "microseconds": interval.microseconds,
            })
        }
        "BYTEA" => Value::String(hex_bytea(&row.try_get::<Vec<u8>, _>(idx)?)),
        "VOID" => Value::Null,
        "TEXT[]" | "VARCHAR[]" | "NAME[]" | "BPCHAR[]" => {
            json!(row.try_get_unchecked::<Vec<Option<String>>, _>(idx)?)
        }
        "INT2[]" => json!(row.try_get_unchecked::<Vec<Option<i16>>, _>(idx)?),
        "INT4[]" => json!(row.try_get_unchecked::<Vec<Option<i32>>, _>(idx)?),
        "INT8[]" => json!(row.try_get_unchecked::<Vec<Option<i64>>, _>(idx)?),
        "BOOL[]" => json!(row.try_get_unchecked::<Vec<Option<bool>>, _>(idx)?),
        "FLOAT8[]" => Value::Array(
            row.try_get_unchecked::<Vec<Option<f64>>, _>(idx)?
                .into_iter()
                .map(|f| f.map(float_value).unwrap_or(Value::Null))
                .collect(),
        ),
        "UUID[]" => json!(row
            .try_get_unchecked::<Vec<Option<uuid::Uuid>>, _>(idx)?
            .into_iter()
            .map(|u| u.map(|u| u.to_string()))
            .collect::<Vec<_>>()),
        "JSONB[]" | "JSON[]" => json!(row.try_get_unchecked::<Vec<Option<Value>>, _>(idx)?),
        other => match raw.format() {
            PgValueFormat::Text => Value::String(raw.as_str().map_err(sqlx::Error::Decode)?.to_string()),
            PgValueFormat::Binary => Value::String(format!("<{}> (select it as ::text)", other)),
        },
    };

    Ok(value)
}

/// Text of a value the driver has no type for, from its binary or text form
fn wire_text(
    raw: &PgValueRef<'_>,
    type_name: &str,
    decode: fn(&[u8]) -> Option<String>,
) -> std::result::Result<Value, sqlx::Error> {
    let text = match raw.format() {
        PgValueFormat::Binary => decode(raw.as_bytes().map_err(sqlx::Error::Decode)?)
            .ok_or_else(|| sqlx::Error::Decode(format!("malformed {} value", type_name).into()))?,
        PgValueFormat::Text => raw.as_str().map_err(sqlx::Error::Decode)?.to_string(),
    };
    Ok(Value::String(text))
}

fn hex_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Render a binary NUMERIC as exact decimal text.
///
/// Wire layout: ndigits, weight, sign, dscale (all 16 bit), then ndigits
/// base-10000 digit groups, most significant first. `weight` is the power of
/// 10000 of the first group.
pub fn decode_numeric(bytes: &[u8]) -> Option<String> {
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;
    const NUMERIC_PINF: u16 = 0xD000;
    const NUMERIC_NINF: u16 = 0xF000;

    let read_u16 = |at: usize| -> Option<u16> {
        Some(u16::from_be_bytes([*bytes.get(at)?, *bytes.get(at + 1)?]))
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i64;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2))
        .collect::<Option<Vec<u16>>>()?;
    let group = |index: i64| -> u16 {
        if index < 0 {
            0
        } else {
            digits.get(index as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", group(i));
            } else {
                let _ = write!(out, "{:04}", group(i));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut index = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", group(index));
            index += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Some(out)
}

/// MONEY is an int8 count of cents; rendered without a currency symbol
pub fn decode_money(bytes: &[u8]) -> Option<String> {
    let cents = i64::from_be_bytes(bytes.try_into().ok()?);
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    Some(format!("{}{}.{:02}", sign, abs / 100, abs % 100))
}

/// INET/CIDR wire layout: family, prefix bits, is_cidr flag, address
/// length, then the address bytes. An inet with a full-length prefix is
/// shown without it, as PostgreSQL does.
pub fn decode_inet(bytes: &[u8]) -> Option<String> {
    const FAMILY_INET: u8 = 2;
    const FAMILY_INET6: u8 = 3;

    let [family, bits, is_cidr, len, address @ ..] = bytes else {
        return None;
    };
    if address.len() != *len as usize {
        return None;
    }
    let (text, full) = match *family {
        FAMILY_INET => {
            let octets: [u8; 4] = address.try_into().ok()?;
            (Ipv4Addr::from(octets).to_string(), 32)
        }
        FAMILY_INET6 => {
            let octets: [u8; 16] = address.try_into().ok()?;
            (Ipv6Addr::from(octets).to_string(), 128)
        }
        _ => return None,
    };
    if *is_cidr == 0 && *bits == full {
        Some(text)
    } else {
        Some(format!("{}/{}", text, bits))
    }
}

pub fn decode_macaddr(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 6 {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// TIMETZ wire layout: microseconds since midnight (int8), then the zone
/// offset in seconds west of UTC (int4)
pub fn decode_timetz(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 12 {
        return None;
    }
    let micros = i64::from_be_bytes(bytes[..8].try_into().ok()?);
    let west = i32::from_be_bytes(bytes[8..].try_into().ok()?);

    let secs = u32::try_from(micros / 1_000_000).ok()?;
    let nanos = u32::try_from(micros % 1_000_000).ok()? * 1_000;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)?;

    let east = -west;
    let sign = if east < 0 { '-' } else { '+' };
    let offset = east.unsigned_abs();
    let mut out = format!("{}{}{:02}", time, sign, offset / 3600);
    if offset % 3600 != 0 {
        let _ = write!(out, ":{:02}", offset % 3600 / 60);
    }
    Some(out)
}
