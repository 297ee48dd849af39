//! Raw payload rows to canonical records.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use qdc_adapters::RawRecord;
use qdc_core::{CanonicalRecord, FieldKind, FieldValue, NaturalKey, SchemaMap};
use serde_json::Value as JsonValue;
use tracing::debug;

const KEY_DATE_FORMATS: [&str; 4] = ["%Y%m%d", "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// Renames and coerces fields per `schema`, then deduplicates by natural key
/// keeping the last occurrence. Output is ordered by natural key.
pub fn normalize(raw: &[RawRecord], schema: &SchemaMap) -> Vec<CanonicalRecord> {
    let mut by_key: BTreeMap<NaturalKey, BTreeMap<String, FieldValue>> = BTreeMap::new();

    for row in raw {
        let mut fields = map_fields(row, schema);
        match natural_key(&mut fields, schema) {
            Some(key) => {
                by_key.insert(key, fields);
            }
            None => debug!(date_field = %schema.date_field, "dropping row without a usable natural key"),
        }
    }

    by_key
        .into_iter()
        .map(|(natural_key, fields)| CanonicalRecord {
            natural_key,
            fields,
        })
        .collect()
}

/// Strips thousands separators and parses; anything unparseable or
/// non-finite stays as its original text.
pub fn coerce_numeric(value: &JsonValue) -> FieldValue {
    match value {
        JsonValue::Number(number) => number
            .as_f64()
            .filter(|v| v.is_finite())
            .map(FieldValue::Number)
            .unwrap_or_else(|| FieldValue::Text(number.to_string())),
        JsonValue::String(text) => {
            let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
            match cleaned.parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => FieldValue::Number(parsed),
                _ => FieldValue::Text(text.clone()),
            }
        }
        other => text_value(other),
    }
}

pub fn parse_key_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    KEY_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn text_value(value: &JsonValue) -> FieldValue {
    match value {
        JsonValue::String(text) => FieldValue::Text(text.clone()),
        JsonValue::Null => FieldValue::Text(String::new()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn map_fields(row: &RawRecord, schema: &SchemaMap) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();
    for (name, value) in row {
        if schema.is_excluded(name) {
            continue;
        }
        let (canonical, kind) = match schema.spec_for(name) {
            Some(spec) => (spec.canonical.clone(), spec.kind),
            None => match schema.unmapped {
                Some(kind) => (name.clone(), kind),
                None => continue,
            },
        };
        let converted = match kind {
            FieldKind::Numeric => coerce_numeric(value),
            FieldKind::Text => text_value(value),
        };
        fields.insert(canonical, converted);
    }
    fields
}

fn key_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => text.trim().to_string(),
        FieldValue::Number(number) => number.to_string(),
    }
}

/// Derives the key and rewrites the date field to ISO form.
fn natural_key(fields: &mut BTreeMap<String, FieldValue>, schema: &SchemaMap) -> Option<NaturalKey> {
    let date = fields
        .get(&schema.date_field)
        .map(key_text)
        .and_then(|text| parse_key_date(&text))?;
    fields.insert(
        schema.date_field.clone(),
        FieldValue::Text(date.format("%Y-%m-%d").to_string()),
    );

    match &schema.instrument_field {
        None => Some(NaturalKey::Date(date)),
        Some(field) => {
            let instrument_id = fields.get(field).map(key_text).filter(|id| !id.is_empty())?;
            Some(NaturalKey::DateInstrument {
                date,
                instrument_id,
            })
        }
    }
}
