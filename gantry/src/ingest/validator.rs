//! Checks document values against the types of existing columns.
//!
//! Values that do not fit their column are taken out of the row and stored
//! in the attribute maps instead.

use serde_json::{Number, Value};

use super::transform::Document;
use crate::schema::{infer_type, ColumnType, Table};

/// Inclusive range of an integer column type.
fn integer_range(type_name: &str) -> Option<(f64, f64)> {
    let range = match type_name {
        "UInt8" => (0.0, u8::MAX as f64),
        "UInt16" => (0.0, u16::MAX as f64),
        "UInt32" => (0.0, u32::MAX as f64),
        "UInt64" => (0.0, u64::MAX as f64),
        "UInt128" => (0.0, u128::MAX as f64),
        "UInt256" => (0.0, 2f64.powi(256) - 1.0),
        "Int8" => (i8::MIN as f64, i8::MAX as f64),
        "Int16" => (i16::MIN as f64, i16::MAX as f64),
        "Int32" => (i32::MIN as f64, i32::MAX as f64),
        "Int64" => (i64::MIN as f64, i64::MAX as f64),
        "Int128" => (i128::MIN as f64, i128::MAX as f64),
        "Int256" => (-(2f64.powi(255)), 2f64.powi(255) - 1.0),
        _ => return None,
    };
    Some(range)
}

fn is_float_type(type_name: &str) -> bool {
    matches!(type_name, "Float32" | "Float64")
}

fn is_integer_type(type_name: &str) -> bool {
    integer_range(type_name).is_some()
}

/// Exact integer bounds for types that fit in 128 bits.
fn exact_bounds(type_name: &str) -> Option<(i128, i128)> {
    let bounds = match type_name {
        "UInt8" => (0, u8::MAX as i128),
        "UInt16" => (0, u16::MAX as i128),
        "UInt32" => (0, u32::MAX as i128),
        "UInt64" => (0, u64::MAX as i128),
        "Int8" => (i8::MIN as i128, i8::MAX as i128),
        "Int16" => (i16::MIN as i128, i16::MAX as i128),
        "Int32" => (i32::MIN as i128, i32::MAX as i128),
        "Int64" => (i64::MIN as i128, i64::MAX as i128),
        "Int128" => (i128::MIN, i128::MAX),
        _ => return None,
    };
    Some(bounds)
}

fn integer_in_range(type_name: &str, value: i128) -> bool {
    match exact_bounds(type_name) {
        Some((min, max)) => value >= min && value <= max,
        None => integer_range(type_name)
            .is_some_and(|(min, max)| (value as f64) >= min && (value as f64) <= max),
    }
}

fn number_in_range(type_name: &str, n: &Number) -> bool {
    if let Some(i) = n.as_i64() {
        return integer_in_range(type_name, i as i128);
    }
    if let Some(u) = n.as_u64() {
        return integer_in_range(type_name, u as i128);
    }
    match (n.as_f64(), integer_range(type_name)) {
        (Some(f), Some((min, max))) => f.fract() == 0.0 && f >= min && f <= max,
        _ => false,
    }
}

fn validate_numeric(column_type: &str, value: &Value) -> bool {
    match value {
        Value::Number(_) if is_float_type(column_type) => true,
        Value::Number(n) => {
            let integral = infer_type(value).is_some_and(|t| t.base_name() != "Float64");
            integral && number_in_range(column_type, n)
        }
        Value::String(s) if is_float_type(column_type) => s.trim().parse::<f64>().is_ok(),
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .is_ok_and(|i| integer_in_range(column_type, i)),
        _ => false,
    }
}

/// Whether `value` can be stored in a column of `column_type`.
pub fn validate_value_against_type(value: &Value, column_type: &ColumnType) -> bool {
    match column_type {
        ColumnType::Base { .. } => {
            let column_name = column_type.base_name();
            if (is_float_type(column_name) || is_integer_type(column_name))
                && validate_numeric(column_name, value)
            {
                return true;
            }
            let Some(incoming) = infer_type(value) else {
                return false;
            };
            let incoming_name = incoming.base_name();
            match column_name {
                "String" => value.is_string(),
                "Date" | "DateTime" | "DateTime64" => {
                    incoming_name == "DateTime64" || incoming_name == column_name
                }
                _ => matches!(incoming, ColumnType::Base { .. }) && incoming_name == column_name,
            }
        }
        ColumnType::Compound { name, inner } if name == "LowCardinality" => {
            validate_value_against_type(value, inner)
        }
        ColumnType::Compound { name, inner } if name == "Array" => match value {
            Value::Array(elements) => elements
                .iter()
                .all(|element| element.is_null() || validate_value_against_type(element, inner)),
            _ => false,
        },
        ColumnType::Compound { name, .. } => {
            tracing::error!("validation of {} columns is not supported", name);
            false
        }
        ColumnType::MultiValue { .. } => match value {
            Value::Object(members) => members.iter().all(|(key, member)| {
                column_type.field(key).is_some_and(|member_type| {
                    member.is_null() || validate_value_against_type(member, member_type)
                })
            }),
            _ => false,
        },
    }
}

/// Split `document` into the fields that fit `table` and those that do not.
/// Null values and fields without a column always count as valid.
pub fn split_invalid(table: &Table, document: Document) -> (Document, Document) {
    let columns = table.columns();
    let mut valid = Document::new();
    let mut invalid = Document::new();
    for (name, value) in document {
        let fits = value.is_null()
            || columns
                .get(&name)
                .map_or(true, |column| validate_value_against_type(&value, &column.column_type));
        if fits {
            valid.insert(name, value);
        } else {
            invalid.insert(name, value);
        }
    }
    (valid, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, TableConfig};
    use serde_json::json;

    fn check(value: Value, column_type: &str) -> bool {
        validate_value_against_type(&value, &ColumnType::parse(column_type))
    }

    #[test]
    fn test_integer_ranges() {
        assert!(check(json!(255), "UInt8"));
        assert!(!check(json!(256), "UInt8"));
        assert!(!check(json!(-1), "UInt8"));
        assert!(check(json!(-128), "Int8"));
        assert!(!check(json!(-129), "Int8"));
        assert!(check(json!(u64::MAX), "UInt64"));
        assert!(!check(json!(u64::MAX), "Int64"));
        assert!(check(json!(42), "Nullable(Int32)"));
        assert!(!check(json!(1.5), "Int64"));
    }

    #[test]
    fn test_numeric_strings() {
        assert!(check(json!("42"), "Int64"));
        assert!(!check(json!("300"), "UInt8"));
        assert!(!check(json!("abc"), "Int64"));
        assert!(check(json!("1.5"), "Float64"));
        assert!(!check(json!("x1.5"), "Float32"));
    }

    #[test]
    fn test_floats_accept_any_number() {
        assert!(check(json!(1), "Float64"));
        assert!(check(json!(1.25), "Nullable(Float32)"));
        assert!(!check(json!(true), "Float64"));
    }

    #[test]
    fn test_exact_base_types() {
        assert!(check(json!("hello"), "String"));
        assert!(check(json!("hello"), "LowCardinality(String)"));
        assert!(check(json!("2024-01-01T00:00:00Z"), "Nullable(String)"));
        assert!(!check(json!(1), "String"));
        assert!(check(json!(true), "Bool"));
        assert!(!check(json!("true"), "Bool"));
        assert!(check(json!("2024-01-01T00:00:00Z"), "DateTime64(3)"));
        assert!(!check(json!("yesterday"), "DateTime64(3)"));
    }

    #[test]
    fn test_arrays_and_tuples() {
        assert!(check(json!([1, 2]), "Array(Int64)"));
        assert!(!check(json!([1, "x"]), "Array(Int64)"));
        assert!(!check(json!(1), "Array(Int64)"));
        assert!(check(json!({"a": 1, "b": "x"}), "Tuple(a Nullable(Int64), b Nullable(String))"));
        assert!(!check(json!({"c": 1}), "Tuple(a Nullable(Int64))"));
        assert!(!check(json!({"a": "x"}), "Tuple(a Nullable(Int64))"));
    }

    #[test]
    fn test_split_invalid() {
        let table = Table::new(
            "t",
            TableConfig::default(),
            vec![
                Column::new("age", ColumnType::nullable("Int64")),
                Column::new("name", ColumnType::nullable("String")),
            ],
        );
        let document = json!({"age": "old", "name": "x", "other": 1, "n": null});
        let (valid, invalid) = split_invalid(&table, document.as_object().cloned().unwrap());
        assert_eq!(Value::Object(valid), json!({"name": "x", "other": 1, "n": null}));
        assert_eq!(Value::Object(invalid), json!({"age": "old"}));
    }
}
