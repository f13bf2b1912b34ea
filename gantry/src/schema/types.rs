use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::fmt;

/// Type name recorded for values whose type cannot be inferred.
pub const UNDEFINED_TYPE: &str = "Undefined";

/// A ClickHouse column type.
///
/// `Base` is a scalar (`String`, `Int64`, `DateTime64(3)`, `Map(String,String)`
/// is kept opaque as a base type too), `Compound` wraps one inner type
/// (`Array`, `LowCardinality`), `MultiValue` is a named tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Base { name: String, nullable: bool },
    Compound { name: String, inner: Box<ColumnType> },
    MultiValue { name: String, fields: Vec<(String, ColumnType)> },
}

impl ColumnType {
    pub fn base(name: &str) -> Self {
        ColumnType::Base {
            name: name.to_string(),
            nullable: false,
        }
    }

    pub fn nullable(name: &str) -> Self {
        ColumnType::Base {
            name: name.to_string(),
            nullable: true,
        }
    }

    pub fn array(inner: ColumnType) -> Self {
        ColumnType::Compound {
            name: "Array".to_string(),
            inner: Box::new(inner),
        }
    }

    pub fn tuple(fields: Vec<(String, ColumnType)>) -> Self {
        ColumnType::MultiValue {
            name: "Tuple".to_string(),
            fields,
        }
    }

    /// Name without parameters or `Nullable`: `DateTime64(3)` is `DateTime64`.
    pub fn base_name(&self) -> &str {
        match self {
            ColumnType::Base { name, .. } => match name.find('(') {
                Some(idx) if !name.starts_with("Map(") => &name[..idx],
                _ => name,
            },
            ColumnType::Compound { name, .. } | ColumnType::MultiValue { name, .. } => name,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, ColumnType::Base { nullable: true, .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ColumnType::Compound { name, .. } if name == "Array")
    }

    pub fn is_map(&self) -> bool {
        matches!(self, ColumnType::Base { name, .. } if name.starts_with("Map("))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, ColumnType::MultiValue { .. })
    }

    /// Look up a tuple member.
    pub fn field(&self, name: &str) -> Option<&ColumnType> {
        match self {
            ColumnType::MultiValue { fields, .. } => {
                fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
            }
            _ => None,
        }
    }

    /// Type used for a column inferred from a document.
    ///
    /// Scalars become `Nullable`; arrays, tuples and date-times never are.
    pub fn for_inferred_column(self) -> Self {
        let rendered = self.to_string();
        if rendered.contains("Array") || rendered.contains("Tuple") || rendered.contains("DateTime")
        {
            return self;
        }
        self.into_nullable()
    }

    /// Type used when an attribute is promoted to a column.
    pub fn for_promoted_column(self) -> Self {
        if self.is_array() || self.is_map() || self.is_tuple() {
            self
        } else {
            self.into_nullable()
        }
    }

    fn into_nullable(self) -> Self {
        match self {
            ColumnType::Base { name, .. } => ColumnType::Base {
                name,
                nullable: true,
            },
            other => other,
        }
    }

    /// Parse a type as printed by ClickHouse (`system.columns`, `CREATE TABLE`).
    pub fn parse(type_string: &str) -> Self {
        let s = type_string.trim();
        if let Some(inner) = strip_wrapper(s, "Nullable") {
            return match ColumnType::parse(inner) {
                ColumnType::Base { name, .. } => ColumnType::Base {
                    name,
                    nullable: true,
                },
                other => other,
            };
        }
        for wrapper in ["Array", "LowCardinality"] {
            if let Some(inner) = strip_wrapper(s, wrapper) {
                return ColumnType::Compound {
                    name: wrapper.to_string(),
                    inner: Box::new(ColumnType::parse(inner)),
                };
            }
        }
        if let Some(inner) = strip_wrapper(s, "Tuple") {
            let fields = split_top_level(inner)
                .into_iter()
                .filter_map(|member| {
                    let member = member.trim();
                    let (name, rest) = split_member_name(member)?;
                    Some((name, ColumnType::parse(rest)))
                })
                .collect();
            return ColumnType::tuple(fields);
        }
        ColumnType::base(s)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Base {
                name,
                nullable: true,
            } => write!(f, "Nullable({})", name),
            ColumnType::Base { name, .. } => f.write_str(name),
            ColumnType::Compound { name, inner } => write!(f, "{}({})", name, inner),
            ColumnType::MultiValue { name, fields } => {
                let members: Vec<String> = fields
                    .iter()
                    .map(|(n, t)| format!("{} {}", n, t.clone().for_inferred_column()))
                    .collect();
                write!(f, "{}({})", name, members.join(", "))
            }
        }
    }
}

fn strip_wrapper<'a>(s: &'a str, wrapper: &str) -> Option<&'a str> {
    s.strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }
    parts
}

fn split_member_name(member: &str) -> Option<(String, &str)> {
    for quote in ['"', '`'] {
        if let Some(rest) = member.strip_prefix(quote) {
            let end = rest.find(quote)?;
            return Some((rest[..end].to_string(), rest[end + 1..].trim()));
        }
    }
    let (name, rest) = member.split_once(char::is_whitespace)?;
    Some((name.to_string(), rest.trim()))
}

pub fn is_date_time(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
}

/// Infer the column type of a JSON value.
///
/// `None` means the value has no storable type: `null`, empty arrays and
/// objects, arrays mixing element types.
pub fn infer_type(value: &Value) -> Option<ColumnType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnType::base("Bool")),
        Value::String(s) => {
            if is_date_time(s) {
                Some(ColumnType::base("DateTime64"))
            } else {
                Some(ColumnType::base("String"))
            }
        }
        Value::Number(n) => Some(ColumnType::base(number_type(n))),
        Value::Object(members) => {
            if members.is_empty() {
                return None;
            }
            let mut fields = Vec::with_capacity(members.len());
            for (name, member) in members {
                fields.push((name.clone(), infer_type(member)?));
            }
            Some(ColumnType::tuple(fields))
        }
        Value::Array(elements) => {
            let mut element_type: Option<ColumnType> = None;
            let mut has_null = false;
            for element in elements {
                if element.is_null() {
                    has_null = true;
                    continue;
                }
                let current = infer_type(element)?;
                element_type = match element_type {
                    None => Some(current),
                    Some(previous) => Some(unify(previous, current)?),
                };
            }
            let element_type = element_type?;
            Some(ColumnType::array(if has_null {
                element_type.into_nullable()
            } else {
                element_type
            }))
        }
    }
}

fn number_type(n: &serde_json::Number) -> &'static str {
    if n.is_i64() {
        return "Int64";
    }
    if n.is_u64() {
        return "UInt64";
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => {
            if f >= i64::MIN as f64 && f < i64::MAX as f64 {
                "Int64"
            } else if f >= 0.0 && f < u64::MAX as f64 {
                "UInt64"
            } else {
                "Float64"
            }
        }
        _ => "Float64",
    }
}

/// Common element type of two array members, numbers widen to `Float64`.
fn unify(a: ColumnType, b: ColumnType) -> Option<ColumnType> {
    if a == b {
        return Some(a);
    }
    let numeric = ["Int64", "UInt64", "Float64"];
    if numeric.contains(&a.base_name()) && numeric.contains(&b.base_name()) {
        return Some(ColumnType::base("Float64"));
    }
    None
}

/// Inferred type name of a value, `Undefined` when it has none.
pub fn type_name_of(value: &Value) -> String {
    infer_type(value)
        .map(|t| t.to_string())
        .unwrap_or_else(|| UNDEFINED_TYPE.to_string())
}

/// A column of a registered table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    /// Extra DDL after the type, e.g. `DEFAULT now64()`
    pub modifiers: String,
    pub comment: String,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            modifiers: String::new(),
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: String) -> Self {
        self.comment = comment;
        self
    }

    /// Build from a type string that may carry a trailing `DEFAULT` clause.
    pub fn from_type_string(name: &str, type_string: &str) -> Self {
        let (type_part, modifiers) = match type_string.find(" DEFAULT") {
            Some(idx) => (&type_string[..idx], type_string[idx..].trim()),
            None => (type_string, ""),
        };
        Self {
            name: name.to_string(),
            column_type: ColumnType::parse(type_part),
            modifiers: modifiers.to_string(),
            comment: String::new(),
        }
    }
}
