//! SQL statements produced by the ingest path.

use std::fmt;

use crate::error::StatementPhase;
use crate::schema::{Column, Table, TIMESTAMP_FIELD};

pub const TABLE_COMMENT: &str = "created by gantry";

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn on_cluster(cluster: &Option<String>) -> String {
    match cluster {
        Some(c) if !c.is_empty() => format!(" ON CLUSTER {}", quote_identifier(c)),
        _ => String::new(),
    }
}

/// Secondary index created alongside a well known column.
pub fn index_statement(column: &str) -> Option<String> {
    match column {
        "severity" => Some("INDEX severity_idx severity TYPE set(25) GRANULARITY 4".to_string()),
        _ => None,
    }
}

/// Column definition inside `CREATE TABLE`.
pub fn column_definition(column: &Column) -> String {
    let mut s = format!("{} {}", quote_identifier(&column.name), column.column_type);
    if !column.modifiers.is_empty() {
        s.push(' ');
        s.push_str(&column.modifiers);
    }
    if !column.comment.is_empty() {
        s.push_str(" COMMENT ");
        s.push_str(&quote_string(&column.comment));
    }
    s
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableStatement {
    pub name: String,
    pub cluster: Option<String>,
    /// Rendered column definitions, in table order
    pub columns: Vec<String>,
    pub indexes: Vec<String>,
    pub comment: String,
    pub post_clause: String,
}

impl CreateTableStatement {
    /// Statement creating `table` with its current columns: the timestamp
    /// first, then the attribute maps, then every other column by name.
    pub fn for_table(table: &Table) -> Self {
        let columns = table.columns();
        let attribute_maps = table.config.attribute_map_columns();

        let mut ordered: Vec<&Column> = Vec::with_capacity(columns.len());
        if let Some(timestamp) = columns.get(TIMESTAMP_FIELD) {
            ordered.push(timestamp);
        }
        for name in &attribute_maps {
            if let Some(column) = columns.get(*name) {
                ordered.push(column);
            }
        }
        for (name, column) in columns.iter() {
            if name != TIMESTAMP_FIELD && !attribute_maps.contains(&name.as_str()) {
                ordered.push(column);
            }
        }

        Self {
            name: table.name.clone(),
            cluster: table.config.cluster_name.clone(),
            columns: ordered.into_iter().map(column_definition).collect(),
            indexes: table.indexes.clone(),
            comment: TABLE_COMMENT.to_string(),
            post_clause: table.config.post_clause(),
        }
    }

    pub fn to_sql(&self) -> String {
        let definitions: Vec<&str> = self
            .columns
            .iter()
            .chain(self.indexes.iter())
            .map(String::as_str)
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {}{}\n(\n\t{}\n)\n{}COMMENT {}",
            quote_identifier(&self.name),
            on_cluster(&self.cluster),
            definitions.join(",\n\t"),
            self.post_clause,
            quote_string(&self.comment)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterStatement {
    AddColumn {
        table: String,
        cluster: Option<String>,
        column: String,
        column_type: String,
    },
    CommentColumn {
        table: String,
        cluster: Option<String>,
        column: String,
        comment: String,
    },
}

impl AlterStatement {
    pub fn to_sql(&self) -> String {
        match self {
            AlterStatement::AddColumn {
                table,
                cluster,
                column,
                column_type,
            } => format!(
                "ALTER TABLE {}{} ADD COLUMN IF NOT EXISTS {} {}",
                quote_identifier(table),
                on_cluster(cluster),
                quote_identifier(column),
                column_type
            ),
            AlterStatement::CommentColumn {
                table,
                cluster,
                column,
                comment,
            } => format!(
                "ALTER TABLE {}{} COMMENT COLUMN {} {}",
                quote_identifier(table),
                on_cluster(cluster),
                quote_identifier(column),
                quote_string(comment)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    /// One JSON object per row
    pub rows: Vec<String>,
}

impl InsertStatement {
    pub fn to_sql(&self) -> String {
        format!(
            "INSERT INTO {} FORMAT JSONEachRow {}",
            quote_identifier(&self.table),
            self.rows.join(", ")
        )
    }
}

/// One statement of an ingest batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Create(CreateTableStatement),
    Alter(AlterStatement),
    Insert(InsertStatement),
}

impl Statement {
    pub fn phase(&self) -> StatementPhase {
        match self {
            Statement::Create(_) => StatementPhase::Create,
            Statement::Alter(_) => StatementPhase::Alter,
            Statement::Insert(_) => StatementPhase::Insert,
        }
    }

    pub fn is_ddl(&self) -> bool {
        !matches!(self, Statement::Insert(_))
    }

    pub fn to_sql(&self) -> String {
        match self {
            Statement::Create(s) => s.to_sql(),
            Statement::Alter(s) => s.to_sql(),
            Statement::Insert(s) => s.to_sql(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Batch order: the optional CREATE, every ALTER, then the INSERT.
pub fn batch(
    create: Option<CreateTableStatement>,
    alters: Vec<AlterStatement>,
    insert: InsertStatement,
) -> Vec<Statement> {
    let mut statements = Vec::with_capacity(alters.len() + 2);
    if let Some(create) = create {
        statements.push(Statement::Create(create));
    }
    statements.extend(alters.into_iter().map(Statement::Alter));
    statements.push(Statement::Insert(insert));
    statements
}
