//! Lowering of prepared documents into a statement batch.

use std::sync::Arc;

use super::attributes::{
    add_invalid_fields, build_attributes, insert_json, non_schema_fields, AttributesByBucket,
};
use super::columns::{difference_map, remove_non_schema_fields};
use super::ddl::{batch, AlterStatement, CreateTableStatement, InsertStatement, Statement};
use super::evolution::FieldStatistics;
use super::transform::Document;
use crate::comment_metadata::CommentMetadata;
use crate::common_table::store_virtual_table;
use crate::schema::{reverse_encodings, Column, ColumnType, FieldEncodings, Table, UNDEFINED_TYPE};
use crate::Result;
use gantry_storage::VirtualTableStorage;

/// Output of lowering one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestContent {
    pub alters: Vec<AlterStatement>,
    /// JSON object for `INSERT ... FORMAT JSONEachRow`
    pub row: String,
}

pub struct SqlLowerer {
    statistics: FieldStatistics,
    storage: Arc<dyn VirtualTableStorage>,
}

impl SqlLowerer {
    pub fn new(statistics: FieldStatistics, storage: Arc<dyn VirtualTableStorage>) -> Self {
        Self {
            statistics,
            storage,
        }
    }

    pub fn statistics(&self) -> &FieldStatistics {
        &self.statistics
    }

    /// Lower one document: promote new fields to columns where the
    /// evolution policy allows it, pack the rest into the attribute maps.
    pub async fn generate_ingest_content(
        &self,
        table: &Table,
        data: Document,
        invalid: &Document,
        encodings: &FieldEncodings,
    ) -> Result<IngestContent> {
        let attributes = &table.config.attributes;
        if attributes.is_empty() {
            return Ok(IngestContent {
                alters: Vec::new(),
                row: insert_json(data, None)?,
            });
        }

        let diff = difference_map(&data, table);
        if diff.is_empty() && invalid.is_empty() {
            return Ok(IngestContent {
                alters: Vec::new(),
                row: insert_json(data, None)?,
            });
        }

        let mut packed = build_attributes(&diff, attributes)?;
        self.statistics.record_ingest();
        let alters = self
            .generate_new_columns(&mut packed, table, encodings)
            .await?;

        add_invalid_fields(&mut packed, invalid, attributes);
        let non_schema = non_schema_fields(&packed, attributes);
        let schema_fields = remove_non_schema_fields(data, table);
        Ok(IngestContent {
            alters,
            row: insert_json(schema_fields, non_schema)?,
        })
    }

    /// Turn promotable attribute entries into columns of `table`. Promoted
    /// entries are removed from `packed`.
    pub async fn generate_new_columns(
        &self,
        packed: &mut AttributesByBucket,
        table: &Table,
        encodings: &FieldEncodings,
    ) -> Result<Vec<AlterStatement>> {
        let entries: Vec<_> = packed.entries().cloned().collect();
        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        let promote = self.statistics.promotable(table, &keys);
        if promote.is_empty() {
            return Ok(Vec::new());
        }

        let reverse = reverse_encodings(encodings, &table.name);
        let mut alters = Vec::with_capacity(promote.len() * 2);
        let mut columns = Vec::with_capacity(promote.len());
        let mut promoted_keys = Vec::with_capacity(promote.len());
        for i in promote {
            let entry = &entries[i];
            if entry.value_type == UNDEFINED_TYPE {
                continue;
            }
            let column_type = ColumnType::parse(&entry.value_type).for_promoted_column();
            let original = reverse.get(&entry.key).unwrap_or(&entry.key);
            let comment = CommentMetadata::for_field(original).marshal();

            alters.push(AlterStatement::AddColumn {
                table: table.name.clone(),
                cluster: table.config.cluster_name.clone(),
                column: entry.key.clone(),
                column_type: column_type.to_string(),
            });
            alters.push(AlterStatement::CommentColumn {
                table: table.name.clone(),
                cluster: table.config.cluster_name.clone(),
                column: entry.key.clone(),
                comment: comment.clone(),
            });
            columns.push(Column::new(&entry.key, column_type).with_comment(comment));
            promoted_keys.push(entry.key.clone());
        }

        let added = table.add_columns(columns);
        if added > 0 {
            metrics::counter!("gantry_ingest_promoted_columns_total").increment(added as u64);
            tracing::debug!("promoted {} fields to columns of {}", added, table.name);
            if table.virtual_table {
                store_virtual_table(table, self.storage.as_ref()).await?;
            }
        }
        packed.remove_keys(&promoted_keys);
        Ok(alters)
    }

    /// Statements for one batch: the optional CREATE, every ALTER, then one
    /// INSERT holding all rows. `invalid[i]` holds the rejected fields of
    /// `documents[i]`.
    pub async fn lower_to_ddl(
        &self,
        table: &Table,
        create: Option<CreateTableStatement>,
        documents: Vec<Document>,
        invalid: &[Document],
        encodings: &FieldEncodings,
    ) -> Result<Vec<Statement>> {
        let empty = Document::new();
        let mut alters = Vec::new();
        let mut rows = Vec::with_capacity(documents.len());
        for (i, document) in documents.into_iter().enumerate() {
            let rejected = invalid.get(i).unwrap_or(&empty);
            let content = self
                .generate_ingest_content(table, document, rejected, encodings)
                .await?;
            alters.extend(content.alters);
            rows.push(content.row);
        }
        let insert = InsertStatement {
            table: table.name.clone(),
            rows,
        };
        Ok(batch(create, alters, insert))
    }
}
