//! Per-document ingest content
//!
//! For one document: validate it against the table's current columns,
//! split it into schema fields and overflow, promote frequent overflow
//! fields to columns, and assemble the row that gets inserted.

use crate::attributes::AttributeMap;
use crate::config::PromotionThresholds;
use crate::diagnostics::DedupLog;
use crate::differ::{difference, remove_non_schema_fields};
use crate::document::Document;
use crate::error::IngestError;
use crate::promotion::Promoter;
use crate::statements::{field_name_comment, AlterStatement};
use crate::validator::validate;
use jsonhouse_registry::{JsonStore, ManifestWriter, StoreError};
use jsonhouse_schema::{Column, Provenance, Table, Type};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

/// What one document contributes to a batch
#[derive(Debug, Clone, PartialEq)]
pub struct IngestContent {
    /// Column additions caused by this document, in application order
    pub alters: Vec<AlterStatement>,
    /// Schema fields plus the overflow map columns
    pub row: Document,
}

pub struct ContentGenerator {
    promoter: Promoter,
    manifests: ManifestWriter,
    dedup: DedupLog,
}

impl ContentGenerator {
    pub fn new(thresholds: PromotionThresholds, manifests: Arc<dyn JsonStore>) -> Self {
        Self {
            promoter: Promoter::new(thresholds),
            manifests: ManifestWriter::new(manifests),
            dedup: DedupLog::new(),
        }
    }

    /// Persists the manifest of a virtual table.
    pub fn store_manifest(&self, table: &Table) -> Result<(), StoreError> {
        self.manifests.write(table)
    }

    /// Builds the row for `document`. Validation runs against the columns
    /// as they are now, including ones promoted by earlier documents of
    /// the same batch. Promoted columns are added to `table` before the row
    /// is assembled, so promoted fields land in their new columns right
    /// away.
    pub fn generate(
        &self,
        table: &Table,
        mut document: Document,
        encodings: &BTreeMap<String, String>,
    ) -> Result<IngestContent, IngestError> {
        let invalid = validate(table, &mut document);
        let kinds = &table.config.attributes;
        if kinds.is_empty() {
            if !invalid.is_empty() {
                let fields: Vec<&str> = invalid.keys().map(String::as_str).collect();
                self.dedup.warn_once(
                    &table.name,
                    &format!(
                        "no attribute kinds configured, dropping fields that do not fit their columns: {}",
                        fields.join(", ")
                    ),
                );
            }
            return Ok(IngestContent {
                alters: Vec::new(),
                row: document,
            });
        }

        let columns = table.columns();
        let diff = difference(&document, &columns);
        if diff.is_empty() && invalid.is_empty() {
            return Ok(IngestContent {
                alters: Vec::new(),
                row: document,
            });
        }

        let mut attributes = AttributeMap::build(&table.name, &diff, kinds)?;

        // partial record diffs already have a column and are never promoted
        let candidates: Vec<String> = attributes
            .keys()
            .into_iter()
            .filter(|k| !columns.contains_key(k))
            .collect();
        let promote = self.promoter.should_promote(table, &candidates);
        let alters = if promote.is_empty() {
            Vec::new()
        } else {
            self.promote_columns(table, &attributes, &candidates, &promote, encodings)
        };

        let now_columns: HashSet<String> = candidates
            .into_iter()
            .filter(|k| table.has_column(k))
            .collect();
        attributes.remove_keys(&now_columns);

        let overflow = attributes.with_invalid_fields(&table.name, &invalid, kinds)?;
        let mut row = remove_non_schema_fields(document, &table.columns());
        row.extend(overflow.render());

        Ok(IngestContent { alters, row })
    }

    fn promote_columns(
        &self,
        table: &Table,
        attributes: &AttributeMap,
        candidates: &[String],
        promote: &[usize],
        encodings: &BTreeMap<String, String>,
    ) -> Vec<AlterStatement> {
        let mut new_columns = Vec::with_capacity(promote.len());
        for &index in promote {
            let Some(key) = candidates.get(index) else {
                continue;
            };
            let Some(ty) = attributes
                .entries()
                .iter()
                .find(|e| &e.key == key)
                .and_then(|e| e.ty.as_ref())
            else {
                debug!(table = %table.name, field = %key, "type undefined, not promoting");
                continue;
            };
            new_columns.push(
                Column::new(key.clone(), promoted_column_type(ty), Provenance::Promoted)
                    .with_comment(field_name_comment(key, encodings)),
            );
        }

        // only columns nobody added concurrently are altered
        let added = table.add_columns(new_columns);
        if added.is_empty() {
            return Vec::new();
        }

        if table.is_virtual {
            if let Err(e) = self.manifests.write(table) {
                error!(table = %table.name, error = %e, "error storing virtual table");
            }
        }

        added
            .iter()
            .flat_map(|column| {
                [
                    AlterStatement::add_column(table, column),
                    AlterStatement::comment_column(table, column),
                ]
            })
            .collect()
    }
}

/// Scalars become nullable; arrays and records keep nullability on their
/// leaves.
fn promoted_column_type(observed: &Type) -> Type {
    let ty = observed.to_column_type();
    if ty.is_scalar() {
        ty.into_nullable()
    } else {
        ty
    }
}
