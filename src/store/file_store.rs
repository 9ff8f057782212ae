//! File-backed tabular ledger store, one table file per group.
//!
//! Each group's ledger lives in `<data_dir>/<safe_name>.table.json` as a JSON
//! grid of string cells, mirroring the collaborator's get-all-values
//! contract. Every write replaces the whole file, so the safety check runs
//! first: a rewrite that would drop a previously archived section is aborted
//! rather than risk silent history loss.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::LedgerTable;

use super::{schema, StoreError};

const TABLE_FILE_SUFFIX: &str = ".table.json";

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    group: String,
    rows: Vec<Vec<String>>,
}

pub struct FileLedgerStore {
    data_dir: PathBuf,
}

impl FileLedgerStore {
    pub fn new(data_dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn table_path(&self, group: &str) -> PathBuf {
        let safe: String = group
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.data_dir.join(format!("{}{}", safe, TABLE_FILE_SUFFIX))
    }

    /// Raw grid rows for a group, or None if no table exists yet.
    pub fn read_rows(&self, group: &str) -> Result<Option<Vec<Vec<String>>>, StoreError> {
        let path = self.table_path(group);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let file: TableFile = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
        Ok(Some(file.rows))
    }

    /// Read and normalize a group's table. `today` drives legacy-format
    /// month inference.
    pub fn read_table(&self, group: &str, today: NaiveDate) -> Result<LedgerTable, StoreError> {
        match self.read_rows(group)? {
            Some(rows) => schema::from_rows(&rows, today),
            None => Ok(LedgerTable::default()),
        }
    }

    /// Rewrite a group's table wholesale.
    ///
    /// Before committing, every archived section present in the stored file
    /// must still be present (same label, no fewer sections) in the new
    /// output; otherwise the write is refused.
    pub fn write_table(&self, group: &str, table: &LedgerTable) -> Result<(), StoreError> {
        let new_rows = schema::to_rows(table);
        let new_labels = schema::archived_labels(&new_rows);

        if let Some(existing) = self.read_rows(group)? {
            let old_labels = schema::archived_labels(&existing);
            verify_archives_preserved(group, &old_labels, &new_labels)?;
        }

        let file = TableFile {
            group: group.to_string(),
            rows: new_rows,
        };
        let path = self.table_path(group);
        let contents = serde_json::to_string_pretty(&file)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        // Write to a sibling temp file and rename over the target, so a
        // crash mid-write can never leave a half-written table behind.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        debug!(group, path = %path.display(), archived = new_labels.len(), "wrote ledger table");
        Ok(())
    }

    /// Delete a group's table. Used by tests and operator tooling.
    pub fn remove(&self, group: &str) -> Result<(), StoreError> {
        let path = self.table_path(group);
        if path.exists() {
            std::fs::remove_file(&path)?;
            info!(group, "removed ledger table");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn verify_archives_preserved(
    group: &str,
    old_labels: &[String],
    new_labels: &[String],
) -> Result<(), StoreError> {
    if new_labels.len() < old_labels.len() {
        return Err(StoreError::ArchiveLoss {
            group: group.to_string(),
            detail: format!(
                "output has {} archived sections, stored table has {}",
                new_labels.len(),
                old_labels.len()
            ),
        });
    }
    for label in old_labels {
        if !new_labels.contains(label) {
            return Err(StoreError::ArchiveLoss {
                group: group.to_string(),
                detail: format!("archived section '{}' missing from output", label),
            });
        }
    }
    Ok(())
}
