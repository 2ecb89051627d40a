//! Normalization of raw source rows into fully decoded records.
//!
//! The contract is that downstream code never sees a partial or malformed
//! record: either normalization yields a complete [`NormalizedRecord`] ready
//! to insert, or the record is skipped with a diagnostic and `None` is
//! returned.

use tokio_postgres::Row;
use tracing::{debug, warn};

use crate::error::MarctabResult;
use crate::marc::{self, MarcRow};
use crate::types::TabRow;

/// The five header columns of one source row, as read from the database.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub id: Option<String>,
    pub matched_id: Option<String>,
    pub instance_hrid: Option<String>,
    pub state: Option<String>,
    pub data: Option<String>,
}

/// A validated, decoded source record.
///
/// `rows` is empty when the record is not current; such a record contributes
/// nothing to the output table.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub id: String,
    pub matched_id: String,
    pub instance_hrid: String,
    pub instance_id: String,
    pub rows: Vec<MarcRow>,
}

impl NormalizedRecord {
    /// Whether the record passed the currency filter and emits rows.
    pub fn is_current(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Expands the record into complete output rows.
    pub fn tab_rows(&self) -> impl Iterator<Item = TabRow> + '_ {
        self.rows.iter().map(|row| TabRow {
            srs_id: self.id.clone(),
            line: row.line,
            matched_id: self.matched_id.clone(),
            instance_hrid: self.instance_hrid.clone(),
            instance_id: self.instance_id.clone(),
            field: row.field.clone(),
            ind1: row.ind1.clone(),
            ind2: row.ind2.clone(),
            ord: row.ord,
            sf: row.sf.clone(),
            content: row.content.clone(),
        })
    }
}

/// Validates the header columns and decodes the MARC payload.
///
/// Returns `None` when the record must be skipped: a missing or blank id or
/// payload, or a payload that fails to parse. Each skip logs a diagnostic
/// and processing continues with the next record.
pub fn normalize(raw: &RawRecord) -> Option<NormalizedRecord> {
    let id = match &raw.id {
        Some(id) if !id.trim().is_empty() => id.clone(),
        _ => {
            warn!("skipping record: {}", id_data(raw));
            return None;
        }
    };
    debug!("updating: id={id}");
    let data = match &raw.data {
        Some(data) if !data.trim().is_empty() => data,
        _ => {
            warn!("skipping record: {}", id_data(raw));
            return None;
        }
    };
    let matched_id = raw.matched_id.clone().unwrap_or_default();
    let instance_hrid = raw.instance_hrid.clone().unwrap_or_default();
    let state = raw.state.clone().unwrap_or_default();
    let (rows, instance_id) = match marc::transform(data, &state) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!("skipping record: id={id}: {err}");
            return None;
        }
    };
    Some(NormalizedRecord {
        id,
        matched_id,
        instance_hrid,
        instance_id,
        rows,
    })
}

/// Reads the five header columns from a streamed source row.
///
/// All columns are projected as text by the source queries; any of them may
/// be null.
pub fn raw_from_row(row: &Row) -> MarctabResult<RawRecord> {
    Ok(RawRecord {
        id: row.try_get(0)?,
        matched_id: row.try_get(1)?,
        instance_hrid: row.try_get(2)?,
        state: row.try_get(3)?,
        data: row.try_get(4)?,
    })
}

fn id_data(raw: &RawRecord) -> String {
    format!("id={} data={}", null_str(&raw.id), null_str(&raw.data))
}

fn null_str(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(null)")
}
