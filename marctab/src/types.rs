use serde::{Deserialize, Serialize};

/// Column names of the output table, in table order.
///
/// This order is shared by the bulk COPY during a full build, the row
/// inserts during an incremental update, and the CSV egress.
pub const COLUMNS: [&str; 11] = [
    "srs_id",
    "line",
    "matched_id",
    "instance_hrid",
    "instance_id",
    "field",
    "ind1",
    "ind2",
    "ord",
    "sf",
    "content",
];

/// One complete row of the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabRow {
    pub srs_id: String,
    pub line: i16,
    pub matched_id: String,
    pub instance_hrid: String,
    pub instance_id: String,
    pub field: String,
    pub ind1: String,
    pub ind2: String,
    pub ord: i16,
    pub sf: String,
    pub content: String,
}
