//! Incremental reconciliation of the published table against the source.
//!
//! The change oracle is the checksum side table: source ids missing from it
//! are additions, checksum ids missing from the source are deletions, and
//! ids whose freshly computed checksum differs from the stored one are
//! changes. The three phases run in that fixed order.
//!
//! Two connections are required: the streaming change cursor runs on the
//! read connection while all writes go to a second connection, inside one
//! transaction per phase. A failed phase rolls back alone; phases committed
//! before it remain, and the next run re-diffs and converges.

use futures::{TryStreamExt, pin_mut};
use marctab_config::Locations;
use tokio_postgres::Statement;
use tokio_postgres::types::Type;
use tracing::{debug, info};

use crate::bail;
use crate::checksum::md5_expr;
use crate::client::PgClient;
use crate::error::{ErrorKind, MarctabError, MarctabResult};
use crate::schema::{self, CKSUM_TABLE, METADATA_TABLE, SCHEMA};
use crate::source::{normalize, raw_from_row};
use crate::types::COLUMNS;

/// Version of the on-disk layout: the output columns, the checksum
/// semantics, and the side tables. A stored version different from this one
/// forces a full build.
pub const SCHEMA_VERSION: i32 = 3;

const ADD_TABLE: &str = "marctab.inc_add";
const DELETE_TABLE: &str = "marctab.inc_delete";
const CHANGE_TABLE: &str = "marctab.inc_change";

/// Reports whether an incremental update is possible: the metadata table
/// exists and its stored version matches [`SCHEMA_VERSION`].
pub async fn inc_update_available(client: &PgClient) -> MarctabResult<bool> {
    let exists = client
        .query_opt(&format!(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = '{SCHEMA}' AND table_name = 'metadata'"
        ))
        .await?;
    if exists.is_none() {
        return Ok(false);
    }
    let row = client
        .query_opt(&format!(
            "SELECT version FROM {METADATA_TABLE} ORDER BY version LIMIT 1"
        ))
        .await?;
    let Some(row) = row else {
        bail!(ErrorKind::InvalidState, "schema version number not found");
    };
    let version: i32 = row.try_get(0)?;
    Ok(version == SCHEMA_VERSION)
}

/// SELECT populating the checksum table: one row per current source record
/// whose instance identifier is materialized in the published table.
pub fn create_cksum_select_sql(loc: &Locations) -> String {
    format!(
        "SELECT r.id::uuid, {} FROM {} r JOIN {} m ON r.id = m.id \
         WHERE coalesce(r.state::text, '') = 'ACTUAL' AND EXISTS (\
         SELECT 1 FROM {} t WHERE t.srs_id = r.id::text AND t.field = '999' \
         AND t.ind1 = 'f' AND t.ind2 = 'f' AND t.sf = 'i' AND t.content <> '')",
        md5_expr(&loc.srs_marc_attr),
        loc.srs_records,
        loc.srs_marc,
        loc.table_final()
    )
}

/// Rebuilds the checksum and metadata tables from scratch, inside one
/// transaction. Invoked at the end of a full build.
pub async fn create_cksum(client: &PgClient, loc: &Locations) -> MarctabResult<()> {
    client.batch("BEGIN").await?;
    let result = create_cksum_tx(client, loc).await;
    if result.is_err() {
        let _ = client.batch("ROLLBACK").await;
        return result;
    }
    client.batch("COMMIT").await?;
    Ok(())
}

async fn create_cksum_tx(client: &PgClient, loc: &Locations) -> MarctabResult<()> {
    client
        .execute(&format!("DROP TABLE IF EXISTS {CKSUM_TABLE}"))
        .await?;
    client
        .execute(&format!(
            "CREATE TABLE {CKSUM_TABLE} (id uuid NOT NULL, cksum text) WITH (fillfactor = 80)"
        ))
        .await?;
    client
        .execute(&format!(
            "INSERT INTO {CKSUM_TABLE} (id, cksum) {}",
            create_cksum_select_sql(loc)
        ))
        .await?;
    client
        .execute(&format!(
            "ALTER TABLE {CKSUM_TABLE} ADD CONSTRAINT cksum_pkey \
             PRIMARY KEY (id) WITH (fillfactor = 80)"
        ))
        .await?;
    client
        .execute(&format!("DROP TABLE IF EXISTS {METADATA_TABLE}"))
        .await?;
    client
        .execute(&format!(
            "CREATE TABLE {METADATA_TABLE} AS SELECT {SCHEMA_VERSION} AS version"
        ))
        .await?;
    Ok(())
}

/// Runs the three reconciliation phases, then vacuums the touched tables.
pub async fn inc_update(
    read: &PgClient,
    write: &PgClient,
    loc: &Locations,
    vacuum: bool,
) -> MarctabResult<()> {
    update_add(read, write, loc).await?;
    update_delete(write, loc).await?;
    update_change(read, write, loc).await?;
    if vacuum {
        info!("vacuuming");
        schema::vacuum_analyze(write, &loc.table_final()).await?;
        schema::vacuum_analyze(write, CKSUM_TABLE).await?;
        schema::vacuum_analyze(write, METADATA_TABLE).await?;
    }
    Ok(())
}

/// Keyset SELECT for the addition phase: source ids with no checksum row.
pub fn add_select_sql(loc: &Locations) -> String {
    format!(
        "SELECT r.id FROM {} r LEFT JOIN {CKSUM_TABLE} c ON r.id::uuid = c.id \
         WHERE c.id IS NULL",
        loc.srs_records
    )
}

/// Keyset SELECT for the deletion phase: checksum ids gone from the source.
pub fn delete_select_sql(loc: &Locations) -> String {
    format!(
        "SELECT c.id FROM {} r RIGHT JOIN {CKSUM_TABLE} c ON r.id::uuid = c.id \
         WHERE r.id IS NULL",
        loc.srs_records
    )
}

/// Keyset SELECT for the change phase: ids whose fresh checksum differs.
pub fn change_select_sql(loc: &Locations) -> String {
    format!(
        "SELECT r.id FROM {} r JOIN {CKSUM_TABLE} c ON r.id::uuid = c.id \
         JOIN {} m ON r.id = m.id WHERE {} <> c.cksum",
        loc.srs_records,
        loc.srs_marc,
        md5_expr(&loc.srs_marc_attr)
    )
}

/// Streaming SELECT of the joined header, payload, and fresh checksum for
/// every id in a work table.
pub fn filter_query(loc: &Locations, work_table: &str) -> String {
    format!(
        "SELECT r.id::text, r.matched_id::text, r.external_hrid::text instance_hrid, \
         r.state::text, m.{}::text, {} cksum \
         FROM {} r JOIN {work_table} f ON r.id = f.id JOIN {} m ON r.id = m.id",
        loc.srs_marc_attr,
        md5_expr(&loc.srs_marc_attr),
        loc.srs_records,
        loc.srs_marc
    )
}

fn insert_row_sql(table_final: &str) -> String {
    format!(
        "INSERT INTO {table_final} ({}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        COLUMNS.join(", ")
    )
}

/// The work tables are visible from both connections, so they are created
/// outside the phase transaction and dropped after it commits.
async fn create_work_table(
    write: &PgClient,
    name: &str,
    select_sql: &str,
    pkey: &str,
) -> MarctabResult<()> {
    write
        .execute(&format!("DROP TABLE IF EXISTS {name}"))
        .await?;
    write
        .execute(&format!("CREATE TABLE {name} AS {select_sql}"))
        .await?;
    write
        .execute(&format!(
            "ALTER TABLE {name} ADD CONSTRAINT {pkey} PRIMARY KEY (id)"
        ))
        .await?;
    Ok(())
}

async fn drop_work_table(write: &PgClient, name: &str) -> MarctabResult<()> {
    write
        .execute(&format!("DROP TABLE IF EXISTS {name}"))
        .await?;
    Ok(())
}

async fn update_add(read: &PgClient, write: &PgClient, loc: &Locations) -> MarctabResult<()> {
    create_work_table(write, ADD_TABLE, &add_select_sql(loc), "inc_add_pkey").await?;
    let insert_row = write.prepare(&insert_row_sql(&loc.table_final())).await?;
    let insert_cksum = write
        .prepare_typed(
            &format!("INSERT INTO {CKSUM_TABLE} (id, cksum) VALUES ($1::uuid, $2)"),
            &[Type::TEXT, Type::TEXT],
        )
        .await?;

    write.batch("BEGIN").await?;
    match apply_adds(read, write, loc, &insert_row, &insert_cksum).await {
        Ok(count) => {
            write.batch("COMMIT").await?;
            info!("{count} records added");
        }
        Err(err) => {
            let _ = write.batch("ROLLBACK").await;
            return Err(err);
        }
    }
    drop_work_table(write, ADD_TABLE).await
}

async fn apply_adds(
    read: &PgClient,
    write: &PgClient,
    loc: &Locations,
    insert_row: &Statement,
    insert_cksum: &Statement,
) -> MarctabResult<u64> {
    let stream = read.query_stream(&filter_query(loc, ADD_TABLE)).await?;
    pin_mut!(stream);
    let mut count = 0u64;
    while let Some(row) = stream.try_next().await.map_err(MarctabError::from)? {
        let raw = raw_from_row(&row)?;
        let cksum: String = row.try_get(5)?;
        let Some(record) = normalize(&raw) else {
            continue;
        };
        if !record.is_current() {
            continue;
        }
        for tab in record.tab_rows() {
            write
                .execute_stmt(
                    insert_row,
                    &[
                        &tab.srs_id,
                        &tab.line,
                        &tab.matched_id,
                        &tab.instance_hrid,
                        &tab.instance_id,
                        &tab.field,
                        &tab.ind1,
                        &tab.ind2,
                        &tab.ord,
                        &tab.sf,
                        &tab.content,
                    ],
                )
                .await?;
        }
        write
            .execute_stmt(insert_cksum, &[&record.id, &cksum])
            .await?;
        count += 1;
    }
    Ok(count)
}

async fn update_delete(write: &PgClient, loc: &Locations) -> MarctabResult<()> {
    create_work_table(write, DELETE_TABLE, &delete_select_sql(loc), "inc_delete_pkey").await?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        let rows = write
            .query(&format!("SELECT id::text FROM {DELETE_TABLE}"))
            .await?;
        for row in rows {
            let id: String = row.try_get(0)?;
            debug!("removing: id={id}");
        }
    }

    write.batch("BEGIN").await?;
    match apply_deletes(write, loc).await {
        Ok(count) => {
            write.batch("COMMIT").await?;
            info!("{count} records removed");
        }
        Err(err) => {
            let _ = write.batch("ROLLBACK").await;
            return Err(err);
        }
    }
    drop_work_table(write, DELETE_TABLE).await
}

async fn apply_deletes(write: &PgClient, loc: &Locations) -> MarctabResult<u64> {
    let count = write
        .execute(&format!(
            "DELETE FROM {} WHERE srs_id IN (SELECT id::text FROM {DELETE_TABLE})",
            loc.table_final()
        ))
        .await?;
    write
        .execute(&format!(
            "DELETE FROM {CKSUM_TABLE} WHERE id IN (SELECT id FROM {DELETE_TABLE})"
        ))
        .await?;
    Ok(count)
}

async fn update_change(read: &PgClient, write: &PgClient, loc: &Locations) -> MarctabResult<()> {
    create_work_table(write, CHANGE_TABLE, &change_select_sql(loc), "inc_change_pkey").await?;
    let insert_row = write.prepare(&insert_row_sql(&loc.table_final())).await?;
    let insert_cksum = write
        .prepare_typed(
            &format!("INSERT INTO {CKSUM_TABLE} (id, cksum) VALUES ($1::uuid, $2)"),
            &[Type::TEXT, Type::TEXT],
        )
        .await?;
    let delete_rows = write
        .prepare(&format!(
            "DELETE FROM {} WHERE srs_id = $1",
            loc.table_final()
        ))
        .await?;
    let delete_cksum = write
        .prepare_typed(
            &format!("DELETE FROM {CKSUM_TABLE} WHERE id = $1::uuid"),
            &[Type::TEXT],
        )
        .await?;

    write.batch("BEGIN").await?;
    match apply_changes(
        read,
        write,
        loc,
        &insert_row,
        &insert_cksum,
        &delete_rows,
        &delete_cksum,
    )
    .await
    {
        Ok(count) => {
            write.batch("COMMIT").await?;
            info!("{count} records changed");
        }
        Err(err) => {
            let _ = write.batch("ROLLBACK").await;
            return Err(err);
        }
    }
    drop_work_table(write, CHANGE_TABLE).await
}

#[allow(clippy::too_many_arguments)]
async fn apply_changes(
    read: &PgClient,
    write: &PgClient,
    loc: &Locations,
    insert_row: &Statement,
    insert_cksum: &Statement,
    delete_rows: &Statement,
    delete_cksum: &Statement,
) -> MarctabResult<u64> {
    let stream = read.query_stream(&filter_query(loc, CHANGE_TABLE)).await?;
    pin_mut!(stream);
    let mut count = 0u64;
    while let Some(row) = stream.try_next().await.map_err(MarctabError::from)? {
        let raw = raw_from_row(&row)?;
        let cksum: String = row.try_get(5)?;
        let Some(record) = normalize(&raw) else {
            continue;
        };
        write.execute_stmt(delete_rows, &[&record.id]).await?;
        write.execute_stmt(delete_cksum, &[&record.id]).await?;
        // A record that is no longer current degenerates to a delete.
        if record.is_current() {
            for tab in record.tab_rows() {
                write
                    .execute_stmt(
                        insert_row,
                        &[
                            &tab.srs_id,
                            &tab.line,
                            &tab.matched_id,
                            &tab.instance_hrid,
                            &tab.instance_id,
                            &tab.field,
                            &tab.ind1,
                            &tab.ind2,
                            &tab.ord,
                            &tab.sf,
                            &tab.content,
                        ],
                    )
                    .await?;
            }
            write
                .execute_stmt(insert_cksum, &[&record.id, &cksum])
                .await?;
        }
        count += 1;
    }
    Ok(count)
}
