//! Run orchestration: mode selection, the full-build pipeline, and the CSV
//! egress mode.
//!
//! The full build streams the joined source rows through the decoder into
//! the per-field spill store, bulk-loads each partition with binary COPY,
//! creates indexes, swaps the working table into the published name,
//! applies grants, rebuilds the checksum tables, and vacuums. Peak memory
//! stays at one source row plus one decoded record; the spill store is the
//! only buffer.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::{TryStreamExt, pin_mut};
use marctab_config::{Locations, PgConnectionConfig};
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::Type;
use tracing::{info, warn};

use crate::client::PgClient;
use crate::csv::CsvWriter;
use crate::error::{MarctabError, MarctabResult};
use crate::marc::all_field_names;
use crate::schema;
use crate::source::{normalize, raw_from_row};
use crate::spill::SpillStore;
use crate::inc;
use crate::types::COLUMNS;

/// Options for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory holding the datasource descriptor and the spill files.
    pub datadir: PathBuf,
    /// Users granted SELECT on the published table.
    pub users: Vec<String>,
    /// Force a full build even when an incremental update is available.
    pub full_update: bool,
    /// Create a trigram index on the content column.
    pub trigram_index: bool,
    /// Skip all index creation.
    pub no_indexes: bool,
    /// Write CSV to this file instead of loading the database.
    pub csv_file: Option<PathBuf>,
    /// Vacuum the touched tables at the end of the run.
    pub vacuum: bool,
}

/// Runs one update, choosing incremental mode when the schema version
/// matches and the operator has not forced a full build or CSV output.
pub async fn run(
    opts: &RunOptions,
    conn: &PgConnectionConfig,
    loc: &Locations,
) -> MarctabResult<()> {
    let client = PgClient::connect(conn).await?;
    schema::ensure_schema(&client).await?;
    let inc_avail = inc::inc_update_available(&client).await?;
    if inc_avail && !opts.full_update && opts.csv_file.is_none() {
        info!("starting incremental update");
        // The streaming change cursor and the writes must not share a
        // connection.
        let write = PgClient::connect(conn).await?;
        inc::inc_update(&client, &write, loc, opts.vacuum).await?;
        return Ok(());
    }
    info!("starting full update");
    if let Err(err) = full_update(&client, opts, loc).await {
        // Leave the previously published table intact; only the working
        // tables are dropped. A fresh connection is used in case the
        // original one is the failure.
        if let Ok(cleanup) = PgClient::connect(conn).await {
            let _ = schema::drop_working_tables(&cleanup).await;
        }
        return Err(err);
    }
    Ok(())
}

async fn full_update(
    client: &PgClient,
    opts: &RunOptions,
    loc: &Locations,
) -> MarctabResult<()> {
    let start = Instant::now();
    if let Some(csv_path) = &opts.csv_file {
        return full_update_csv(client, loc, csv_path).await;
    }

    let mut store = SpillStore::create(&opts.datadir)?;
    schema::setup_working_tables(client, opts.trigram_index).await?;

    let input_count = select_count(client, &loc.srs_records).await?;
    info!("{input_count} input records");
    let mut write_count = 0;
    if input_count > 0 {
        let transform_start = Instant::now();
        write_count = transform_all(client, &mut store, loc).await?;
        info!(elapsed = ?transform_start.elapsed(), "transform");

        let load_start = Instant::now();
        load_all(client, &store).await?;
        info!(elapsed = ?load_start.elapsed(), "load");
    }
    store.close();

    if !opts.no_indexes {
        let index_start = Instant::now();
        schema::create_indexes(client, opts.trigram_index).await?;
        info!(elapsed = ?index_start.elapsed(), "index");
    }
    schema::replace_final(client, loc).await?;
    for user in &opts.users {
        schema::grant_user(client, loc, user).await?;
    }

    let cksum_start = Instant::now();
    inc::create_cksum(client, loc).await?;
    info!(elapsed = ?cksum_start.elapsed(), "checksum");

    if opts.vacuum {
        let vacuum_start = Instant::now();
        schema::vacuum_analyze(client, &loc.table_final()).await?;
        schema::vacuum_analyze(client, schema::CKSUM_TABLE).await?;
        schema::vacuum_analyze(client, schema::METADATA_TABLE).await?;
        info!(elapsed = ?vacuum_start.elapsed(), "vacuum");
    }

    info!(elapsed = ?start.elapsed(), "full update");
    info!("{write_count} output rows");
    Ok(())
}

/// The streaming source query: the two source tables joined on id, all
/// columns projected as text.
fn source_query(loc: &Locations) -> String {
    format!(
        "SELECT r.id::text, r.matched_id::text, r.external_hrid::text instance_hrid, \
         r.state::text, m.{}::text \
         FROM {} r JOIN {} m ON r.id = m.id",
        loc.srs_marc_attr, loc.srs_records, loc.srs_marc
    )
}

async fn select_count(client: &PgClient, table: &str) -> MarctabResult<i64> {
    let row = client
        .query_opt(&format!("SELECT count(*) FROM {table}"))
        .await?;
    match row {
        Some(row) => Ok(row.try_get(0)?),
        None => Ok(0),
    }
}

/// Streams every source row through the decoder into the spill store.
async fn transform_all(
    client: &PgClient,
    store: &mut SpillStore,
    loc: &Locations,
) -> MarctabResult<u64> {
    let stream = client.query_stream(&source_query(loc)).await?;
    pin_mut!(stream);
    let mut write_count = 0u64;
    while let Some(row) = stream.try_next().await.map_err(MarctabError::from)? {
        let raw = raw_from_row(&row)?;
        let Some(record) = normalize(&raw) else {
            continue;
        };
        for tab in record.tab_rows() {
            match store.write(&tab)? {
                Some(msg) => warn!("skipping line in record: {}: {msg}", record.id),
                None => write_count += 1,
            }
        }
    }
    store.finish_writing()?;
    Ok(write_count)
}

/// Bulk-loads every partition from its spill file with a single binary
/// COPY. An empty spill file completes as a no-op.
async fn load_all(client: &PgClient, store: &SpillStore) -> MarctabResult<()> {
    let column_types = vec![
        Type::VARCHAR,
        Type::INT2,
        Type::VARCHAR,
        Type::VARCHAR,
        Type::VARCHAR,
        Type::VARCHAR,
        Type::VARCHAR,
        Type::VARCHAR,
        Type::INT2,
        Type::VARCHAR,
        Type::VARCHAR,
    ];
    for field in all_field_names() {
        let mut reader = store.reader(&field)?;
        let sink = client
            .copy_in(&format!(
                "COPY {} ({}) FROM STDIN BINARY",
                schema::working_partition(&field),
                COLUMNS.join(", ")
            ))
            .await?;
        let writer = BinaryCopyInWriter::new(sink, &column_types);
        pin_mut!(writer);
        while let Some(row) = reader.next_row()? {
            writer
                .as_mut()
                .write(&[
                    &row.srs_id,
                    &row.line,
                    &row.matched_id,
                    &row.instance_hrid,
                    &row.instance_id,
                    &row.field,
                    &row.ind1,
                    &row.ind2,
                    &row.ord,
                    &row.sf,
                    &row.content,
                ])
                .await
                .map_err(MarctabError::from)?;
        }
        writer.finish().await.map_err(MarctabError::from)?;
    }
    Ok(())
}

/// CSV mode: rows stream straight to the file; the database is only read.
async fn full_update_csv(
    client: &PgClient,
    loc: &Locations,
    csv_path: &Path,
) -> MarctabResult<()> {
    let file = File::create(csv_path)?;
    info!("output will be written to file: {}", csv_path.display());
    let mut csv = CsvWriter::new(file);

    let input_count = select_count(client, &loc.srs_records).await?;
    info!("{input_count} input records");
    let mut write_count = 0u64;
    if input_count > 0 {
        let stream = client.query_stream(&source_query(loc)).await?;
        pin_mut!(stream);
        while let Some(row) = stream.try_next().await.map_err(MarctabError::from)? {
            let raw = raw_from_row(&row)?;
            let Some(record) = normalize(&raw) else {
                continue;
            };
            for tab in record.tab_rows() {
                csv.write_row(&tab)?;
                write_count += 1;
            }
        }
    }
    csv.flush()?;
    info!("{write_count} output rows");
    Ok(())
}
