//! All DDL: the working schema and table, its 1000 partitions, capability
//! probes, index creation, the publish swap, grants, and cleanup.
//!
//! Statement text is produced by pure functions so the exact SQL is unit
//! testable; execution goes through [`PgClient`].

use marctab_config::Locations;
use pg_escape::quote_identifier;
use tracing::{debug, info};

use crate::bail;
use crate::client::PgClient;
use crate::error::{ErrorKind, MarctabResult};
use crate::marc::all_field_names;

/// Schema owning the working table and the side tables.
pub const SCHEMA: &str = "marctab";

/// Working table name; renamed into the published name by the swap.
pub const TABLE_OUT: &str = "marctab._mt";

/// Checksum side table.
pub const CKSUM_TABLE: &str = "marctab.cksum";

/// Metadata side table holding the schema version.
pub const METADATA_TABLE: &str = "marctab.metadata";

/// Side tables of earlier revisions, dropped during setup.
const LEGACY_SCHEMA: &str = "srsmarc";
const LEGACY_TABLES: [&str; 4] = [
    "srsmarc.cksum",
    "srsmarc.metadata",
    "dbsystem.srs_marctab_cksum",
    "dbsystem.srs_marctab_metadata",
];

/// Final table name of the revision before the side tables moved, dropped
/// at the start of the swap.
const PRE_LEGACY_FINAL: &str = "folio_source_record.__marc";

/// Name of a working partition, e.g. `marctab._mt650`.
pub fn working_partition(field: &str) -> String {
    format!("{TABLE_OUT}{field}")
}

/// Published name of a partition, e.g. `mt650`. Partitions stay in the
/// working schema; only the parent table moves.
pub fn published_partition(field: &str) -> String {
    format!("mt{field}")
}

/// DDL for the working table.
pub fn create_table_sql(lz4: bool) -> String {
    let compression = if lz4 { " COMPRESSION lz4" } else { "" };
    format!(
        "CREATE TABLE {TABLE_OUT} (\
         srs_id varchar(36) NOT NULL, \
         line smallint NOT NULL, \
         matched_id varchar(36) NOT NULL, \
         instance_hrid varchar(32) NOT NULL, \
         instance_id varchar(36) NOT NULL, \
         field varchar(3) NOT NULL, \
         ind1 varchar(1) NOT NULL, \
         ind2 varchar(1) NOT NULL, \
         ord smallint NOT NULL, \
         sf varchar(1) NOT NULL, \
         content varchar(65535){compression} NOT NULL\
         ) PARTITION BY LIST (field)"
    )
}

/// DDL for one working partition.
pub fn create_partition_sql(field: &str) -> String {
    format!(
        "CREATE TABLE {} PARTITION OF {TABLE_OUT} FOR VALUES IN ('{field}')",
        working_partition(field)
    )
}

/// Index statements for the working table. Indexes created on the parent
/// propagate to every partition.
pub fn index_sqls(trigram: bool) -> Vec<String> {
    let mut sqls: Vec<String> = ["srs_id", "matched_id", "instance_hrid", "instance_id", "sf"]
        .iter()
        .map(|column| format!("CREATE INDEX ON {TABLE_OUT} ({column})"))
        .collect();
    if trigram {
        sqls.push(format!(
            "CREATE INDEX ON {TABLE_OUT} USING GIN (content gin_trgm_ops)"
        ));
    }
    sqls
}

/// The table-level statements of the publish swap, in order. Renames and
/// schema moves only; no data is copied.
pub fn swap_sqls(loc: &Locations) -> Vec<String> {
    vec![
        format!("DROP TABLE IF EXISTS {PRE_LEGACY_FINAL}"),
        format!("DROP TABLE IF EXISTS {SCHEMA}.{}", loc.final_table),
        format!("ALTER TABLE {TABLE_OUT} RENAME TO {}", loc.final_table),
        format!("DROP TABLE IF EXISTS {}", loc.table_final()),
        format!(
            "ALTER TABLE {SCHEMA}.{} SET SCHEMA {}",
            loc.final_table, loc.final_schema
        ),
    ]
}

/// The per-partition statements of the publish swap.
pub fn partition_swap_sqls(field: &str) -> [String; 2] {
    [
        format!("DROP TABLE IF EXISTS {SCHEMA}.{}", published_partition(field)),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            working_partition(field),
            published_partition(field)
        ),
    ]
}

/// Grant statements for one user.
pub fn grant_sqls(loc: &Locations, user: &str) -> [String; 2] {
    let user = quote_identifier(user);
    [
        format!("GRANT USAGE ON SCHEMA {} TO {user}", loc.final_schema),
        format!("GRANT SELECT ON {} TO {user}", loc.table_final()),
    ]
}

/// Ensures the working schema exists.
pub async fn ensure_schema(client: &PgClient) -> MarctabResult<()> {
    client
        .execute(&format!("CREATE SCHEMA IF NOT EXISTS {SCHEMA}"))
        .await?;
    client
        .execute(&format!(
            "COMMENT ON SCHEMA {SCHEMA} IS 'system tables for the SRS MARC transform'"
        ))
        .await?;
    Ok(())
}

/// Reports whether the server supports column compression with lz4.
pub async fn is_lz4_available(client: &PgClient) -> MarctabResult<bool> {
    client
        .probe("CREATE TEMP TABLE marctab_lz4_probe (v text COMPRESSION lz4)")
        .await
}

/// Reports whether trigram indexes can be created.
pub async fn is_trgm_available(client: &PgClient) -> MarctabResult<bool> {
    client
        .probe(
            "CREATE TEMP TABLE marctab_trgm_probe (v text); \
             CREATE INDEX marctab_trgm_probe_idx ON marctab_trgm_probe \
             USING GIN (v gin_trgm_ops)",
        )
        .await
}

/// Drops and recreates the working table and its 1000 partitions, and
/// removes artifacts of earlier revisions.
///
/// When a trigram index is requested, the capability is probed here so the
/// run aborts before any expensive work.
pub async fn setup_working_tables(client: &PgClient, trigram: bool) -> MarctabResult<()> {
    client
        .execute(&format!("DROP TABLE IF EXISTS {TABLE_OUT}"))
        .await?;
    if trigram && !is_trgm_available(client).await? {
        bail!(
            ErrorKind::CapabilityAbsent,
            "unable to access the pg_trgm module extension"
        );
    }
    let lz4 = is_lz4_available(client).await?;
    debug!(lz4, "creating working table");
    client.execute(&create_table_sql(lz4)).await?;
    client
        .execute(&format!(
            "COMMENT ON TABLE {TABLE_OUT} IS 'current SRS MARC records in tabular form'"
        ))
        .await?;
    for field in all_field_names() {
        client
            .execute(&format!(
                "DROP TABLE IF EXISTS {LEGACY_SCHEMA}.srs_marctab_{field}"
            ))
            .await?;
        client
            .execute(&format!("DROP TABLE IF EXISTS {}", working_partition(&field)))
            .await?;
        client.execute(&create_partition_sql(&field)).await?;
    }
    for table in LEGACY_TABLES {
        client
            .execute(&format!("DROP TABLE IF EXISTS {table}"))
            .await?;
    }
    client
        .execute(&format!("DROP SCHEMA IF EXISTS {LEGACY_SCHEMA}"))
        .await?;
    Ok(())
}

/// Creates the configured indexes on the working table.
pub async fn create_indexes(client: &PgClient, trigram: bool) -> MarctabResult<()> {
    for sql in index_sqls(trigram) {
        debug!(sql = %sql, "creating index");
        client.execute(&sql).await?;
    }
    Ok(())
}

/// Publishes the working table under the final name.
///
/// Each statement is individually atomic and the working name is never
/// queried by consumers, so observers see either the previous table or the
/// new one at every moment.
pub async fn replace_final(client: &PgClient, loc: &Locations) -> MarctabResult<()> {
    for sql in swap_sqls(loc) {
        client.execute(&sql).await?;
    }
    for field in all_field_names() {
        for sql in partition_swap_sqls(&field) {
            client.execute(&sql).await?;
        }
    }
    info!("new table is ready to use: {}", loc.table_final());
    Ok(())
}

/// Grants read access on the published table to one user.
pub async fn grant_user(client: &PgClient, loc: &Locations, user: &str) -> MarctabResult<()> {
    for sql in grant_sqls(loc, user) {
        client.execute(&sql).await?;
    }
    Ok(())
}

/// Drops the working table and all working partitions. Used by failure
/// cleanup and by the cancellation handler; errors are for the caller to
/// ignore.
pub async fn drop_working_tables(client: &PgClient) -> MarctabResult<()> {
    client
        .execute(&format!("DROP TABLE IF EXISTS {TABLE_OUT}"))
        .await?;
    for field in all_field_names() {
        client
            .execute(&format!("DROP TABLE IF EXISTS {}", working_partition(&field)))
            .await?;
    }
    Ok(())
}

/// Vacuums and analyzes one table.
pub async fn vacuum_analyze(client: &PgClient, table: &str) -> MarctabResult<()> {
    client.execute(&format!("VACUUM {table}")).await?;
    client.execute(&format!("ANALYZE {table}")).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadb_locations() -> Locations {
        Locations::for_metadb()
    }

    #[test]
    fn working_table_ddl() {
        let sql = create_table_sql(false);
        assert!(sql.starts_with("CREATE TABLE marctab._mt ("));
        assert!(sql.ends_with(") PARTITION BY LIST (field)"));
        assert!(sql.contains("content varchar(65535) NOT NULL"));
        assert!(!sql.contains("COMPRESSION"));

        let sql = create_table_sql(true);
        assert!(sql.contains("content varchar(65535) COMPRESSION lz4 NOT NULL"));
    }

    #[test]
    fn partition_ddl() {
        assert_eq!(
            create_partition_sql("650"),
            "CREATE TABLE marctab._mt650 PARTITION OF marctab._mt FOR VALUES IN ('650')"
        );
    }

    #[test]
    fn index_statements() {
        let sqls = index_sqls(false);
        assert_eq!(sqls.len(), 5);
        assert_eq!(sqls[0], "CREATE INDEX ON marctab._mt (srs_id)");
        assert!(!sqls.iter().any(|s| s.contains("gin_trgm_ops")));

        let sqls = index_sqls(true);
        assert_eq!(sqls.len(), 6);
        assert_eq!(
            sqls[5],
            "CREATE INDEX ON marctab._mt USING GIN (content gin_trgm_ops)"
        );
    }

    #[test]
    fn swap_statement_sequence() {
        let sqls = swap_sqls(&metadb_locations());
        assert_eq!(
            sqls,
            vec![
                "DROP TABLE IF EXISTS folio_source_record.__marc".to_string(),
                "DROP TABLE IF EXISTS marctab.marctab".to_string(),
                "ALTER TABLE marctab._mt RENAME TO marctab".to_string(),
                "DROP TABLE IF EXISTS folio_source_record.marctab".to_string(),
                "ALTER TABLE marctab.marctab SET SCHEMA folio_source_record".to_string(),
            ]
        );
    }

    #[test]
    fn partition_swap_statements() {
        let [drop, rename] = partition_swap_sqls("007");
        assert_eq!(drop, "DROP TABLE IF EXISTS marctab.mt007");
        assert_eq!(rename, "ALTER TABLE marctab._mt007 RENAME TO mt007");
    }

    #[test]
    fn grant_statements_quote_users() {
        let [usage, select] = grant_sqls(&metadb_locations(), "ldp user");
        assert_eq!(
            usage,
            "GRANT USAGE ON SCHEMA folio_source_record TO \"ldp user\""
        );
        assert_eq!(
            select,
            "GRANT SELECT ON folio_source_record.marctab TO \"ldp user\""
        );
    }
}
