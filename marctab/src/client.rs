//! Database access shared by the pipeline and the incremental engine.

use bytes::Bytes;
use marctab_config::PgConnectionConfig;
use rustls::RootCertStore;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, CopyInSink, NoTls, Row, RowStream, Statement};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error};

use crate::error::{ErrorKind, MarctabError, MarctabResult};

/// A single database connection.
///
/// The pipeline runs on one connection; the incremental engine opens a
/// second one so the streaming change cursor and the writes never share a
/// connection.
pub struct PgClient {
    client: Client,
}

impl PgClient {
    /// Establishes a connection to Postgres. TLS is negotiated when the
    /// configured sslmode requires it.
    pub async fn connect(config: &PgConnectionConfig) -> MarctabResult<PgClient> {
        if config.sslmode.requires_tls() {
            PgClient::connect_tls(config).await
        } else {
            PgClient::connect_plain(config).await
        }
    }

    async fn connect_plain(config: &PgConnectionConfig) -> MarctabResult<PgClient> {
        let (client, connection) = config.to_pg_config().connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        debug!("connected to postgres without tls");
        Ok(PgClient { client })
    }

    async fn connect_tls(config: &PgConnectionConfig) -> MarctabResult<PgClient> {
        let mut root_store = RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs().map_err(|err| {
            MarctabError::with_source(
                ErrorKind::Config,
                "unable to load system root certificates",
                err,
            )
        })?;
        for cert in certs {
            root_store.add(cert).map_err(|err| {
                MarctabError::with_source(
                    ErrorKind::Config,
                    "unable to add system root certificate",
                    err,
                )
            })?;
        }
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let (client, connection) = config
            .to_pg_config()
            .connect(MakeRustlsConnect::new(tls_config))
            .await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        debug!("connected to postgres with tls");
        Ok(PgClient { client })
    }

    /// Executes a statement, returning the number of rows affected.
    pub async fn execute(&self, sql: &str) -> MarctabResult<u64> {
        self.client.execute(sql, &[]).await.map_err(query_error(sql))
    }

    /// Executes a sequence of statements in one simple-query request.
    pub async fn batch(&self, sql: &str) -> MarctabResult<()> {
        self.client.batch_execute(sql).await.map_err(query_error(sql))
    }

    /// Runs a query expected to return at most one row.
    pub async fn query_opt(&self, sql: &str) -> MarctabResult<Option<Row>> {
        self.client
            .query_opt(sql, &[])
            .await
            .map_err(query_error(sql))
    }

    /// Runs a query and buffers all result rows.
    pub async fn query(&self, sql: &str) -> MarctabResult<Vec<Row>> {
        self.client.query(sql, &[]).await.map_err(query_error(sql))
    }

    /// Runs a query and returns a stream over its rows, without buffering
    /// the result set.
    pub async fn query_stream(&self, sql: &str) -> MarctabResult<RowStream> {
        self.client
            .query_raw(sql, slice_iter(&[]))
            .await
            .map_err(query_error(sql))
    }

    /// Prepares a statement.
    pub async fn prepare(&self, sql: &str) -> MarctabResult<Statement> {
        self.client.prepare(sql).await.map_err(query_error(sql))
    }

    /// Prepares a statement with explicit parameter types.
    pub async fn prepare_typed(&self, sql: &str, types: &[Type]) -> MarctabResult<Statement> {
        self.client
            .prepare_typed(sql, types)
            .await
            .map_err(query_error(sql))
    }

    /// Executes a prepared statement with parameters.
    pub async fn execute_stmt(
        &self,
        statement: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> MarctabResult<u64> {
        self.client
            .execute(statement, params)
            .await
            .map_err(Into::into)
    }

    /// Starts a COPY ... FROM STDIN operation.
    pub async fn copy_in(&self, sql: &str) -> MarctabResult<CopyInSink<Bytes>> {
        self.client.copy_in(sql).await.map_err(query_error(sql))
    }

    /// Runs `setup_sql` inside a transaction that is always rolled back and
    /// reports whether it succeeded. Used to probe optional server
    /// capabilities without leaving anything behind.
    pub async fn probe(&self, setup_sql: &str) -> MarctabResult<bool> {
        self.batch("BEGIN").await?;
        let available = self.client.batch_execute(setup_sql).await.is_ok();
        self.batch("ROLLBACK").await?;
        Ok(available)
    }
}

fn query_error(sql: &str) -> impl FnOnce(tokio_postgres::Error) -> MarctabError + '_ {
    move |err| {
        MarctabError::with_source(
            ErrorKind::QueryFailed,
            format!("database request failed: {}", first_line(sql)),
            err,
        )
    }
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or_default()
}

fn slice_iter<'a>(
    params: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    params.iter().map(|param| *param as _)
}
