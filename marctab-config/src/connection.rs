use secrecy::{ExposeSecret, SecretString};
use tokio_postgres::Config as PgConfig;
use tokio_postgres::config::SslMode;

/// Application name reported to the server for all connections.
const APPLICATION_NAME: &str = "marctab";

/// Connection parameters for the source/target database.
///
/// Built from either descriptor dialect by [`crate::load`]. The password is
/// kept behind [`SecretString`] so it never appears in debug output.
#[derive(Debug, Clone)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: SecretString,
    pub sslmode: SslModeKind,
}

/// The subset of libpq `sslmode` behavior the tool distinguishes.
///
/// `verify-ca` and `verify-full` collapse into [`SslModeKind::Require`]: the
/// TLS connector always verifies against the system roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslModeKind {
    Disable,
    Prefer,
    Require,
}

impl SslModeKind {
    /// Parses a libpq-style `sslmode` value. An empty value means `prefer`.
    pub fn parse(value: &str) -> Option<SslModeKind> {
        match value {
            "" | "allow" | "prefer" => Some(SslModeKind::Prefer),
            "disable" => Some(SslModeKind::Disable),
            "require" | "verify-ca" | "verify-full" => Some(SslModeKind::Require),
            _ => None,
        }
    }

    /// Whether connections must negotiate TLS.
    pub fn requires_tls(&self) -> bool {
        matches!(self, SslModeKind::Require)
    }
}

impl PgConnectionConfig {
    /// Builds the `tokio_postgres` connection configuration.
    pub fn to_pg_config(&self) -> PgConfig {
        let mut config = PgConfig::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .password(self.password.expose_secret())
            .dbname(&self.database)
            .application_name(APPLICATION_NAME)
            .ssl_mode(match self.sslmode {
                SslModeKind::Disable => SslMode::Disable,
                SslModeKind::Prefer => SslMode::Prefer,
                SslModeKind::Require => SslMode::Require,
            });
        config
    }
}
