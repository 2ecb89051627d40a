use std::path::{Path, PathBuf};

use config::{File, FileFormat};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::connection::{PgConnectionConfig, SslModeKind};

/// LDP1 descriptor file name, relative to the data directory.
pub const LDP_CONF_FILE: &str = "ldpconf.json";

/// Metadb descriptor file name, relative to the data directory.
pub const METADB_CONF_FILE: &str = "metadb.conf";

/// Errors that can occur while loading a datasource descriptor.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The descriptor file does not exist.
    #[error("file not found: {0}")]
    DescriptorMissing(PathBuf),

    /// The descriptor file could not be read or parsed.
    #[error("error reading file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// The descriptor parsed but a value is unusable.
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// `ldpconf.json` shape: the connection settings live under `ldp_database`.
#[derive(Debug, Deserialize)]
struct LdpConf {
    ldp_database: LdpDatabase,
}

#[derive(Debug, Deserialize)]
struct LdpDatabase {
    database_host: String,
    database_port: u16,
    database_user: String,
    database_password: SecretString,
    database_name: String,
    #[serde(default)]
    database_sslmode: String,
}

/// `metadb.conf` shape: an INI file with a `[main]` section. All INI values
/// arrive as strings; the port is parsed separately.
#[derive(Debug, Deserialize)]
struct MetadbConf {
    main: MetadbMain,
}

#[derive(Debug, Deserialize)]
struct MetadbMain {
    host: String,
    port: String,
    systemuser: String,
    systemuser_password: SecretString,
    database: String,
    #[serde(default)]
    sslmode: String,
}

/// Loads the LDP1 JSON descriptor from `<datadir>/ldpconf.json`.
pub fn load_ldp1(datadir: &Path) -> Result<PgConnectionConfig, LoadConfigError> {
    let path = datadir.join(LDP_CONF_FILE);
    let conf: LdpConf = read_descriptor(&path, FileFormat::Json)?;
    let db = conf.ldp_database;
    Ok(PgConnectionConfig {
        host: db.database_host,
        port: db.database_port,
        database: db.database_name,
        username: db.database_user,
        password: db.database_password,
        sslmode: parse_sslmode(&db.database_sslmode)?,
    })
}

/// Loads the Metadb INI descriptor from `<datadir>/metadb.conf`.
pub fn load_metadb(datadir: &Path) -> Result<PgConnectionConfig, LoadConfigError> {
    let path = datadir.join(METADB_CONF_FILE);
    let conf: MetadbConf = read_descriptor(&path, FileFormat::Ini)?;
    let main = conf.main;
    let port = main
        .port
        .parse::<u16>()
        .map_err(|_| LoadConfigError::InvalidValue {
            key: "main.port",
            value: main.port.clone(),
        })?;
    Ok(PgConnectionConfig {
        host: main.host,
        port,
        database: main.database,
        username: main.systemuser,
        password: main.systemuser_password,
        sslmode: parse_sslmode(&main.sslmode)?,
    })
}

fn read_descriptor<T>(path: &Path, format: FileFormat) -> Result<T, LoadConfigError>
where
    T: serde::de::DeserializeOwned,
{
    if !path.is_file() {
        return Err(LoadConfigError::DescriptorMissing(path.to_path_buf()));
    }
    let settings = config::Config::builder()
        .add_source(File::from(path.to_path_buf()).format(format))
        .build()
        .map_err(|source| LoadConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    settings
        .try_deserialize::<T>()
        .map_err(|source| LoadConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_sslmode(value: &str) -> Result<SslModeKind, LoadConfigError> {
    SslModeKind::parse(value).ok_or_else(|| LoadConfigError::InvalidValue {
        key: "sslmode",
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn loads_ldp1_descriptor() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(LDP_CONF_FILE),
            r#"{
                "ldp_database": {
                    "database_host": "db.example.org",
                    "database_port": 5432,
                    "database_user": "ldpadmin",
                    "database_password": "s3cret",
                    "database_name": "ldp",
                    "database_sslmode": "require"
                }
            }"#,
        )
        .unwrap();

        let conn = load_ldp1(dir.path()).unwrap();
        assert_eq!(conn.host, "db.example.org");
        assert_eq!(conn.port, 5432);
        assert_eq!(conn.username, "ldpadmin");
        assert_eq!(conn.password.expose_secret(), "s3cret");
        assert_eq!(conn.database, "ldp");
        assert_eq!(conn.sslmode, SslModeKind::Require);
    }

    #[test]
    fn ldp1_sslmode_defaults_to_prefer() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(LDP_CONF_FILE),
            r#"{
                "ldp_database": {
                    "database_host": "localhost",
                    "database_port": 5432,
                    "database_user": "ldpadmin",
                    "database_password": "pw",
                    "database_name": "ldp"
                }
            }"#,
        )
        .unwrap();

        let conn = load_ldp1(dir.path()).unwrap();
        assert_eq!(conn.sslmode, SslModeKind::Prefer);
    }

    #[test]
    fn missing_ldp1_descriptor_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_ldp1(dir.path()).unwrap_err();
        assert!(matches!(err, LoadConfigError::DescriptorMissing(_)));
    }

    #[test]
    fn loads_metadb_descriptor() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(METADB_CONF_FILE),
            "[main]\n\
             host = mdb.example.org\n\
             port = 5433\n\
             systemuser = mdbadmin\n\
             systemuser_password = hush\n\
             database = metadb\n\
             sslmode = disable\n",
        )
        .unwrap();

        let conn = load_metadb(dir.path()).unwrap();
        assert_eq!(conn.host, "mdb.example.org");
        assert_eq!(conn.port, 5433);
        assert_eq!(conn.username, "mdbadmin");
        assert_eq!(conn.password.expose_secret(), "hush");
        assert_eq!(conn.database, "metadb");
        assert_eq!(conn.sslmode, SslModeKind::Disable);
    }

    #[test]
    fn metadb_bad_port_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(METADB_CONF_FILE),
            "[main]\n\
             host = localhost\n\
             port = not-a-port\n\
             systemuser = mdbadmin\n\
             systemuser_password = hush\n\
             database = metadb\n",
        )
        .unwrap();

        let err = load_metadb(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            LoadConfigError::InvalidValue { key: "main.port", .. }
        ));
    }
}
