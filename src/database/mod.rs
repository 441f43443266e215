//! Database access for setup, accounts and SQL upgrades
//!
//! Connection settings come from the servers' own `sql_connection.conf`, so
//! the admin tool always talks to the database the servers will use.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::MySqlPool;
use tokio::time::{sleep, Instant};

use crate::conf::ConfigStore;

pub mod account;
pub mod sql_import;
pub mod upgrades;

/// Config file holding the database connection settings.
pub const SQL_CONNECTION_CONF: &str = "sql_connection.conf";

pub const DEFAULT_DB_PORT: u16 = 3306;

/// Connection settings as written in `sql_connection.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl DbSettings {
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let get = |key: &str| -> Result<String> {
            Ok(store
                .get_unquoted(SQL_CONNECTION_CONF, key)
                .with_context(|| format!("Cannot read {key} from {SQL_CONNECTION_CONF}"))?
                .unwrap_or_default())
        };

        let port = get("db_port")?;
        let port = if port.is_empty() {
            DEFAULT_DB_PORT
        } else {
            port.parse()
                .with_context(|| format!("Invalid db_port in {SQL_CONNECTION_CONF}: {port:?}"))?
        };

        Ok(Self {
            hostname: get("db_hostname")?,
            port,
            username: get("db_username")?,
            password: get("db_password")?,
            database: get("db_database")?,
        })
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.hostname)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
    }

    /// Connection URL with the password masked, for logs.
    pub fn display_url(&self) -> String {
        let password = if self.password.is_empty() { "" } else { "***" };
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.username, password, self.hostname, self.port, self.database
        )
    }
}

pub async fn connect(settings: &DbSettings) -> Result<MySqlPool, sqlx::Error> {
    MySqlPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(settings.connect_options())
        .await
}

/// Result of a connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStatus {
    pub ok: bool,
    pub url: String,
    pub reason: Option<String>,
}

/// Connect and run `SELECT 1`.
pub async fn probe(settings: &DbSettings) -> DbStatus {
    let result = async {
        let pool = connect(settings).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        pool.close().await;
        Ok::<_, sqlx::Error>(())
    }
    .await;

    DbStatus {
        ok: result.is_ok(),
        url: settings.display_url(),
        reason: result.err().map(|e| e.to_string().replace('\n', " ")),
    }
}

/// Poll once per second until the database answers or `timeout` passes.
pub async fn wait_for(settings: &DbSettings, timeout: Duration) -> Result<()> {
    tracing::info!(
        "[db] [wait] Waiting for database for up to {} seconds...",
        timeout.as_secs()
    );
    let deadline = Instant::now() + timeout;
    loop {
        let status = probe(settings).await;
        if status.ok {
            tracing::info!("[db] [ready] {} is available", status.url);
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!(
                "Database {} did not become available in time! Reason: {}",
                status.url,
                status.reason.unwrap_or_default()
            );
        }
        sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with(name: &str, content: &str) -> ConfigStore {
        let dir = std::env::temp_dir().join(format!("autolycus-db-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SQL_CONNECTION_CONF), content).unwrap();
        ConfigStore::new(dir)
    }

    #[test]
    fn test_settings_from_store() {
        let store = store_with(
            "full",
            "sql_connection: {\n\
             \tdb_hostname: \"db\"\n\
             \tdb_port: 3307\n\
             \tdb_username: \"ragnarok\"\n\
             \tdb_password: \"secret\"\n\
             \tdb_database: \"ragnarok\"\n\
             }\n",
        );
        let settings = DbSettings::from_store(&store).unwrap();
        assert_eq!(
            settings,
            DbSettings {
                hostname: "db".into(),
                port: 3307,
                username: "ragnarok".into(),
                password: "secret".into(),
                database: "ragnarok".into(),
            }
        );
        assert_eq!(settings.display_url(), "mysql://ragnarok:***@db:3307/ragnarok");
    }

    #[test]
    fn test_missing_port_uses_default() {
        let store = store_with("noport", "db_hostname: localhost\n");
        let settings = DbSettings::from_store(&store).unwrap();
        assert_eq!(settings.port, DEFAULT_DB_PORT);
        assert_eq!(settings.username, "");
    }

    #[test]
    fn test_bad_port() {
        let store = store_with("badport", "db_port: \"abc\"\n");
        let err = DbSettings::from_store(&store).unwrap_err();
        assert!(format!("{err:#}").contains("db_port"));
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let settings = DbSettings {
            hostname: "127.0.0.1".into(),
            port: 1,
            username: "u".into(),
            password: String::new(),
            database: "d".into(),
        };
        let status = probe(&settings).await;
        assert!(!status.ok);
        assert_eq!(status.url, "mysql://u:@127.0.0.1:1/d");
        assert!(status.reason.is_some_and(|r| !r.contains('\n')));
    }
}
