//! Admin commands
//!
//! Each public method is one CLI command. Configuration changes go through
//! [`ConfigStore`], process control through [`Supervisor`], and everything
//! that needs the database reads its connection settings fresh from
//! `sql_connection.conf`.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::MySqlPool;

use crate::conf::{line, ConfigError, ConfigStore};
use crate::database::account::{self, AccountRequest, Sex};
use crate::database::{self, sql_import, upgrades, DbSettings, SQL_CONNECTION_CONF};
use crate::install::Installation;
use crate::settings::AdminSettings;
use crate::supervisor::Supervisor;

/// Config files that carry the inter-server credentials.
pub const INTERSERVER_CONFS: [&str; 2] = ["char-server.conf", "map-server.conf"];

/// Config file of the login server.
pub const LOGIN_SERVER_CONF: &str = "login-server.conf";

/// Account id reserved for the inter-server login.
pub const INTERSERVER_ACCOUNT_ID: u32 = 1;

/// Values for `sql_connection.conf`; empty ones are left alone.
#[derive(Debug, Clone, Default)]
pub struct DbArgs {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub port: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InterserverArgs {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccountArgs {
    pub name: String,
    pub password: Option<String>,
    pub sex: Option<Sex>,
    pub admin: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

pub struct Admin {
    install: Installation,
    store: ConfigStore,
    settings: AdminSettings,
    supervisor: Supervisor,
    autorestart: bool,
}

impl Admin {
    pub fn new(install: Installation, autorestart: bool) -> Result<Self> {
        let settings = AdminSettings::load(&install)?;
        let supervisor = Supervisor::new(install.clone(), settings.stop_timeout());
        Ok(Self {
            store: install.config_store(),
            install,
            settings,
            supervisor,
            autorestart,
        })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn db_settings(&self) -> Result<DbSettings> {
        DbSettings::from_store(&self.store)
    }

    async fn pool(&self) -> Result<MySqlPool> {
        let settings = self.db_settings()?;
        database::connect(&settings)
            .await
            .with_context(|| format!("Cannot connect to database {}", settings.display_url()))
    }

    /// Write each non-empty value into `basename` unless it already has that
    /// value, quoted or not. Returns whether anything changed.
    pub fn apply_settings(&self, basename: &str, values: &[(&str, Option<&str>)]) -> Result<bool> {
        let mut changed = false;
        for &(key, value) in values {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            let current = self
                .store
                .get_unquoted(basename, key)
                .with_context(|| format!("Cannot read {key} from {basename}"))?;
            if current.as_deref() == Some(line::unquote(value).as_ref()) {
                tracing::debug!("[admin] [unchanged] {basename} {key} already set");
                continue;
            }
            self.store
                .set(basename, key, value)
                .with_context(|| format!("Cannot set {key} in {basename}"))?;
            changed = true;
        }
        Ok(changed)
    }

    async fn restart_if_requested(&self, changed: bool) -> Result<()> {
        if changed && self.autorestart {
            tracing::info!("[admin] [autorestart] Configuration changed, restarting servers.");
            self.restart().await?;
        }
        Ok(())
    }

    /// Print version, server and database status.
    pub async fn info(&self) -> Result<()> {
        let info = self.install.version_info();
        tracing::info!("Hercules {} git version {}", info.arch, info.git_version);
        tracing::info!("Packet version {}", info.packet_version);
        tracing::info!("{} mode", info.server_mode);
        tracing::info!("Build date {}", info.build_date);

        for server in &self.settings.servers {
            match self.supervisor.status(server) {
                Ok(status) => tracing::info!("{server} status: {status}"),
                Err(e) => tracing::warn!("{server} status unavailable: {e}"),
            }
        }

        match self.db_settings() {
            Ok(settings) => {
                let status = database::probe(&settings).await;
                tracing::info!(
                    "Database status: {}",
                    if status.ok { "OK" } else { "Unavailable" }
                );
                tracing::info!("Database URL: {}", status.url);
                if let Some(reason) = status.reason {
                    tracing::info!("Database status reason: {reason}");
                }
            }
            Err(e) => tracing::warn!("Database status: no usable configuration ({e:#})"),
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.info().await?;
        for server in &self.settings.servers {
            self.supervisor
                .start(server, false)
                .await
                .with_context(|| format!("Failed to run {server}!"))?;
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        for server in &self.settings.servers {
            self.supervisor
                .stop(server)
                .await
                .with_context(|| format!("Failed to stop {server}!"))?;
        }
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    fn write_db_settings(&self, args: &DbArgs) -> Result<bool> {
        tracing::info!(
            "[admin] [setup_db] Setting up database connection as {}@{}:{}/{}",
            non_empty(&args.username).unwrap_or("-"),
            non_empty(&args.hostname).unwrap_or("-"),
            non_empty(&args.port).unwrap_or("-"),
            non_empty(&args.database).unwrap_or("-"),
        );
        self.apply_settings(
            SQL_CONNECTION_CONF,
            &[
                ("db_hostname", non_empty(&args.hostname)),
                ("db_username", non_empty(&args.username)),
                ("db_password", non_empty(&args.password)),
                ("db_port", non_empty(&args.port)),
                ("db_database", non_empty(&args.database)),
            ],
        )
    }

    /// Write the database connection settings.
    pub async fn setup_db(&self, args: &DbArgs) -> Result<bool> {
        let changed = self.write_db_settings(args)?;
        self.restart_if_requested(changed).await?;
        Ok(changed)
    }

    async fn configure_interserver(&self, args: &InterserverArgs) -> Result<bool> {
        if non_empty(&args.username).is_none() && non_empty(&args.password).is_none() {
            tracing::info!("[admin] [setup_interserver] No interserver user specified to set up, leaving defaults.");
            return Ok(false);
        }

        let current = |key: &str| -> Result<Option<String>> {
            Ok(self.store.get_unquoted(INTERSERVER_CONFS[0], key)?)
        };
        let username = match non_empty(&args.username) {
            Some(u) => u.to_string(),
            None => current("userid")?.context("No interserver user name given or configured")?,
        };
        let password = match non_empty(&args.password) {
            Some(p) => p.to_string(),
            None => current("passwd")?.context("No interserver password given or configured")?,
        };

        tracing::info!("[admin] [setup_interserver] Setting up interserver user {username}.");
        self.upsert_account(AccountRequest {
            userid: username.clone(),
            account_id: Some(INTERSERVER_ACCOUNT_ID),
            password: Some(password.clone()),
            sex: Some(Sex::Server),
            group_id: None,
        })
        .await?;

        let mut changed = false;
        for conf in INTERSERVER_CONFS {
            changed |= self.apply_settings(
                conf,
                &[("userid", Some(username.as_str())), ("passwd", Some(password.as_str()))],
            )?;
        }
        Ok(changed)
    }

    /// Create the inter-server account and point char/map servers at it.
    pub async fn setup_interserver(&self, args: &InterserverArgs) -> Result<bool> {
        let changed = self.configure_interserver(args).await?;
        self.restart_if_requested(changed).await?;
        Ok(changed)
    }

    /// Stop servers, configure database and inter-server login, run upgrades.
    /// Servers stay stopped afterwards.
    pub async fn setup_all(&self, db: &DbArgs, interserver: &InterserverArgs, force: bool) -> Result<()> {
        self.stop().await?;
        self.write_db_settings(db)?;
        database::wait_for(&self.db_settings()?, self.settings.db_wait()).await?;
        self.configure_interserver(interserver).await?;
        self.sql_upgrades(force).await
    }

    fn md5_passwords(&self) -> Result<bool> {
        match self.store.get_unquoted(LOGIN_SERVER_CONF, "use_MD5_passwords") {
            Ok(value) => Ok(value.is_some_and(|v| v.eq_ignore_ascii_case("true"))),
            Err(ConfigError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_account(&self, req: AccountRequest) -> Result<account::Outcome> {
        let md5 = self.md5_passwords()?;
        let pool = self.pool().await?;
        let outcome = account::upsert(&pool, &req, md5)
            .await
            .with_context(|| format!("Failed to write account {}", req.userid))?;
        pool.close().await;
        Ok(outcome)
    }

    /// Create or edit a player account.
    pub async fn account(&self, args: &AccountArgs) -> Result<()> {
        let outcome = self
            .upsert_account(AccountRequest {
                userid: args.name.clone(),
                account_id: None,
                password: args.password.clone(),
                sex: args.sex,
                group_id: args.admin.then_some(self.settings.gm_group_id),
            })
            .await?;
        match outcome {
            account::Outcome::Created(id) => tracing::info!("Account {} created with id {id}.", args.name),
            account::Outcome::Updated(id) => tracing::info!("Account {} (id {id}) updated.", args.name),
        }
        Ok(())
    }

    /// Import one SQL file; refuses when the database is unreachable.
    pub async fn import_sql(&self, path: &Path) -> Result<()> {
        let settings = self.db_settings()?;
        let status = database::probe(&settings).await;
        anyhow::ensure!(
            status.ok,
            "Database is unavailable; cannot import SQL file! ({})",
            status.reason.unwrap_or_default()
        );
        let pool = self.pool().await?;
        sql_import::import_file(&pool, path).await?;
        pool.close().await;
        Ok(())
    }

    /// Import every upgrade script newer than the server build.
    pub async fn sql_upgrades(&self, force: bool) -> Result<()> {
        let info = self.install.version_info();
        let build = upgrades::build_date(&self.install, &info, force)?;
        let scripts = upgrades::pending(&self.install.upgrades_dir(), build)?;
        if scripts.is_empty() {
            tracing::info!("[admin] [sql_upgrades] Database is up to date with build {build}.");
            return Ok(());
        }
        for script in scripts {
            self.import_sql(&script).await?;
        }
        Ok(())
    }

    /// Effective value of `key`, quotes included.
    pub fn config_get(&self, basename: &str, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(basename, key)?)
    }

    /// Set `key` unless it already has `value`.
    pub async fn config_set(&self, basename: &str, key: &str, value: &str) -> Result<()> {
        let changed = self.apply_settings(basename, &[(key, Some(value))])?;
        self.restart_if_requested(changed).await
    }
}
