use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use autolycus::admin::{AccountArgs, Admin, DbArgs, InterserverArgs};
use autolycus::database::account::Sex;
use autolycus::install::Installation;

#[derive(Debug, Parser)]
#[command(
    name = "autolycus",
    about = "Configure, run and maintain a Hercules server installation",
    version
)]
struct Cli {
    /// Root of the Hercules installation.
    #[arg(short = 'p', long, default_value = ".", env = "HERCULES_PATH")]
    hercules_path: PathBuf,

    /// Restart the servers after a command changed their configuration.
    #[arg(short = 'r', long)]
    autorestart: bool,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct DbOpts {
    #[arg(long, default_value = "db")]
    db_hostname: String,

    #[arg(long, env = "MYSQL_USER")]
    db_username: Option<String>,

    #[arg(long, env = "MYSQL_PASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    #[arg(long, env = "MYSQL_DATABASE")]
    db_database: Option<String>,

    #[arg(long, default_value = "3306", env = "MYSQL_PORT")]
    db_port: String,
}

impl From<DbOpts> for DbArgs {
    fn from(opts: DbOpts) -> Self {
        DbArgs {
            hostname: Some(opts.db_hostname),
            username: opts.db_username,
            password: opts.db_password,
            database: opts.db_database,
            port: Some(opts.db_port),
        }
    }
}

#[derive(Debug, Args)]
struct InterserverOpts {
    #[arg(long, env = "INTERSERVER_USER")]
    is_username: Option<String>,

    #[arg(long, env = "INTERSERVER_PASSWORD", hide_env_values = true)]
    is_password: Option<String>,
}

impl From<InterserverOpts> for InterserverArgs {
    fn from(opts: InterserverOpts) -> Self {
        InterserverArgs {
            username: opts.is_username,
            password: opts.is_password,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show version, server and database status.
    Info,
    /// Start all servers.
    Start,
    /// Stop all servers.
    Stop,
    /// Stop, then start all servers.
    Restart,
    /// Write the database connection settings.
    #[command(name = "setup_db")]
    SetupDb(DbOpts),
    /// Create the inter-server account and configure char/map servers to use it.
    #[command(name = "setup_interserver")]
    SetupInterserver(InterserverOpts),
    /// setup_db, setup_interserver and sql_upgrades in one go.
    #[command(name = "setup_all")]
    SetupAll {
        #[command(flatten)]
        db: DbOpts,
        #[command(flatten)]
        interserver: InterserverOpts,
        /// Run SQL upgrades even without a known build date.
        #[arg(long)]
        force: bool,
    },
    /// Create or edit a game account.
    Account {
        name: String,
        #[arg(short = 'p', long)]
        password: Option<String>,
        /// M, F or S.
        #[arg(short = 's', long)]
        sex: Option<Sex>,
        /// Put the account in the GM group.
        #[arg(long)]
        admin: bool,
    },
    /// Import an SQL file into the database.
    #[command(name = "import_sql")]
    ImportSql { file: PathBuf },
    /// Import SQL upgrades newer than the server build.
    #[command(name = "sql_upgrades")]
    SqlUpgrades {
        #[arg(long)]
        force: bool,
    },
    /// Read or write a server configuration value.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective value of KEY.
    Get { file: String, key: String },
    /// Set KEY to VALUE in the effective file.
    Set { file: String, key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    autolycus::logging::init(cli.verbose);

    let install = Installation::new(&cli.hercules_path);
    let admin = Admin::new(install, cli.autorestart)?;

    match cli.command {
        Command::Info => admin.info().await?,
        Command::Start => admin.start().await?,
        Command::Stop => admin.stop().await?,
        Command::Restart => admin.restart().await?,
        Command::SetupDb(db) => {
            admin.setup_db(&db.into()).await?;
        }
        Command::SetupInterserver(is) => {
            admin.setup_interserver(&is.into()).await?;
        }
        Command::SetupAll { db, interserver, force } => {
            admin.setup_all(&db.into(), &interserver.into(), force).await?
        }
        Command::Account { name, password, sex, admin: gm } => {
            admin
                .account(&AccountArgs { name, password, sex, admin: gm })
                .await?
        }
        Command::ImportSql { file } => admin.import_sql(&file).await?,
        Command::SqlUpgrades { force } => admin.sql_upgrades(force).await?,
        Command::Config(ConfigCommand::Get { file, key }) => {
            match admin.config_get(&file, &key)? {
                Some(value) => println!("{value}"),
                None => tracing::warn!("{key} is not set in any {file}"),
            }
        }
        Command::Config(ConfigCommand::Set { file, key, value }) => {
            admin.config_set(&file, &key, &value).await?
        }
    }
    Ok(())
}
