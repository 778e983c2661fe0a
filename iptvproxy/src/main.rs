mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use iptvproxy_core::{
    bootstrap::{init_database, init_services, load_config, run_migrations},
    logging,
    repository::{Database, SettingsRepository},
    service::CredentialEncryption,
    Config,
};

use server::IptvProxyServer;

#[derive(Parser)]
#[command(version, about = "IPTV proxy and recorder")]
struct Args {
    /// Config file path (defaults to $IPTVPROXY_CONFIG_PATH, then ./config.yaml)
    #[arg(short, long, env = "IPTVPROXY_CONFIG_PATH")]
    config: Option<String>,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the directory recordings are stored under
    #[arg(long)]
    recordings_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a provider password for the config file
    EncryptPassword {
        password: String,
    },
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(directory) = &self.recordings_dir {
            config.recordings.directory.clone_from(directory);
        }
    }
}

/// Print the `enc:` form of `password` under the database's encryption key.
async fn encrypt_password(config: &Config, password: &str) -> Result<()> {
    let pool = init_database(config).await?;
    run_migrations(&pool).await?;

    let db = Database::new(pool);
    let encryption = CredentialEncryption::load_or_generate(&SettingsRepository::new(db.clone())).await?;
    println!("{}", encryption.encrypt(password)?);

    db.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration and apply command line overrides
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    if let Some(Command::EncryptPassword { password }) = &args.command {
        return encrypt_password(&config, password).await;
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("IPTVProxy {} starting...", env!("CARGO_PKG_VERSION"));
    info!("HTTP address: {}", config.http_address());
    if let Some(address) = config.https_address() {
        info!("HTTPS address: {}", address);
    }

    // 3. Initialize database
    let pool = init_database(&config).await?;

    // 4. Run migrations
    info!("Running database migrations...");
    run_migrations(&pool).await.map_err(|e| {
        error!("Failed to run migrations: {}", e);
        anyhow::anyhow!("Migration failed: {e}")
    })?;
    info!("Migrations completed");

    // 5. Initialize services
    let services = init_services(pool, &config).await?;
    services.start().await?;

    // 6. Serve until a shutdown signal arrives
    let server = IptvProxyServer::new(config, services);
    server.run().await?;

    info!("IPTVProxy stopped");
    Ok(())
}
