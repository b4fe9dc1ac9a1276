pub mod cli;
pub mod clients;
pub mod config;
pub mod constants;
pub mod db;
pub mod domain;
pub mod entities;
pub mod importer;
pub mod library;
pub mod models;
pub mod parser;

use cli::{Cli, Commands, cmd_import};
pub use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    init_tracing(&config.general.log_level);

    match cli.command {
        Commands::Init => {
            let path = cli.config.unwrap_or_else(Config::default_config_path);
            if Config::create_default_if_missing(&path)? {
                println!("Config file created at {}. Edit it and run again.", path.display());
            } else {
                println!("Config file already exists: {}", path.display());
            }
            Ok(())
        }

        Commands::Import { paths } => {
            config.validate()?;
            info!(
                root = %config.file_root,
                database = %config.library.database_path,
                "Starting mvm"
            );
            cmd_import(&config, paths, !cli.non_interactive).await
        }
    }
}
