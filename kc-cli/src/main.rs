mod account_commands;
mod config_commands;

use {
    anyhow::Context,
    bridge_desktop::SqliteSettingsStore,
    clap::{Parser, Subcommand},
    core_auth::AuthManager,
    core_runtime::{
        logging::{init_logging, parse_level, LogFormat, LoggingConfig},
        CoreConfig,
    },
    std::{path::PathBuf, sync::Arc},
    tracing::debug,
};

#[derive(Parser)]
#[command(name = "kc", about = "Keycloak multi-account login client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the settings database.
    #[arg(long, global = true, env = "KC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the provider configuration.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Sign in another account through the browser.
    Login {
        /// Print the authorize URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
        /// Return right after starting; finish later with `kc callback`.
        #[arg(long)]
        no_wait: bool,
    },
    /// Finish a pending login with the URL the browser was redirected to.
    Callback {
        /// Full redirect URL, including the query string.
        url: String,
    },
    /// List signed-in accounts.
    Accounts,
    /// Refresh the tokens of an account.
    Refresh {
        /// Account position as shown by `kc accounts`.
        index: usize,
    },
    /// Check whether the provider still accepts an account's access token.
    Probe { index: usize },
    /// Print the decoded claims of an account's tokens.
    Claims {
        index: usize,
        /// Decode the ID token instead of the access token.
        #[arg(long)]
        id_token: bool,
    },
    /// Remove an account.
    Logout { index: usize },
    /// Follow countdowns and events until interrupted.
    Watch {
        /// Only this account; all accounts when omitted.
        index: Option<usize>,
        /// Refresh the watched accounts on this interval, in minutes.
        #[arg(long)]
        auto_refresh: Option<u32>,
    },
}

fn init_telemetry(cli: &Cli) -> anyhow::Result<()> {
    let level = parse_level(&cli.log_level)?;
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    init_logging(
        LoggingConfig::default()
            .with_format(format)
            .with_level(level)
            .with_target(false),
    )?;
    Ok(())
}

async fn open_manager(data_dir: Option<PathBuf>) -> anyhow::Result<AuthManager> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => bridge_desktop::default_data_dir()
            .context("no platform data directory; pass --data-dir")?,
    };
    let db_path = data_dir.join("settings.db");
    debug!(path = %db_path.display(), "Opening settings");

    let settings = SqliteSettingsStore::new(db_path).await?;
    let core = CoreConfig::builder()
        .settings_store(Arc::new(settings))
        .build()?;

    let manager = AuthManager::from_config(&core);
    manager.initialize().await?;
    Ok(manager)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli)?;

    let manager = open_manager(cli.data_dir).await?;

    match cli.command {
        Commands::Config { action } => config_commands::handle_config(&manager, action).await,
        Commands::Login {
            no_browser,
            no_wait,
        } => account_commands::login(&manager, no_browser, no_wait).await,
        Commands::Callback { url } => account_commands::callback(&manager, &url).await,
        Commands::Accounts => account_commands::list(&manager).await,
        Commands::Refresh { index } => account_commands::refresh(&manager, index).await,
        Commands::Probe { index } => account_commands::probe(&manager, index).await,
        Commands::Claims { index, id_token } => {
            account_commands::claims(&manager, index, id_token).await
        },
        Commands::Logout { index } => account_commands::logout(&manager, index).await,
        Commands::Watch {
            index,
            auto_refresh,
        } => account_commands::watch(&manager, index, auto_refresh).await,
    }
}
