use anyhow::Result;
use clap::Subcommand;
use core_auth::AuthManager;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the configuration the next login will use.
    Show,
    /// Change one or more fields; the rest are kept.
    Set {
        /// Keycloak base URL, e.g. https://sso.example.com
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        realm: Option<String>,
        #[arg(long)]
        client_id: Option<String>,
        /// Space-separated scopes.
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        redirect_uri: Option<String>,
    },
}

pub async fn handle_config(manager: &AuthManager, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show(manager).await,
        ConfigAction::Set {
            url,
            realm,
            client_id,
            scope,
            redirect_uri,
        } => {
            let mut config = manager.provider_config().await?;
            let updates = [
                (&mut config.url, url),
                (&mut config.realm, realm),
                (&mut config.client_id, client_id),
                (&mut config.scope, scope),
                (&mut config.redirect_uri, redirect_uri),
            ];
            for (field, value) in updates {
                if let Some(value) = value {
                    *field = value.trim().to_string();
                }
            }

            manager.save_provider_config(&config).await?;
            println!("Configuration saved.");

            let missing = config.missing_fields();
            if !missing.is_empty() {
                println!("Still missing: {}", missing.join(", "));
            }
            Ok(())
        },
    }
}

async fn show(manager: &AuthManager) -> Result<()> {
    let config = manager.provider_config().await?;
    println!("{}", serde_json::to_string_pretty(&config)?);

    match config.validate() {
        Ok(()) => println!("Token endpoint: {}", config.token_endpoint()),
        Err(e) => println!("Not usable yet: {e}"),
    }
    Ok(())
}
