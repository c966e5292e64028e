use {
    anyhow::{bail, Context, Result},
    core_auth::{AuthManager, RedirectOutcome},
    core_runtime::events::EventSeverity,
    serde_json::Value,
    std::time::Duration,
    tokio::io::{AsyncBufReadExt, BufReader},
};

pub async fn login(manager: &AuthManager, no_browser: bool, no_wait: bool) -> Result<()> {
    let request = manager.begin_login().await?;

    if no_browser || open::that(&request.url).is_err() {
        println!("Open this URL to sign in:\n{}", request.url);
    } else {
        println!("Opened the browser to sign in.");
    }

    if no_wait {
        println!("When the browser lands on the redirect URI, run `kc callback <url>`.");
        return Ok(());
    }

    println!("Paste the URL the browser was redirected to:");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let url = lines
        .next_line()
        .await?
        .context("no redirect URL given")?;

    callback(manager, &url).await
}

pub async fn callback(manager: &AuthManager, url: &str) -> Result<()> {
    match manager.handle_redirect(url).await? {
        RedirectOutcome::Ignored => {
            bail!("that URL is not a login callback on the configured redirect URI")
        },
        RedirectOutcome::Completed { added, .. } => {
            println!(
                "Signed in as {} (account {}).",
                added.account.display_name(),
                added.index
            );
            if let Some(e) = added.profile_error {
                println!("Profile unavailable: {e}");
            }
            Ok(())
        },
    }
}

pub async fn list(manager: &AuthManager) -> Result<()> {
    let accounts = manager.accounts().await;
    if accounts.is_empty() {
        println!("No accounts.");
        return Ok(());
    }

    for (index, account) in accounts.iter().enumerate() {
        let email = account
            .profile
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or("-");
        let countdown = manager.countdown(index).await?;
        println!(
            "[{index}] {} <{email}> {countdown}",
            account.display_name()
        );
    }
    Ok(())
}

pub async fn refresh(manager: &AuthManager, index: usize) -> Result<()> {
    let tokens = manager.refresh(index).await?;
    println!("Refreshed; access token valid for {}s.", tokens.expires_in);
    Ok(())
}

pub async fn probe(manager: &AuthManager, index: usize) -> Result<()> {
    let result = manager.probe(index).await?;
    let verdict = if result.valid { "accepted" } else { "rejected" };
    println!("Access token {verdict} (HTTP {}).", result.status);
    Ok(())
}

pub async fn claims(manager: &AuthManager, index: usize, id_token: bool) -> Result<()> {
    let account = manager
        .account(index)
        .await
        .with_context(|| format!("no account at index {index}"))?;

    let claims = if id_token {
        account.tokens.id_claims()
    } else {
        account.tokens.access_claims()
    };

    match claims {
        Some(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
        None => println!("Token is not a decodable JWT."),
    }
    Ok(())
}

pub async fn logout(manager: &AuthManager, index: usize) -> Result<()> {
    match manager.remove_account(index).await? {
        Some(account) => println!("Logged out {}.", account.display_name()),
        None => println!("No account at index {index}."),
    }
    Ok(())
}

pub async fn watch(manager: &AuthManager, index: Option<usize>, auto_refresh: Option<u32>) -> Result<()> {
    let indices: Vec<usize> = match index {
        Some(index) => {
            if manager.account(index).await.is_none() {
                bail!("no account at index {index}");
            }
            vec![index]
        },
        None => (0..manager.accounts().await.len()).collect(),
    };

    if let Some(minutes) = auto_refresh {
        for &index in &indices {
            manager.start_auto_refresh(index, minutes).await?;
        }
    }

    let mut events = manager
        .events()
        .stream()
        .filter(|event| event.severity() >= EventSeverity::Info);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            Some(event) = events.recv() => {
                println!("* {}", event.description());
            },
            _ = ticker.tick() => {
                let mut line = Vec::with_capacity(indices.len());
                for &index in &indices {
                    let Some(account) = manager.account(index).await else {
                        continue;
                    };
                    let countdown = manager.countdown(index).await?;
                    line.push(format!("[{index}] {} {countdown}", account.display_name()));
                }
                if !line.is_empty() {
                    println!("{}", line.join(" | "));
                }
            },
        }
    }

    manager.shutdown();
    Ok(())
}
