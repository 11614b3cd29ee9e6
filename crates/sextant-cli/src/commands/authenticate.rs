//! authenticate command - try one credential against one realm

use super::CommandContext;
use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde_json::json;
use sextant_auth::LdapRealm;
use sextant_core::Credential;
use std::io::BufRead;

const PASSWORD_ENV: &str = "SEXTANT_PASSWORD";

fn env_secret(name: &str) -> Option<SecretString> {
    std::env::var(name).ok().map(SecretString::from)
}

/// First line of `reader`, without its line ending
fn read_secret(mut reader: impl BufRead) -> Result<SecretString> {
    let mut line = String::new();
    reader.read_line(&mut line).context("failed to read password")?;
    let len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(len);
    Ok(SecretString::from(line))
}

pub async fn execute(ctx: &CommandContext, realm_name: &str, username: &str) -> Result<()> {
    let settings = ctx
        .config
        .realm(realm_name)
        .with_context(|| format!("realm {} is not configured", realm_name))?;

    let secret = match env_secret(PASSWORD_ENV) {
        Some(secret) => secret,
        None => {
            ctx.info("Password:");
            read_secret(std::io::stdin().lock())?
        }
    };

    let realm = LdapRealm::from_settings(settings.clone())?;
    let result = realm.authenticate(&Credential::new(username, secret)).await;
    realm.close().await;

    let exception = result.exception().map(|e| e.to_string());

    if ctx.is_json() {
        let output = json!({
            "realm": realm_name,
            "status": result.status(),
            "message": result.message(),
            "exception": exception,
            "user": result.user(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("status:    {:?}", result.status());
        if let Some(user) = result.user() {
            println!("user:      {}", user.username());
            println!("roles:     {}", user.roles().join(", "));
            for (key, value) in user.metadata() {
                println!("{:<10} {}", format!("{}:", key), value);
            }
        }
        if let Some(message) = result.message() {
            println!("message:   {}", message);
        }
        if let Some(exception) = &exception {
            println!("exception: {}", exception);
        }
    }

    if !result.is_success() {
        bail!("authentication against realm {} failed", realm_name);
    }
    Ok(())
}
