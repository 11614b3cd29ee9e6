//! check command - build every realm and report its strategy

use super::CommandContext;
use anyhow::{bail, Result};
use serde::Serialize;
use sextant_auth::LdapRealm;

#[derive(Serialize)]
struct RealmCheck {
    name: String,
    order: i32,
    strategy: Option<&'static str>,
    error: Option<String>,
}

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let mut checks = Vec::new();

    for settings in ctx.realms() {
        let check = match LdapRealm::from_settings(settings.clone()) {
            Ok(realm) => {
                let strategy = realm.strategy().as_str();
                realm.close().await;
                RealmCheck {
                    name: settings.name.clone(),
                    order: settings.order,
                    strategy: Some(strategy),
                    error: None,
                }
            }
            Err(e) => RealmCheck {
                name: settings.name.clone(),
                order: settings.order,
                strategy: None,
                error: Some(e.to_string()),
            },
        };
        checks.push(check);
    }

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else if checks.is_empty() {
        ctx.info("No enabled realms configured");
    } else {
        for check in &checks {
            match (&check.strategy, &check.error) {
                (Some(strategy), _) => println!("ok     {} (order {}): {}", check.name, check.order, strategy),
                (_, Some(error)) => println!("error  {} (order {}): {}", check.name, check.order, error),
                (None, None) => {}
            }
        }
    }

    let failed = checks.iter().filter(|c| c.error.is_some()).count();
    if failed > 0 {
        bail!("{} realm(s) failed to initialize", failed);
    }
    Ok(())
}
