//! usage command - print realm usage statistics

use super::CommandContext;
use anyhow::Result;
use sextant_auth::LdapRealm;

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let mut stats = Vec::new();
    for settings in ctx.realms() {
        let realm = LdapRealm::from_settings(settings.clone())?;
        stats.push(realm.usage_stats());
        realm.close().await;
    }

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!(
        "{:<20} {:>6} {:>6} {:<5} {:<11} LOAD BALANCE",
        "REALM", "ORDER", "CACHED", "SSL", "USER SEARCH"
    );
    for s in &stats {
        println!(
            "{:<20} {:>6} {:>6} {:<5} {:<11} {}",
            s.name, s.order, s.size, s.ssl, s.user_search, s.load_balance_type
        );
    }
    Ok(())
}
