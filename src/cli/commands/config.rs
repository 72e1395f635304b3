//! Config command implementations.

use crate::cli::ConfigCommands;
use crate::config::{config_path, resolve_token, HubsyncConfig};
use crate::error::Result;
use crate::transport::RetryConfig;

/// Execute config commands.
pub fn execute(command: &ConfigCommands, json: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => show(json),
        ConfigCommands::Set { key, value } => set(key, value, json),
    }
}

fn show(json: bool) -> Result<()> {
    let config = HubsyncConfig::effective()?;
    let service = config.service();
    let token = resolve_token(service, |name| std::env::var(name).ok())
        .ok()
        .map(|t| redact(&t));
    let path = config_path()?;

    if json {
        let output = serde_json::json!({
            "path": path,
            "service": service.as_str(),
            "token": token,
            "config": config,
        });
        println!("{output}");
        return Ok(());
    }

    println!("Config file: {}", path.display());
    println!("Service:     {service}");
    println!(
        "Token:       {}",
        token.unwrap_or_else(|| format!("(unset, export {})", service.token_vars().join(" or ")))
    );
    println!();
    println!("github");
    print_value("owner", config.github.owner.as_deref());
    print_value("repo", config.github.repo.as_deref());
    print_value("api_base", Some(config.github_api_base()));
    print_value("assign_self", config.github.assign_self.map(bool_str));
    print_value("issue_types", config.github.issue_types.map(bool_str));
    println!("clickup");
    print_value("list_id", config.clickup.list_id.as_deref());
    print_value("api_base", Some(config.clickup_api_base()));
    print_value("open_status", Some(config.clickup_open_status()));
    print_value("closed_status", Some(config.clickup_closed_status()));
    println!("retry");
    let retry = RetryConfig::from(&config.retry);
    println!("  max_attempts:  {}", retry.max_attempts);
    println!("  base_delay_ms: {}", retry.base_delay.as_millis());
    println!("  max_delay_ms:  {}", retry.max_delay.as_millis());
    Ok(())
}

fn set(key: &str, value: &str, json: bool) -> Result<()> {
    let path = config_path()?;
    let mut config = HubsyncConfig::load_from(&path)?;
    config.set(key, value)?;
    config.save_to(&path)?;

    if json {
        let output = serde_json::json!({ "key": key, "value": value, "path": path });
        println!("{output}");
    } else {
        println!("Set {key} = {value}");
    }
    Ok(())
}

fn print_value(name: &str, value: Option<&str>) {
    println!("  {:<14} {}", format!("{name}:"), value.unwrap_or("-"));
}

const fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Keep the last four characters of a token.
fn redact(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}
