//! `vbus config` -- print the effective configuration.

use std::path::Path;

use anyhow::Result;
use console::style;

use voicebus_types::config::VoiceBusConfig;

pub fn show(config: &VoiceBusConfig, path: &Path, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = if path.exists() {
        style(path.display().to_string()).cyan().to_string()
    } else {
        format!("{} (not found, using defaults)", style(path.display()).dim())
    };
    println!();
    println!("  {} Config: {source}", style("⚙").bold());
    println!();
    for line in toml::to_string_pretty(config)?.lines() {
        println!("  {line}");
    }
    println!();
    Ok(())
}
