//! `vbus say` -- one request, wait for the terminal response.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use voicebus_types::voice::AudioRequest;

use crate::state::AppState;

pub async fn run(
    state: &AppState,
    text: &str,
    reference: Option<&Path>,
    voice_style: Option<&str>,
    timeout: Duration,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let mut request = AudioRequest::new(text);
    if let Some(path) = reference {
        request = request.with_reference_path(path.display().to_string());
    }
    if let Some(s) = voice_style {
        request = request.with_style(s);
    }

    let spinner = (!json && !quiet).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Synthesizing...");
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    state.bus.start();
    let result = state.voice.request_and_wait(request, timeout).await;
    state.bus.shutdown().await;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let response = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else if !quiet {
        if response.success {
            let processor = response
                .metadata
                .get("processor")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            println!(
                "  {} Generated with {}",
                style("✓").green().bold(),
                style(processor).cyan()
            );
            match response.audio_path.as_deref() {
                Some(path) => println!("  Audio: {}", style(path).bold()),
                None => println!("  {}", style("(no audio produced)").dim()),
            }
        } else {
            println!(
                "  {} {}",
                style("✗").red().bold(),
                response.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if !response.success {
        bail!(
            "synthesis failed: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}
