//! `vbus demo` -- publish sample requests and summarize the responses.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{presets, Cell, ContentArrangement, Table};
use console::style;
use tokio::sync::mpsc;
use uuid::Uuid;

use voicebus_core::bus::{handler_fn, Subscriber};
use voicebus_types::bus::{Message, Metadata, Payload};
use voicebus_types::voice::{AudioResponse, DEFAULT_STYLE, TOPIC_RESPONSE, TOPIC_STATUS};

use crate::state::AppState;

const SAMPLE_TEXTS: &[&str] = &[
    "Hello, this is a test of voice cloning using my own voice data.",
    "The system is processing my voice and generating new audio.",
    "This demonstrates the pub/sub messaging system for voice processing.",
];

pub async fn run(
    state: &AppState,
    count: usize,
    reference: Option<&Path>,
    timeout: Duration,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let chatty = !json && !quiet;
    let subscriber = Subscriber::new(state.bus.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<AudioResponse>();
    subscriber.subscribe(
        TOPIC_RESPONSE,
        handler_fn(move |message: Arc<Message>| {
            let tx = tx.clone();
            async move {
                if let Payload::AudioResponse(response) = &message.payload {
                    let _ = tx.send(response.clone());
                }
                Ok(())
            }
        }),
    );
    if chatty {
        subscriber.subscribe(
            TOPIC_STATUS,
            handler_fn(|message: Arc<Message>| async move {
                if let Payload::Status(status) = &message.payload {
                    println!("  {} {}", style("·").dim(), style(&status.message).dim());
                }
                Ok(())
            }),
        );
        println!();
        println!(
            "  {} Processors: {}",
            style("⚡").bold(),
            style(state.processors.join(", ")).cyan()
        );
        println!(
            "  {} Output:     {}",
            style("📁").bold(),
            style(&state.config.voice.output_dir).dim()
        );
        println!();
    }

    state.bus.start();

    let reference = reference.map(|p| p.display().to_string());
    let mut pending: HashSet<Uuid> = HashSet::new();
    for i in 0..count {
        let text = SAMPLE_TEXTS[i % SAMPLE_TEXTS.len()];
        let mut metadata = Metadata::new();
        metadata.insert("test_number".to_string(), (i + 1).into());

        let request_id =
            state
                .voice
                .request_audio(text, reference.as_deref(), Some(DEFAULT_STYLE), metadata)?;
        pending.insert(request_id);
        if chatty {
            println!(
                "  {} Request {}/{count}: {}",
                style("→").cyan(),
                i + 1,
                style(short_id(&request_id)).bold()
            );
        }
    }

    let mut responses = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while !pending.is_empty() {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(response)) => {
                if pending.remove(&response.request_id) {
                    if chatty {
                        print_response(&response);
                    }
                    responses.push(response);
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    state.bus.shutdown().await;
    subscriber.unsubscribe_all();

    let stats = state.voice.get_stats();
    let bus_stats = state.bus.get_stats();
    let succeeded = responses.iter().filter(|r| r.success).count();

    if json {
        let summary = serde_json::json!({
            "requested": count,
            "responses": responses,
            "missing": pending.len(),
            "succeeded": succeeded,
            "voice": stats,
            "bus": bus_stats,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    println!("  {}", style("── Results ──").dim());
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Metric", "Value"]);
    table.add_row(vec![Cell::new("Requests received"), Cell::new(stats.requests_received)]);
    table.add_row(vec![Cell::new("Requests processed"), Cell::new(stats.requests_processed)]);
    table.add_row(vec![Cell::new("Requests failed"), Cell::new(stats.requests_failed)]);
    table.add_row(vec![Cell::new("Responses collected"), Cell::new(responses.len())]);
    table.add_row(vec![Cell::new("Messages published"), Cell::new(bus_stats.messages_published)]);
    table.add_row(vec![Cell::new("Messages delivered"), Cell::new(bus_stats.messages_delivered)]);
    table.add_row(vec![Cell::new("Delivery failures"), Cell::new(bus_stats.messages_failed)]);
    println!("{table}");

    if !pending.is_empty() {
        println!(
            "  {} {} request(s) got no response within {:?}",
            style("!").yellow().bold(),
            pending.len(),
            timeout
        );
    }
    println!();
    Ok(())
}

/// Trailing hex digits; the leading ones of a v7 id are the timestamp.
fn short_id(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    hex[hex.len() - 8..].to_string()
}

fn print_response(response: &AudioResponse) {
    let processor = response
        .metadata
        .get("processor")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    if response.success {
        println!(
            "  {} {} via {} {}",
            style("✓").green().bold(),
            style(short_id(&response.request_id)).bold(),
            style(processor).cyan(),
            response
                .audio_path
                .as_deref()
                .map(|p| format!("→ {p}"))
                .unwrap_or_default()
        );
    } else {
        println!(
            "  {} {} {}",
            style("✗").red().bold(),
            style(short_id(&response.request_id)).bold(),
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
}
