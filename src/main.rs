//! Rivulet CLI - decode and replay agentic chat streams

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use rivulet::{
    create_source, decode_line, group_into_turns, ChatRequest, ChatSession, FixHint, GroupKey,
    PacingConfig, Packet, ProcessorState, RenderContext, RivuletError, SessionOutcome, WireFrame,
};

#[derive(Parser)]
#[command(name = "rivulet")]
#[command(about = "Rivulet - incremental decoder for agentic chat streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a capture file and print its turns
    Replay {
        /// Path to an NDJSON capture
        file: String,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include each step's expanded body
        #[arg(long)]
        expanded: bool,
    },

    /// Decode a capture file and report what it contains (decode only)
    Validate {
        /// Path to an NDJSON capture
        file: String,
    },

    /// Stream the built-in scripted response
    Demo {
        /// Display reveal cadence in milliseconds (0 disables pacing)
        #[arg(long, default_value_t = 40)]
        pace_ms: u64,
    },

    /// Send a message to a live endpoint and stream the response
    Ask {
        /// The user message
        message: String,

        /// Chat endpoint URL
        #[arg(short, long)]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            file,
            format,
            expanded,
        } => replay(&file, format, expanded),
        Commands::Validate { file } => validate(&file),
        Commands::Demo { pace_ms } => {
            run_live("mock", "demo", PacingConfig::every(Duration::from_millis(pace_ms))).await
        }
        Commands::Ask { message, url } => run_live(&url, &message, PacingConfig::off()).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(hint) = e.fix_hint() {
            eprintln!("  {} {}", "Fix:".yellow(), hint);
        }
        std::process::exit(1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Offline commands
// ─────────────────────────────────────────────────────────────────────────────

fn decode_capture(file: &str) -> Result<ProcessorState, RivuletError> {
    let text = fs::read_to_string(file)?;

    let mut state = ProcessorState::new(file);
    let mut packets: Vec<Packet> = Vec::new();
    for line in text.lines() {
        match decode_line(line) {
            Ok(Some(WireFrame::Packet(packet))) => packets.push(packet),
            Ok(Some(WireFrame::Ack(_))) | Ok(None) => {}
            Err(RivuletError::Decode { details, .. }) => {
                state.record_decode_failure(line, details);
            }
            Err(other) => return Err(other),
        }
    }
    state.fold(&packets);
    Ok(state)
}

fn replay(file: &str, format: OutputFormat, expanded: bool) -> Result<(), RivuletError> {
    let state = decode_capture(file)?;
    let registry = rivulet::default_registry();
    let ctx = RenderContext::from_state(&state, false);
    let turns = group_into_turns(&state);

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "turns": turns.iter().map(|turn| serde_json::json!({
                    "turn_index": turn.turn_index,
                    "is_parallel": turn.is_parallel,
                    "steps": turn.steps.iter().filter_map(|step| {
                        let entry = registry.dispatch(step)?;
                        let rendered = (entry.render)(step, &ctx);
                        Some(serde_json::json!({
                            "handler": entry.name,
                            "tab_index": step.tab_index,
                            "complete": step.is_complete(),
                            "status": rendered.status,
                            "content": rendered.content,
                            "expanded": expanded.then_some(rendered.expanded).flatten(),
                        }))
                    }).collect::<Vec<_>>(),
                })).collect::<Vec<_>>(),
                "stopped": state.stream_stopped(),
                "stop_reason": state.stop_reason().map(|r| r.to_string()),
                "decode_failures": state.decode_failures().len(),
            });
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        }
        OutputFormat::Text => {
            for turn in &turns {
                let marker = if turn.is_parallel { " (parallel)" } else { "" };
                println!(
                    "{} {}{}",
                    "Turn".cyan().bold(),
                    turn.turn_index.to_string().cyan().bold(),
                    marker.dimmed()
                );
                for step in &turn.steps {
                    let Some(rendered) = registry.render(step, &ctx) else {
                        continue;
                    };
                    println!("  {} {}", rendered.icon.glyph(), rendered.status.bold());
                    if !rendered.content.is_empty() {
                        for line in rendered.content.lines() {
                            println!("    {line}");
                        }
                    }
                    if expanded {
                        if let Some(body) = &rendered.expanded {
                            for line in body.lines() {
                                println!("    {}", line.dimmed());
                            }
                        }
                    }
                }
            }
            if let Some(reason) = state.stop_reason() {
                println!("{} stream stopped ({reason})", "✓".green());
            }
        }
    }
    Ok(())
}

fn validate(file: &str) -> Result<(), RivuletError> {
    let state = decode_capture(file)?;
    let turns = group_into_turns(&state);
    let packets: usize = state.groups().iter().map(|g| g.packets.len()).sum();

    println!("{} Capture '{}' decoded", "✓".green(), file);
    println!("  Packets: {packets}");
    println!("  Turns: {}", turns.len());
    println!(
        "  Parallel turns: {}",
        turns.iter().filter(|t| t.is_parallel).count()
    );
    println!(
        "  Stopped: {}",
        state
            .stop_reason()
            .map(|r| r.to_string())
            .unwrap_or_else(|| state.stream_stopped().to_string())
    );

    if !state.decode_failures().is_empty() {
        for failure in state.decode_failures() {
            eprintln!("{} {}", "✗".red(), failure.details);
            eprintln!("    {}", failure.line.dimmed());
        }
        let first = &state.decode_failures()[0];
        return Err(RivuletError::Decode {
            details: format!(
                "{} line(s) failed to decode (first: {})",
                state.decode_failures().len(),
                first.details
            ),
            line: first.line.clone(),
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Live commands
// ─────────────────────────────────────────────────────────────────────────────

async fn run_live(
    source_spec: &str,
    message: &str,
    pacing: PacingConfig,
) -> Result<(), RivuletError> {
    let source = create_source(source_spec)?;

    let mut session = ChatSession::new(source.name().to_string()).with_pacing(pacing);

    // Ctrl-C cancels the in-flight response; the session drains and closes out
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let registry = rivulet::default_registry();
    let mut printed: HashSet<GroupKey> = HashSet::new();
    let outcome = session
        .run(&*source, &ChatRequest::new(message), |state, _phase| {
            // Print each step once, when its group completes
            for group in state.groups() {
                if group.is_complete() && !group.contains_tag("message_start") {
                    if printed.insert(group.key()) {
                        let ctx = RenderContext::from_state(state, true);
                        if let Some(rendered) = registry.render(group, &ctx) {
                            println!("{} {}", rendered.icon.glyph(), rendered.status.bold());
                        }
                    }
                }
            }
        })
        .await;

    // Every tool step printed above is final once the stream settles, which
    // unlocks the answer text through the gate
    session.gate_mut().mark_all_tools_displayed();

    if session.gate().reveal_message() {
        let state = session.state();
        let ctx = RenderContext::from_state(state, false);
        if let Some(answer) = state
            .groups()
            .iter()
            .find(|g| g.contains_tag("message_start"))
        {
            if let Some(rendered) = registry.render(answer, &ctx) {
                println!();
                println!("{}", rendered.content);
                if let Some(body) = &rendered.expanded {
                    println!();
                    for line in body.lines() {
                        println!("{}", line.dimmed());
                    }
                }
            }
        }
        session.gate_mut().note_presentation_done();
    }

    match outcome {
        SessionOutcome::Completed => Ok(()),
        SessionOutcome::Cancelled => {
            println!("{} cancelled", "✗".yellow());
            Ok(())
        }
        SessionOutcome::Failed(e) => Err(RivuletError::Transport(e)),
    }
}
