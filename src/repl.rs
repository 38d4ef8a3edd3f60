//! Minimal line-based REPL host.
//!
//! Implements the interaction contract of the runtime: renders state
//! snapshots as they stream, answers `user_input_request` and
//! `tool_approval` interrupts from stdin, and persists the session after
//! every turn.

use crate::app::Application;
use crate::engine::graph::{InterruptPayload, RunOutcome, Snapshot};
use crate::engine::message::Message;
use crate::engine::state::AgentState;
use anyhow::Result;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

const TOOL_RESULT_PREVIEW_CHARS: usize = 400;

pub async fn run_repl(app: Application) -> Result<()> {
    let mut state = app.sessions.create_session()?;
    println!("axon session {}", short_id(&state.thread_id));
    println!("Commands: /new, /sessions, /load <prefix>, /info, /exit");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break; // EOF
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/exit" | "/quit" => {
                app.sessions.save(&state);
                break;
            }
            "/new" => {
                app.sessions.save(&state);
                state = app.sessions.create_session()?;
                println!("new session {}", short_id(&state.thread_id));
                continue;
            }
            "/sessions" => {
                for record in app.sessions.list()? {
                    println!(
                        "{}  messages={}  updated={}",
                        short_id(&record.thread_id),
                        record.message_count,
                        record.updated_at
                    );
                }
                continue;
            }
            "/info" => {
                println!("session  {}", state.thread_id);
                println!("loops    {}/{}", state.loops, state.max_loops);
                println!(
                    "tokens   {} prompt / {} completion",
                    state.cumulative_prompt_tokens, state.cumulative_completion_tokens
                );
                if let Some(workspace) = &state.workspace_path {
                    println!("workdir  {}", workspace.display());
                }
                let info = app.sessions.workspace_info(&state.thread_id);
                if info.exists {
                    println!(
                        "files    {} uploads / {} outputs / {} temp",
                        info.uploads_count, info.outputs_count, info.temp_count
                    );
                    if !info.mentioned_skills.is_empty() {
                        println!("skills   {}", info.mentioned_skills.join(", "));
                    }
                }
                continue;
            }
            _ => {}
        }
        if let Some(prefix) = input.strip_prefix("/load ") {
            app.sessions.save(&state);
            match app.sessions.load_session(prefix.trim())? {
                Some(loaded) => {
                    state = loaded;
                    println!("loaded session {}", short_id(&state.thread_id));
                }
                None => println!("no unique session matches '{}'", prefix.trim()),
            }
            continue;
        }

        let setup = app.sessions.prepare_turn(&mut state, input)?;
        for diagnostic in &setup.diagnostics {
            println!("! {}", diagnostic);
        }

        state = run_turn(&app, state, &mut lines).await?;
        app.sessions.save(&state);
    }

    Ok(())
}

/// Drive one user turn to completion, resolving interrupts interactively.
async fn run_turn(
    app: &Application,
    mut state: AgentState,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<AgentState> {
    let mut printed: HashSet<String> = state.messages.iter().map(|m| m.id().to_string()).collect();
    let mut resume: Option<JsonValue> = None;

    loop {
        // Snapshots stream into a channel; this host renders them as a diff
        // of message ids after each run segment.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Snapshot>();

        // State is cloned so a failed segment leaves the session intact.
        let outcome = match resume.take() {
            Some(value) => app.graph.resume(state.clone(), value, Some(&tx)).await,
            None => app.graph.run(state.clone(), Some(&tx)).await,
        };
        drop(tx);
        while rx.recv().await.is_some() {}

        match outcome {
            Ok(RunOutcome::Finished(new_state)) => {
                print_new_messages(&new_state, &mut printed);
                return Ok(new_state);
            }
            Ok(RunOutcome::Interrupted {
                state: new_state,
                payload,
            }) => {
                // Suspended state is durable: a killed process can resume
                // from the pending node after reload.
                app.sessions.save(&new_state);
                print_new_messages(&new_state, &mut printed);
                resume = Some(collect_resume_value(&payload, lines).await?);
                state = new_state;
            }
            Err(e) => {
                render_run_error(&e);
                // The pre-run state stays valid; the user can retry.
                return Ok(state);
            }
        }
    }
}

/// Ask the user for the resume value an interrupt payload requires.
async fn collect_resume_value(
    payload: &InterruptPayload,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<JsonValue> {
    match payload {
        InterruptPayload::UserInputRequest {
            question,
            context,
            default,
            ..
        } => {
            if let Some(context) = context {
                println!("  ({})", context);
            }
            match default {
                Some(default) => println!("? {} [{}]", question, default),
                None => println!("? {}", question),
            }
            print!("  answer> ");
            std::io::stdout().flush()?;
            let answer = lines.next_line().await?.unwrap_or_default();
            Ok(JsonValue::String(answer.trim().to_string()))
        }
        InterruptPayload::ToolApproval {
            tool,
            args,
            reason,
            risk_level,
        } => {
            println!("⚠ approval required [{}]: {} ({})", risk_level, tool, reason);
            println!("  args: {}", args);
            print!("  approve/reject> ");
            std::io::stdout().flush()?;
            let answer = lines.next_line().await?.unwrap_or_default();
            let answer = answer.trim();
            if answer.eq_ignore_ascii_case("approve") || answer.eq_ignore_ascii_case("y") {
                Ok(JsonValue::String("approve".into()))
            } else {
                Ok(JsonValue::String("reject".into()))
            }
        }
    }
}

fn print_new_messages(state: &AgentState, printed: &mut HashSet<String>) {
    for message in &state.messages {
        if !printed.insert(message.id().to_string()) {
            continue;
        }
        match message {
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                if !content.is_empty() {
                    println!("{}", content);
                }
                for call in tool_calls {
                    println!("→ {}({})", call.name, call.args);
                }
            }
            Message::ToolResult {
                name,
                content,
                is_error,
                ..
            } => {
                let rendered = content.render();
                let preview: String = rendered.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect();
                let marker = if *is_error { "✗" } else { "←" };
                println!(
                    "{} {}: {}{}",
                    marker,
                    name,
                    preview,
                    if rendered.chars().count() > TOOL_RESULT_PREVIEW_CHARS {
                        " …"
                    } else {
                        ""
                    }
                );
            }
            Message::User { .. } | Message::System { .. } => {}
        }
    }
}

fn render_run_error(error: &anyhow::Error) {
    warn!("Turn failed: {:#}", error);
    let mut hint = "check the logs for details";
    for cause in error.chain() {
        if cause.downcast_ref::<reqwest::Error>().is_some() {
            hint = "model call failed; check the model slot base_url/api_key in axon.toml";
            break;
        }
    }
    println!("✗ error: {} ({})", error, hint);
}

fn short_id(thread_id: &str) -> &str {
    &thread_id[..16.min(thread_id.len())]
}
