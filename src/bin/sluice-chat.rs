//! Interactive terminal client for a streaming chat backend.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a backend on localhost:8000
//! sluice-chat
//!
//! # Another server, with preferences kept across runs
//! sluice-chat --base-url http://chat.example:8000/api/ --preferences ~/.config/sluice.json
//!
//! # Log engine internals to stderr
//! sluice-chat --verbose
//! ```
//!
//! Anything that does not start with `/` is sent to the active session.  Ctrl+C while a response
//! is streaming stops it; the partial reply is kept.

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use sluice::chat::{
    ChatArgs, ChatCommand, ChatConfig, PlainTextRenderer, Renderer, help_text, parse_command,
};
use sluice::{
    Engine, Error, FragmentCallback, ModelSelection, NotificationKind, Notifications,
    PreferenceKey, SessionUpdate,
};

/// Main entry point for the sluice-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("sluice-chat [OPTIONS]");
    let config = ChatConfig::from(args);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter().into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let engine = Engine::from_config(&config.engine)?;
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    // Ctrl+C stops the response being streamed; at the prompt rustyline sees it first.
    let interrupt = engine.clone();
    ctrlc::set_handler(move || {
        interrupt.stop();
    })?;

    spawn_notification_printer(&engine, renderer.clone());

    // A failed load has already been reported; keep going with an empty list.
    let _ = engine.load().await;
    println!(
        "sluice chat ({} sessions, model: {})",
        engine.sessions().len(),
        engine.preferences().model_selection().model
    );
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let prompt = match engine.active_session() {
            Some(session) => format!("[{}] You: ", session.title),
            None => "You: ".to_string(),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    if cmd == ChatCommand::Quit {
                        println!("Goodbye!");
                        break;
                    }
                    run_command(&engine, &mut renderer, cmd).await;
                    continue;
                }

                send(&engine, &mut renderer, line).await;
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

async fn send(engine: &Engine, renderer: &mut PlainTextRenderer, prompt: &str) {
    if engine.active_id().is_none() {
        // The first prompt starts a conversation.
        if engine.create_session(None).await.is_err() {
            return;
        }
    }
    let mut out = renderer.clone();
    let on_fragment: FragmentCallback = Box::new(move |fragment: &str| out.print_text(fragment));
    let handle = match engine.send(prompt, Some(on_fragment)) {
        Ok(handle) => handle,
        Err(_) => return,
    };
    println!("Assistant:");
    match handle.finish().await {
        Ok(_) => renderer.finish_response(),
        Err(Error::Cancelled { .. }) => renderer.print_interrupted(),
        Err(_) => renderer.finish_response(),
    }
}

async fn run_command(engine: &Engine, renderer: &mut PlainTextRenderer, cmd: ChatCommand) {
    // Failures raise notifications, which the printer task shows.
    match cmd {
        ChatCommand::New(title) => {
            if let Ok(session) = engine.create_session(title.as_deref()).await {
                renderer.print_info(&format!(
                    "Created session {} ({})",
                    session.id, session.title
                ));
            }
        }
        ChatCommand::List => {
            let active = engine.active_id();
            let sessions = engine.sessions();
            if sessions.is_empty() {
                renderer.print_info("    (no sessions)");
            }
            for session in sessions.iter() {
                renderer.print_session(session, active.as_deref() == Some(session.id.as_str()));
            }
        }
        ChatCommand::Reload => {
            if engine.load().await.is_ok() {
                renderer.print_info(&format!("Loaded {} sessions.", engine.sessions().len()));
            }
        }
        ChatCommand::Select(id) => {
            if engine.select_session(&id).is_ok()
                && let Some(session) = engine.active_session()
            {
                renderer.print_info(&format!("Switched to {}", session.title));
            }
        }
        ChatCommand::Delete(id) => {
            let Some(id) = id.or_else(|| engine.active_id()) else {
                renderer.print_error("No active session to delete.");
                return;
            };
            let _ = engine.delete_session(&id).await;
        }
        ChatCommand::Rename(title) => {
            update_active(engine, renderer, SessionUpdate::title(title)).await;
        }
        ChatCommand::Pin(pinned) => {
            update_active(engine, renderer, SessionUpdate::pinned(pinned)).await;
        }
        ChatCommand::History => match engine.active_session() {
            Some(session) => {
                for message in &session.messages {
                    let speaker = if message.is_assistant() { "Assistant" } else { "You" };
                    renderer.print_info(&format!("{speaker}: {}", message.content.as_text()));
                }
            }
            None => renderer.print_error("No active session."),
        },
        ChatCommand::Model { provider, model } => {
            let provider =
                provider.unwrap_or_else(|| engine.preferences().model_selection().provider);
            let selection = ModelSelection::new(provider, model);
            if engine.preferences().set_model_selection(&selection).is_ok() {
                renderer.print_info(&format!(
                    "Model changed to: {} ({})",
                    selection.model, selection.provider
                ));
            }
        }
        ChatCommand::Temperature(value) => {
            if engine
                .set_preference(PreferenceKey::Temperature, f64::from(value))
                .is_ok()
            {
                renderer.print_info(&format!("temperature set to {:.2}", value));
            }
        }
        ChatCommand::MaxTokens(value) => {
            if engine.set_preference(PreferenceKey::MaxTokens, value).is_ok() {
                renderer.print_info(&format!("max_tokens set to {value}"));
            }
        }
        ChatCommand::Theme(theme) => {
            if engine.set_preference(PreferenceKey::Theme, theme).is_ok() {
                renderer.print_info(&format!("theme set to {theme}"));
            }
        }
        ChatCommand::Sidebar(open) => {
            if engine.set_preference(PreferenceKey::SidebarOpen, open).is_ok() {
                renderer.print_info(if open { "Sidebar shown." } else { "Sidebar hidden." });
            }
        }
        ChatCommand::Stats => {
            let stats = engine.stats();
            println!("    Session Statistics:");
            println!("      Sessions: {}", stats.total_sessions);
            println!("      Messages: {}", stats.total_messages);
            println!("      Pinned: {}", stats.pinned_sessions);
            println!("      Average messages per session: {}", stats.average_messages);
        }
        ChatCommand::ShowConfig => {
            println!("    Current Preferences:");
            for key in PreferenceKey::ALL {
                println!("      {}: {}", key, engine.preference(key));
            }
            println!(
                "      Storage: {}",
                if engine.preferences().is_durable() { "file" } else { "memory" }
            );
        }
        ChatCommand::Stop => {
            if !engine.stop() {
                renderer.print_info("Nothing is streaming.");
            }
        }
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {}", line);
            }
        }
        ChatCommand::Quit => {}
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
}

async fn update_active(engine: &Engine, renderer: &mut PlainTextRenderer, update: SessionUpdate) {
    match engine.active_id() {
        Some(id) => {
            let _ = engine.update_session(&id, update).await;
        }
        None => renderer.print_error("No active session."),
    }
}

/// Print notifications as they are raised.  Expirations are silent.
fn spawn_notification_printer(engine: &Engine, mut renderer: PlainTextRenderer) {
    let mut rx = engine.subscribe_notifications();
    tokio::spawn(async move {
        let mut shown = Notifications::default();
        while rx.changed().await.is_ok() {
            let current = rx.borrow_and_update().clone();
            for kind in [NotificationKind::Error, NotificationKind::Success] {
                let Some(notification) = current.get(kind) else {
                    continue;
                };
                if shown.get(kind) == Some(notification) {
                    continue;
                }
                match kind {
                    NotificationKind::Error => renderer.print_error(&notification.text),
                    NotificationKind::Success => renderer.print_success(&notification.text),
                }
            }
            shown = current;
        }
    });
}
