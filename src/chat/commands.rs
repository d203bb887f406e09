//! Slash command parsing for the chat front end.
//!
//! Commands start with `/` and map onto engine entry points instead of being sent as prompts.

use crate::preferences::Theme;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Create a session, optionally titled, and select it.
    New(Option<String>),

    /// List sessions.
    List,

    /// Refetch sessions from the backend.
    Reload,

    /// Select a session by id.
    Select(String),

    /// Delete a session by id.  `None` deletes the active session.
    Delete(Option<String>),

    /// Rename the active session.
    Rename(String),

    /// Pin or unpin the active session.
    Pin(bool),

    /// Change the model, and the provider when given.
    Model {
        /// Provider display name.
        provider: Option<String>,
        /// Model id.
        model: String,
    },

    /// Set the sampling temperature.
    Temperature(f32),

    /// Set the maximum tokens per response.
    MaxTokens(u32),

    /// Set the color theme.
    Theme(Theme),

    /// Show or hide the sidebar.
    Sidebar(bool),

    /// Show the messages of the active session.
    History,

    /// Display session statistics.
    Stats,

    /// Show the current preferences.
    ShowConfig,

    /// Stop the in-flight response.
    Stop,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it should be sent as a
/// prompt.
///
/// # Examples
///
/// ```
/// # use sluice::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/select 42").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New(argument.map(|s| s.to_string())),
        "list" | "ls" | "sessions" => ChatCommand::List,
        "reload" => ChatCommand::Reload,
        "select" | "open" => match argument {
            Some(id) => ChatCommand::Select(id.to_string()),
            None => ChatCommand::Invalid("/select requires a session id".to_string()),
        },
        "delete" | "rm" => ChatCommand::Delete(argument.map(|s| s.to_string())),
        "rename" => match argument {
            Some(title) => ChatCommand::Rename(title.to_string()),
            None => ChatCommand::Invalid("/rename requires a title".to_string()),
        },
        "pin" => ChatCommand::Pin(true),
        "unpin" => ChatCommand::Pin(false),
        "model" => parse_model_command(argument),
        "temperature" | "temp" => match argument {
            Some(arg) => match parse_f32_in_range(arg, 0.0, 2.0) {
                Ok(value) => ChatCommand::Temperature(value),
                Err(err) => ChatCommand::Invalid(format!("/temperature {err}")),
            },
            None => ChatCommand::Invalid("/temperature requires a value".to_string()),
        },
        "max_tokens" => match argument.map(|arg| arg.parse::<u32>()) {
            Some(Ok(value)) if value > 0 => ChatCommand::MaxTokens(value),
            Some(_) => ChatCommand::Invalid("/max_tokens expects a positive integer".to_string()),
            None => ChatCommand::Invalid("/max_tokens requires a value".to_string()),
        },
        "theme" => match argument.map(|s| s.to_lowercase()).as_deref() {
            Some("dark") => ChatCommand::Theme(Theme::Dark),
            Some("light") => ChatCommand::Theme(Theme::Light),
            _ => ChatCommand::Invalid("/theme expects 'dark' or 'light'".to_string()),
        },
        "sidebar" => match argument.and_then(parse_on_off) {
            Some(value) => ChatCommand::Sidebar(value),
            None => ChatCommand::Invalid("/sidebar expects 'on' or 'off'".to_string()),
        },
        "history" => ChatCommand::History,
        "stats" | "status" => ChatCommand::Stats,
        "config" | "prefs" => ChatCommand::ShowConfig,
        "stop" => ChatCommand::Stop,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_model_command(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/model requires a model name".to_string());
    };
    let mut parts = arg.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(model), None, None) => ChatCommand::Model {
            provider: None,
            model: model.to_string(),
        },
        (Some(provider), Some(model), None) => ChatCommand::Model {
            provider: Some(provider.to_string()),
            model: model.to_string(),
        },
        _ => ChatCommand::Invalid("usage: /model [provider] <model>".to_string()),
    }
}

fn parse_f32_in_range(value: &str, min: f32, max: f32) -> Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| format!("expects a value between {min} and {max}"))?;
    if parsed.is_finite() && parsed >= min && parsed <= max {
        Ok(parsed)
    } else {
        Err(format!("expects a value between {min} and {max}"))
    }
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" | "open" => Some(true),
        "off" | "false" | "no" | "closed" => Some(false),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new [title]              Create a session and switch to it
  /list                     List sessions (* marks the active one)
  /reload                   Refetch sessions from the server
  /select <id>              Switch to a session
  /delete [id]              Delete a session (default: the active one)
  /rename <title>           Rename the active session
  /pin, /unpin              Pin or unpin the active session
  /history                  Show the active session's messages
  /model [provider] <name>  Change the model
  /temperature <v>          Set temperature 0.0-2.0
  /max_tokens <n>           Set maximum response tokens
  /theme dark|light         Set the color theme
  /sidebar on|off           Show or hide the sidebar
  /stats                    Show session statistics
  /config                   Show current preferences
  /stop                     Stop the response being streamed
  /help                     Show this help message
  /quit                     Exit the chat"#
}
