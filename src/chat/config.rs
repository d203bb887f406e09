//! Configuration types for the chat front end.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved configuration the
//! binary runs with.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::engine::EngineConfig;

/// Command-line arguments for the sluice-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Base URL of the chat API.
    #[arrrg(optional, "Base URL (default: http://localhost:8000/api/)", "URL")]
    pub base_url: Option<String>,

    /// File preferences are stored in.
    #[arrrg(optional, "Preferences file (default: in memory)", "PATH")]
    pub preferences: Option<String>,

    /// Connect timeout in seconds.
    #[arrrg(optional, "Connect timeout in seconds (default: 10)", "SECS")]
    pub connect_timeout: Option<u32>,

    /// Error notification lifetime in seconds.
    #[arrrg(optional, "Seconds an error stays visible (default: 5)", "SECS")]
    pub error_ttl: Option<u32>,

    /// Success notification lifetime in seconds.
    #[arrrg(optional, "Seconds a success message stays visible (default: 3)", "SECS")]
    pub success_ttl: Option<u32>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Log engine internals.
    #[arrrg(flag, "Log at debug level unless RUST_LOG says otherwise")]
    pub verbose: bool,
}

/// Configuration for the chat front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// How the engine is built.
    pub engine: EngineConfig,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether to log at debug level by default.
    pub verbose: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    pub fn new() -> Self {
        Self {
            engine: EngineConfig::new(),
            use_color: true,
            verbose: false,
        }
    }

    /// The default log filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose { "sluice=debug" } else { "sluice=warn" }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for EngineConfig {
    fn from(args: ChatArgs) -> Self {
        let mut config =
            EngineConfig::new().with_preferences_path(args.preferences.map(PathBuf::from));
        if let Some(base_url) = args.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(secs) = args.connect_timeout {
            config = config.with_connect_timeout(Duration::from_secs(secs.into()));
        }
        if let Some(secs) = args.error_ttl {
            config = config.with_error_ttl(Duration::from_secs(secs.into()));
        }
        if let Some(secs) = args.success_ttl {
            config = config.with_success_ttl(Duration::from_secs(secs.into()));
        }
        config
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let use_color = !args.no_color;
        let verbose = args.verbose;
        ChatConfig {
            engine: EngineConfig::from(args),
            use_color,
            verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_args_defaults() {
        let config = ChatConfig::from(ChatArgs::default());
        assert_eq!(config.engine, EngineConfig::new());
        assert!(config.use_color);
        assert!(!config.verbose);
        assert_eq!(config.log_filter(), "sluice=warn");
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            base_url: Some("http://chat.internal:8080/api/".to_string()),
            preferences: Some("/tmp/sluice/preferences.json".to_string()),
            connect_timeout: Some(3),
            error_ttl: Some(7),
            success_ttl: Some(1),
            no_color: true,
            verbose: true,
        };
        let config = ChatConfig::from(args);
        assert_eq!(config.engine.base_url, "http://chat.internal:8080/api/");
        assert_eq!(
            config.engine.preferences_path,
            Some(PathBuf::from("/tmp/sluice/preferences.json"))
        );
        assert_eq!(config.engine.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.engine.error_ttl, Duration::from_secs(7));
        assert_eq!(config.engine.success_ttl, Duration::from_secs(1));
        assert!(!config.use_color);
        assert_eq!(config.log_filter(), "sluice=debug");
    }
}
