//! Terminal output for the chat front end.
//!
//! Streamed text goes to stdout as it arrives; notifications are styled by kind.

use std::io::{self, Stdout, Write};

use crate::session::Session;

/// ANSI escape code for dim text (used for metadata).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for green text (used for success notifications).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for error notifications).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for cyan text (used for the active session).
const ANSI_CYAN: &str = "\x1b[36m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a streamed fragment.
    fn print_text(&mut self, text: &str);

    /// Print an error notification.
    fn print_error(&mut self, error: &str);

    /// Print a success notification.
    fn print_success(&mut self, message: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print one entry of the session list.
    fn print_session(&mut self, session: &Session, active: bool);

    /// Called when a response is complete.
    fn finish_response(&mut self);

    /// Called when the user stopped the stream.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
#[derive(Clone)]
pub struct PlainTextRenderer {
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self { use_color: true }
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self { use_color }
    }

    fn stdout(&self) -> Stdout {
        io::stdout()
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// One line of the session list: marker, id, title, message count, pin.
pub fn session_line(session: &Session, active: bool) -> String {
    let marker = if active { '*' } else { ' ' };
    let pin = if session.pinned { " [pinned]" } else { "" };
    format!(
        "{marker} {id}  {title} ({count} messages){pin}",
        id = session.id,
        title = session.title,
        count = session.message_count(),
    )
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        let mut stdout = self.stdout();
        let _ = write!(stdout, "{text}");
        let _ = stdout.flush();
    }

    fn print_error(&mut self, error: &str) {
        eprintln!("{}", self.styled(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_success(&mut self, message: &str) {
        println!("{}", self.styled(ANSI_GREEN, message));
    }

    fn print_info(&mut self, info: &str) {
        println!("{info}");
    }

    fn print_session(&mut self, session: &Session, active: bool) {
        let line = session_line(session, active);
        if active {
            println!("    {}", self.styled(ANSI_CYAN, &line));
        } else {
            println!("    {line}");
        }
    }

    fn finish_response(&mut self) {
        println!();
    }

    fn print_interrupted(&mut self) {
        println!("\n{}", self.styled(ANSI_DIM, "[stopped]"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
        assert_eq!(renderer.styled(ANSI_RED, "x"), "\x1b[31mx\x1b[0m");
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert_eq!(renderer.styled(ANSI_RED, "x"), "x");
    }

    #[test]
    fn session_lines() {
        let mut session = Session::new("s1", "Planning");
        assert_eq!(session_line(&session, false), "  s1  Planning (0 messages)");
        session.pinned = true;
        assert_eq!(
            session_line(&session, true),
            "* s1  Planning (0 messages) [pinned]"
        );
    }
}
