//! # Output Configuration
//!
//! Decides whether the `validate`, `plan`, `apply` and `state` commands
//! decorate their reports with colour and emoji, based on terminal
//! capabilities and user preferences.
//!
//! ## Respecting User Preferences
//!
//! The following flags and environment variables are honoured:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aptly_reconcile::output::{OutputConfig, emoji, heading};
//!
//! let config = OutputConfig::from_env_and_flag("auto");
//!
//! // Section headings and markers degrade to plain text
//! println!("{} {}", emoji(&config, "🪞", "[MIRROR]"), heading(&config, "Mirrors"));
//! ```

use std::env;

use console::style;

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// # Arguments
    /// * `color_flag` - Value of the global `--color` flag: "always", "never" or "auto"
    ///
    /// # Behavior
    /// - `--color=always`: colors on, even with `NO_COLOR` set
    /// - `--color=never`: colors off
    /// - anything else: detected from the environment
    ///
    /// Detection turns colors off when:
    /// - `NO_COLOR` is present (an empty value counts)
    /// - `CLICOLOR=0` is set
    /// - `TERM=dumb` is set
    /// - stdout is not a terminal, unless `CLICOLOR_FORCE` is set to a non-zero value
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    /// Detect whether color output is supported based on environment.
    fn detect_color_support() -> bool {
        // Presence alone disables colors, even when empty
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }

        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }

        // Wins over the terminal check below, so piped output can stay colored
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }

        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }

        // TTY and capability detection from the console crate
        console::Term::stdout().features().colors_supported()
    }

    /// Configuration with colors always enabled.
    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    /// Configuration with colors always disabled.
    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Pick the marker for a report line.
///
/// Returns the emoji when colors are enabled and the bracketed plain text
/// alternative otherwise, so logs and pipes stay ASCII.
///
/// # Arguments
/// * `config` - The output configuration
/// * `emoji_str` - The emoji to use when colors are enabled
/// * `plain` - The plain text to use when colors are disabled
///
/// # Example
/// ```rust,ignore
/// let config = OutputConfig::from_env_and_flag("auto");
/// println!("{} Reading aptly state...", emoji(&config, "🔍", "[SCAN]"));
/// ```
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// Render a section heading of the `state` report.
///
/// # Arguments
/// * `config` - The output configuration
/// * `text` - Heading text, e.g. "Mirrors"
///
/// # Behavior
/// Bold when colors are enabled, the text unchanged otherwise.
pub fn heading(config: &OutputConfig, text: &str) -> String {
    if config.use_color {
        style(text).bold().to_string()
    } else {
        text.to_string()
    }
}
