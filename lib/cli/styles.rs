//! Color scheme for the CLI's own `--help`/usage output (clap's `Styles`, not the
//! registry/execution output, which goes through `tracing`).

use clap::builder::styling::{AnsiColor, Effects, Styles};

/// Returns the `Styles` clap renders `--help` and error output with.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Magenta.on_default())
        .placeholder(AnsiColor::White.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default())
        .invalid(AnsiColor::Red.on_default())
}
