//! Step and banner output

use super::context::UiContext;
use console::{style, StyledObject};

/// How a step or closing line reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Ok,
    Warn,
}

impl Tone {
    /// Tag printed in front of plain log lines
    fn tag(self) -> StyledObject<&'static str> {
        match self {
            Self::Ok => style("[OK]").green(),
            Self::Warn => style("[WARN]").yellow(),
        }
    }

    fn paint(self, message: &str) -> StyledObject<&str> {
        match self {
            Self::Ok => style(message).green().bold(),
            Self::Warn => style(message).yellow().bold(),
        }
    }
}

/// Open a command's output with its title
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).bold()).ok();
    } else {
        println!("== {} ==", title);
    }
}

fn step(ctx: &UiContext, tone: Tone, message: String) {
    if ctx.use_fancy_output() {
        match tone {
            Tone::Ok => cliclack::log::success(message),
            Tone::Warn => cliclack::log::warning(message),
        }
        .ok();
    } else {
        println!("  {} {}", tone.tag(), message);
    }
}

fn outro(ctx: &UiContext, tone: Tone, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(tone.paint(message)).ok();
    } else {
        println!("{} {}", tone.tag(), message);
    }
}

pub fn outro_success(ctx: &UiContext, message: &str) {
    outro(ctx, Tone::Ok, message);
}

pub fn outro_warn(ctx: &UiContext, message: &str) {
    outro(ctx, Tone::Warn, message);
}

/// Completed step with a dimmed detail, e.g. a path
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Tone::Ok, format!("{} ({})", message, style(detail).dim()));
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    step(ctx, Tone::Warn, message.to_string());
}

/// Warning followed by what the user can do about it
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    step(ctx, Tone::Warn, format!("{} - {}", message, style(hint).dim()));
}
