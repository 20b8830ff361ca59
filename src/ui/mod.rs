//! Terminal output for cache commands
//!
//! Uses `cliclack` for spinners and step logs in an interactive terminal,
//! and falls back to plain `[OK]`/`[WARN]` lines in CI logs.
//!
//! # Example
//!
//! ```rust,ignore
//! use buildstash::ui::{self, TaskSpinner, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "Seeding caches");
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Seeding node_modules");
//! // ... transfer ...
//! spinner.stop("node_modules restored");
//!
//! ui::outro_success(&ctx, "Restored 1 of 1 cache(s)");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{intro, outro_success, outro_warn, step_ok_detail, step_warn, step_warn_hint};
pub use progress::TaskSpinner;
