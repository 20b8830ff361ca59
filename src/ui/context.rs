//! Detect whether output goes to a person or a CI log

use std::io::IsTerminal;

/// CI services whose environment marks a non-interactive run
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "TEAMCITY_VERSION",
    "TF_BUILD",
];

/// UI context that determines output behavior
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        Self {
            interactive: std::io::stdout().is_terminal() && !Self::in_ci(),
        }
    }

    /// Plain output regardless of the terminal
    pub fn non_interactive() -> Self {
        Self { interactive: false }
    }

    /// Whether spinners and colors should be used
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }

    fn in_ci() -> bool {
        CI_VARS.iter().any(|var| std::env::var_os(var).is_some())
    }
}
