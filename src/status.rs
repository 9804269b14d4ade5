//! User-facing status lines, written to stderr

use std::fmt;

pub const OK_STATUS: &str = "√";
pub const FAIL_STATUS: &str = "×";

pub const INSTALL_OK_MESSAGE: &str = "You're on your way to installing Meshplane!\n\
Visit this URL for further instructions: https://meshplane.io/install/#nextsteps";

pub const UPGRADE_OK_MESSAGE: &str = "You're on your way to upgrading Meshplane!\n\
Visit this URL for further instructions: https://meshplane.io/upgrade/#nextsteps";

pub const INSTALL_FAIL_MESSAGE: &str =
    "For troubleshooting help, visit: https://meshplane.io/install/#troubleshooting";

pub const UPGRADE_FAIL_MESSAGE: &str =
    "For troubleshooting help, visit: https://meshplane.io/upgrade/#troubleshooting";

/// Success banner
pub fn ok(message: &str) -> String {
    format!("\n{} {}\n", OK_STATUS, message)
}

/// Failure report: the error, then where to get help
pub fn fail(error: &dyn fmt::Display, help: &str) -> String {
    format!("{} {}\n{}\n", FAIL_STATUS, error, help)
}
