//! Drive operations
//!
//! Each operation is a module of free functions (or a thin-state struct)
//! taking the session explicitly.

pub mod browse;
pub mod clean;
pub mod clone;
pub mod diff;
pub mod link;
pub mod quota;
pub mod rotate;

use std::io::Write;

/// Ask the user for an explicit `yes` before a destructive operation
pub fn confirm(prompt: &str) -> bool {
    print!("{} (yes/no): ", prompt);
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim() == "yes"
}
