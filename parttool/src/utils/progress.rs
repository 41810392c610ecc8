// SPDX-License-Identifier: MIT

use indicatif::{ProgressBar, ProgressStyle};

/// Percent bar for long scrubs; hidden in quiet mode.
pub fn percent_bar(message: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.white}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░░");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}
