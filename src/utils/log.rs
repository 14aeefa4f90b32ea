// src/utils/log.rs

//! Server-style run banners on top of the `log` facade.
//!
//! Level filtering and timestamps come from whichever logger the binary
//! installs (`env_logger` in the CLI). These helpers only shape the lines.

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{border}");
    log::info!("  {title}");
    log::info!("{border}");
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("[STEP {step_num}/{total}] {message}");
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    log::info!("    {message}");
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {title}");
    for (key, value) in items {
        log::info!("    {key}: {value}");
    }
}

/// Render summary items as one line, for places where a block is too noisy.
pub fn inline_summary(items: &[(&str, String)]) -> String {
    items
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_summary() {
        let line = inline_summary(&[("inserted", "3".into()), ("updated", "0".into())]);
        assert_eq!(line, "inserted=3 updated=0");
    }

    #[test]
    fn test_inline_summary_empty() {
        assert_eq!(inline_summary(&[]), "");
    }
}
