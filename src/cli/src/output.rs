//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Shorten `sha256:<hex>` to the algorithm and the first 12 hex characters.
pub fn short_digest(digest: &str) -> String {
    let (prefix, hex) = match digest.split_once(':') {
        Some((algo, hex)) => (format!("{algo}:"), hex),
        None => (String::new(), digest),
    };
    let truncated: String = hex.chars().take(12).collect();
    format!("{prefix}{truncated}")
}

/// Format a unix timestamp as a relative "ago" string.
pub fn format_ago(timestamp: i64) -> String {
    let Some(dt) = chrono::DateTime::from_timestamp(timestamp, 0) else {
        return "unknown".to_string();
    };
    let secs = chrono::Utc::now().signed_duration_since(dt).num_seconds();

    match secs {
        s if s < 0 => "just now".to_string(),
        s if s < 60 => format!("{s} seconds ago"),
        s if s < 3600 => format!("{} minutes ago", s / 60),
        s if s < 86400 => format!("{} hours ago", s / 3600),
        s => format!("{} days ago", s / 86400),
    }
}
