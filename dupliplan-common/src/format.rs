//! Formatting utilities for log and summary output

/// Format bytes as human-readable size using binary units (KiB, MiB, GiB)
///
/// # Examples
/// ```
/// use dupliplan_common::format_bytes;
/// assert_eq!(format_bytes(1024), "1.00 KiB");
/// assert_eq!(format_bytes(4194304), "4.00 MiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format a list of counted items, skipping zero counts
///
/// # Examples
/// ```
/// use dupliplan_common::format::format_counts;
/// assert_eq!(format_counts(&[("directory", 5), ("cron", 0), ("exec", 1)]), "5 directory, 1 exec");
/// ```
pub fn format_counts(counts: &[(&str, usize)]) -> String {
    let parts: Vec<String> = counts
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(label, count)| format!("{count} {label}"))
        .collect();

    if parts.is_empty() {
        "nothing".to_string()
    } else {
        parts.join(", ")
    }
}
