use std::time::Duration;

/// Format bytes in human-readable format (B, KB, MB, GB, TB)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Format a wall-clock duration, keeping millisecond precision below a minute
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    if seconds < 60 {
        format!("{:.3}s", elapsed.as_secs_f64())
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m {}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
    }
}

/// Records per second over `elapsed`
pub fn format_rate(records: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return "n/a".to_string();
    }
    let rate = records as f64 / secs;
    if rate >= 1_000_000.0 {
        format!("{:.2}M records/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2}K records/s", rate / 1_000.0)
    } else {
        format!("{:.0} records/s", rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_elapsed(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_elapsed(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(500, Duration::from_secs(1)), "500 records/s");
        assert_eq!(format_rate(3000, Duration::from_secs(2)), "1.50K records/s");
        assert_eq!(format_rate(4_000_000, Duration::from_secs(2)), "2.00M records/s");
        assert_eq!(format_rate(10, Duration::ZERO), "n/a");
    }
}
