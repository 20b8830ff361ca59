//! Size accounting for the save policy

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

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

/// Convert MB to bytes
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Measured size relative to `store.max_size_mb`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeStatus {
    /// No limit, or under 80% of it
    Ok,
    /// Between 80% and 100% of the limit
    Warning,
    /// Over the limit; saving is skipped
    Exceeded,
}

impl SizeStatus {
    /// Classify a measured size; a zero limit means unlimited
    pub fn from_usage(current_bytes: u64, limit_bytes: u64) -> Self {
        if limit_bytes == 0 {
            return Self::Ok;
        }
        if current_bytes > limit_bytes {
            Self::Exceeded
        } else if percentage(current_bytes, limit_bytes) >= 80.0 {
            Self::Warning
        } else {
            Self::Ok
        }
    }
}

/// Percentage of the limit used
pub fn percentage(current_bytes: u64, limit_bytes: u64) -> f64 {
    if limit_bytes == 0 {
        return 0.0;
    }
    (current_bytes as f64 / limit_bytes as f64) * 100.0
}
