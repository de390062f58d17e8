use crate::TransferJob;

pub const INFINITY_SYMBOL: &str = "∞";

const GIGA: f64 = 1e9;
const MEGA: f64 = 1e6;
const KILO: f64 = 1e3;

pub fn format_file_size(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= GIGA {
        format!("{:.2} GB", value / GIGA)
    } else if value >= MEGA {
        format!("{:.2} MB", value / MEGA)
    } else if value >= KILO {
        format!("{:.2} KB", value / KILO)
    } else {
        format!("{bytes} B")
    }
}

/// Rate thresholds are exclusive: exactly 1 MB/s still renders in KB/s.
pub fn format_rate(rate: f64) -> String {
    if rate / GIGA > 1.0 {
        format!("{:.3} GB/s", rate / GIGA)
    } else if rate / MEGA > 1.0 {
        format!("{:.3} MB/s", rate / MEGA)
    } else if rate / KILO > 1.0 {
        format!("{:.3} KB/s", rate / KILO)
    } else {
        format!("{rate:.3} B/s")
    }
}

pub fn format_percent(percent: f64) -> String {
    format!("{percent:.2} %")
}

/// Seconds left at the current rate, or `None` when the rate cannot finish the transfer.
pub fn remaining_seconds(job: &TransferJob) -> Option<f64> {
    if !job.rate.is_finite() || job.rate <= 0.0 {
        return None;
    }
    let remaining = job.file_size.saturating_sub(job.bytes_received) as f64;
    Some(remaining / job.rate)
}

pub fn format_remaining(job: &TransferJob) -> String {
    match remaining_seconds(job) {
        Some(seconds) => format_hms(seconds),
        None => INFINITY_SYMBOL.to_string(),
    }
}

/// Whole seconds as `HH:MM:SS`. Hours keep counting past 24.
pub fn format_hms(seconds: f64) -> String {
    if !seconds.is_finite() {
        return INFINITY_SYMBOL.to_string();
    }
    let total = seconds.max(0.0).floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}
