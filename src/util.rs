// src/util.rs
//
// Small helpers the engine and CLI consume: URL checks, filename derivation,
// human-readable formatting and error logging.

use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Accepts only absolute `http`/`https` URLs.
pub fn is_valid_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

/// Derive a local filename from the last path segment of `url`.
pub fn extract_file_name(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_owned))
    });

    match segment.map(|s| sanitize_file_name(&s)) {
        Some(name) if !name.is_empty() => name,
        _ => fallback_file_name(),
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    cleaned.trim_end_matches([' ', '.']).to_string()
}

fn fallback_file_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("download_{millis}")
}

/// `1536` -> `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// `3725` -> `"1h 2m 5s"`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

pub fn log_error(message: &str, err: &dyn std::error::Error) {
    tracing::error!(error = %err, "{message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_schemes_are_valid() {
        assert!(is_valid_url("http://example.com/file.zip"));
        assert!(is_valid_url("https://example.com/"));
        assert!(!is_valid_url("ftp://example.com/file.zip"));
        assert!(!is_valid_url("file:///etc/passwd"));
        assert!(!is_valid_url("not a url"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn file_name_comes_from_last_segment() {
        assert_eq!(extract_file_name("https://example.com/a/b/archive.zip"), "archive.zip");
        assert_eq!(
            extract_file_name("https://example.com/report.pdf?token=abc#page=2"),
            "report.pdf"
        );
    }

    #[test]
    fn file_name_is_sanitized() {
        assert_eq!(extract_file_name("https://example.com/a%7Cb.txt"), "a%7Cb.txt");
        assert_eq!(sanitize_file_name("we:ird*name?.bin"), "we_ird_name_.bin");
        assert_eq!(sanitize_file_name("trailing. . "), "trailing");
    }

    #[test]
    fn file_name_falls_back_when_path_is_empty() {
        assert!(extract_file_name("https://example.com/").starts_with("download_"));
        assert!(extract_file_name("garbage").starts_with("download_"));
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1_000_000), "976.6 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn durations_are_humanized() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }
}
