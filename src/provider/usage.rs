//! `subscription-userinfo` header
//!
//! Providers report traffic usage as `upload=..; download=..; total=..;
//! expire=..`. Byte counts and the expiry (unix seconds) are integers,
//! though some servers send floats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SUBSCRIPTION_USERINFO_HEADER: &str = "subscription-userinfo";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUserinfo {
    pub upload: u64,
    pub download: u64,
    pub total: u64,
    /// Unix timestamp in seconds, 0 when the subscription never expires
    pub expire: u64,
}

fn parse_number(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.parse::<u64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

/// Parse the header value. Returns `None` when no known key is present.
pub fn parse_subscription_userinfo(raw: &str) -> Option<SubscriptionUserinfo> {
    let mut info = SubscriptionUserinfo::default();
    let mut recognized = false;

    for pair in raw.split([';', ',']) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Some(value) = parse_number(value) else {
            continue;
        };

        let slot = match key.trim().to_ascii_lowercase().as_str() {
            "upload" => &mut info.upload,
            "download" => &mut info.download,
            "total" => &mut info.total,
            "expire" => &mut info.expire,
            _ => continue,
        };
        *slot = value;
        recognized = true;
    }

    recognized.then_some(info)
}

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Human readable size with binary multiples
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

impl SubscriptionUserinfo {
    pub fn used(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.used())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.expire == 0 {
            return None;
        }
        i64::try_from(self.expire)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn summary(&self) -> String {
        let expires = self
            .expires_at()
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_string());

        format!(
            "Used: {} | Remaining: {} | Total: {} | Expires: {}",
            format_bytes(self.used()),
            format_bytes(self.remaining()),
            format_bytes(self.total),
            expires
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_header() {
        let info = parse_subscription_userinfo(
            "upload=891332010; download=29921186546; total=322122547200; expire=1586330887",
        )
        .unwrap();
        assert_eq!(
            info,
            SubscriptionUserinfo {
                upload: 891332010,
                download: 29921186546,
                total: 322122547200,
                expire: 1586330887,
            }
        );
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let info = parse_subscription_userinfo("upload=1;download=2").unwrap();
        assert_eq!(info.total, 0);
        assert_eq!(info.expire, 0);
    }

    #[test]
    fn test_comma_separator_and_case() {
        let info = parse_subscription_userinfo("Upload=10, Download=20, TOTAL=100").unwrap();
        assert_eq!(info.used(), 30);
        assert_eq!(info.remaining(), 70);
    }

    #[test]
    fn test_unparsable_values_are_ignored() {
        let info = parse_subscription_userinfo("upload=abc; download=5; total=1.5e3").unwrap();
        assert_eq!(info.upload, 0);
        assert_eq!(info.download, 5);
        assert_eq!(info.total, 1500);
    }

    #[test]
    fn test_no_known_keys() {
        assert_eq!(parse_subscription_userinfo(""), None);
        assert_eq!(parse_subscription_userinfo("foo=1; bar"), None);
        assert_eq!(parse_subscription_userinfo("upload=x"), None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024 * 1024), "10.00 GB");
    }

    #[test]
    fn test_summary() {
        let info = SubscriptionUserinfo {
            upload: 1024 * 1024 * 1024,
            download: 0,
            total: 10 * 1024 * 1024 * 1024,
            expire: 1_700_000_000,
        };
        assert_eq!(
            info.summary(),
            "Used: 1.00 GB | Remaining: 9.00 GB | Total: 10.00 GB | Expires: 2023-11-14"
        );

        let forever = SubscriptionUserinfo { expire: 0, ..info };
        assert!(forever.summary().ends_with("Expires: never"));
    }
}
