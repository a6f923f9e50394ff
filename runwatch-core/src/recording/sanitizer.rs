use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use url::Url;

const REDACTED: &str = "[REDACTED]";

/// Headers that carry credentials and must be redacted.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "proxy-authorization",
    "set-cookie",
    "x-github-token",
];

const SENSITIVE_QUERY_PARAMS: &[&str] = &["access_token", "client_secret", "token"];

pub struct Sanitizer;

impl Sanitizer {
    pub fn is_sensitive_header(name: &str) -> bool {
        SENSITIVE_HEADERS
            .iter()
            .any(|sensitive| sensitive.eq_ignore_ascii_case(name))
    }

    /// Header values that are not valid UTF-8 are dropped.
    pub fn headers(headers: &HeaderMap) -> BTreeMap<String, String> {
        headers
            .iter()
            .filter_map(|(name, value)| {
                let value = if Self::is_sensitive_header(name.as_str()) {
                    REDACTED.to_string()
                } else {
                    value.to_str().ok()?.to_string()
                };
                Some((name.to_string(), value))
            })
            .collect()
    }

    /// The URL with credential-bearing query parameters redacted.
    pub fn url(url: &Url) -> String {
        let is_sensitive = |key: &str| {
            SENSITIVE_QUERY_PARAMS
                .iter()
                .any(|p| p.eq_ignore_ascii_case(key))
        };

        if !url.query_pairs().any(|(key, _)| is_sensitive(&key)) {
            return url.to_string();
        }

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if is_sensitive(&key) {
                    REDACTED.to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();

        let mut clean = url.clone();
        clean.query_pairs_mut().clear().extend_pairs(pairs.iter());
        clean.to_string()
    }
}
