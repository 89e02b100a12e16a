//! Failure signature normalization.
//!
//! The same scheme keys both the circuit breaker and pattern-memory
//! embeddings, so recall and rate limiting agree on what "the same failure"
//! means.

use crate::decisions::hex_lower;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

const MAX_PATTERN_LEN: usize = 200;

struct Rules {
    iso_date: Regex,
    clock_time: Regex,
    line_number: Regex,
    colon_line: Regex,
    unix_path: Regex,
    windows_path: Regex,
    tmp_path: Regex,
    mem_addr: Regex,
    uuid: Regex,
    port: Regex,
    whitespace: Regex,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| Rules {
        iso_date: Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap(),
        clock_time: Regex::new(r"\d{2}:\d{2}:\d{2}").unwrap(),
        line_number: Regex::new(r"line \d+").unwrap(),
        colon_line: Regex::new(r":\d+:").unwrap(),
        unix_path: Regex::new(r"/[\w/.\-]+\.(py|js|ts|java|go|rb|rs|cpp|c|h)").unwrap(),
        windows_path: Regex::new(r"[a-z]:\\[\w\\.\-]+\.(py|js|ts|java|go|rb|rs|cpp|c|h)").unwrap(),
        tmp_path: Regex::new(r"/tmp/[\w\-]+").unwrap(),
        mem_addr: Regex::new(r"0x[0-9a-f]+").unwrap(),
        uuid: Regex::new(
            r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
        )
        .unwrap(),
        port: Regex::new(r":\d{2,5}\b").unwrap(),
        whitespace: Regex::new(r"\s+").unwrap(),
    })
}

/// Erase the variable tokens from a failure reason: dates, times, line
/// numbers, file paths, temp paths, addresses, UUIDs, ports.
pub fn normalize_error(reason: &str) -> String {
    let r = rules();
    let mut s = reason.to_lowercase();
    s = r.iso_date.replace_all(&s, "").into_owned();
    s = r.clock_time.replace_all(&s, "").into_owned();
    s = r.line_number.replace_all(&s, "line X").into_owned();
    s = r.colon_line.replace_all(&s, ":X:").into_owned();
    s = r.unix_path.replace_all(&s, "/path/file.ext").into_owned();
    s = r.windows_path.replace_all(&s, "c:/path/file.ext").into_owned();
    s = r.tmp_path.replace_all(&s, "/tmp/X").into_owned();
    s = r.mem_addr.replace_all(&s, "0xADDR").into_owned();
    s = r.uuid.replace_all(&s, "UUID").into_owned();
    s = r.port.replace_all(&s, ":PORT").into_owned();
    let s = r.whitespace.replace_all(&s, " ");
    let s = s.trim();
    s.chars().take(MAX_PATTERN_LEN).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignature {
    pub repository: String,
    pub branch: String,
    pub error_pattern: String,
}

impl FailureSignature {
    pub fn new(repository: &str, branch: &str, failure_reason: &str) -> Self {
        Self {
            repository: repository.to_string(),
            branch: branch.to_string(),
            error_pattern: normalize_error(failure_reason),
        }
    }

    /// Stable key: first 16 hex chars of sha256 over repo:branch:pattern.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.repository.as_bytes());
        hasher.update(b":");
        hasher.update(self.branch.as_bytes());
        hasher.update(b":");
        hasher.update(self.error_pattern.as_bytes());
        let digest = hex_lower(&hasher.finalize());
        digest[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erases_variable_tokens() {
        let a = normalize_error(
            "Error at /src/app/main.py line 42: timeout connecting to 10.0.0.1:8080 at 2024-03-01 12:30:45",
        );
        let b = normalize_error(
            "Error at /lib/util/other.py line 7: timeout connecting to 10.0.0.1:9090 at 2024-03-02 01:02:03",
        );
        assert_eq!(a, b);
        assert!(a.contains("line X"));
        assert!(!a.contains("8080"));
    }

    #[test]
    fn erases_addresses_and_uuids() {
        let s = normalize_error("panic at 0xdeadbeef in job 123e4567-e89b-12d3-a456-426614174000");
        assert!(s.contains("0xADDR"));
        assert!(s.contains("UUID"));
    }

    #[test]
    fn key_is_stable_and_branch_scoped() {
        let a = FailureSignature::new("x/y", "main", "npm install timeout after 30s");
        let b = FailureSignature::new("x/y", "main", "npm install timeout after  30s");
        let c = FailureSignature::new("x/y", "develop", "npm install timeout after 30s");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.key().len(), 16);
    }

    #[test]
    fn caps_pattern_length() {
        let long = "e".repeat(1000);
        assert!(normalize_error(&long).len() <= 200);
    }
}
