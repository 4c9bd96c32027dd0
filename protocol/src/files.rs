//! File metadata exchanged between users, and the privacy-tolerant
//! comparisons used to decide whether two people are watching the same thing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::constants::{FILENAME_STRIP_CHARS, PRIVACY_HIDDEN_FILENAME};

const HASH_PREFIX_LEN: usize = 12;

/// What a user is playing. `name` and `size` may already be hashed or
/// replaced by the owner's privacy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub size: FileSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileSize {
    Bytes(u64),
    Hashed(String),
}

impl Default for FileSize {
    fn default() -> Self {
        FileSize::Bytes(0)
    }
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSize::Bytes(bytes) => write!(f, "{bytes}"),
            FileSize::Hashed(hash) => f.write_str(hash),
        }
    }
}

impl FileSize {
    /// Zero means "not sent" and matches anything.
    pub fn is_unknown(&self) -> bool {
        matches!(self, FileSize::Bytes(0))
    }
}

/// How much of a piece of metadata leaves the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivacyMode {
    #[default]
    SendRaw,
    SendHashed,
    DontSend,
}

impl FromStr for PrivacyMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "send-raw" | "sendraw" | "raw" => Ok(PrivacyMode::SendRaw),
            "send-hashed" | "sendhashed" | "hashed" => Ok(PrivacyMode::SendHashed),
            "dont-send" | "dontsend" | "hidden" => Ok(PrivacyMode::DontSend),
            other => Err(format!("unknown privacy mode '{other}'")),
        }
    }
}

impl FileInfo {
    pub fn new(name: impl Into<String>, duration: f64, size: u64) -> Self {
        Self {
            name: name.into(),
            duration,
            size: FileSize::Bytes(size),
        }
    }

    /// Rewrite name and size according to the owner's privacy settings.
    pub fn with_privacy(mut self, name_mode: PrivacyMode, size_mode: PrivacyMode) -> Self {
        match name_mode {
            PrivacyMode::SendRaw => {}
            PrivacyMode::SendHashed => self.name = hash_filename(&self.name),
            PrivacyMode::DontSend => self.name = PRIVACY_HIDDEN_FILENAME.to_string(),
        }
        match size_mode {
            PrivacyMode::SendRaw => {}
            PrivacyMode::SendHashed => self.size = FileSize::Hashed(hash_filesize(&self.size)),
            PrivacyMode::DontSend => self.size = FileSize::Bytes(0),
        }
        self
    }

    pub fn is_same(&self, other: &FileInfo, duration_threshold: f64) -> bool {
        self.differences(other, duration_threshold).is_empty()
    }

    /// Names of the attributes that do not match, in display order.
    pub fn differences(&self, other: &FileInfo, duration_threshold: f64) -> Vec<&'static str> {
        let mut differences = Vec::new();
        if !same_filename(&self.name, &other.name) {
            differences.push("name");
        }
        if !same_filesize(&self.size, &other.size) {
            differences.push("size");
        }
        if !same_file_duration(self.duration, other.duration, duration_threshold) {
            differences.push("duration");
        }
        differences
    }
}

pub fn strip_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|ch| !FILENAME_STRIP_CHARS.contains(ch))
        .collect()
}

fn short_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_PREFIX_LEN].to_string()
}

/// Deterministic hash of the normalized filename.
pub fn hash_filename(filename: &str) -> String {
    short_sha256(&strip_filename(filename))
}

pub fn hash_filesize(size: &FileSize) -> String {
    short_sha256(&size.to_string())
}

fn same_hashed(a_raw: &str, a_hashed: &str, b_raw: &str, b_hashed: &str) -> bool {
    a_raw == b_raw || a_raw == b_hashed || a_hashed == b_raw || a_hashed == b_hashed
}

/// Raw and hashed names compare equal to each other; the hidden sentinel
/// matches anything.
pub fn same_filename(a: &str, b: &str) -> bool {
    if a == PRIVACY_HIDDEN_FILENAME || b == PRIVACY_HIDDEN_FILENAME {
        return true;
    }
    same_hashed(
        &strip_filename(a),
        &hash_filename(a),
        &strip_filename(b),
        &hash_filename(b),
    )
}

pub fn same_filesize(a: &FileSize, b: &FileSize) -> bool {
    if a.is_unknown() || b.is_unknown() {
        return true;
    }
    same_hashed(
        &a.to_string(),
        &hash_filesize(a),
        &b.to_string(),
        &hash_filesize(b),
    )
}

/// Durations are compared in whole seconds.
pub fn same_file_duration(a: f64, b: f64, threshold: f64) -> bool {
    (a.round() - b.round()).abs() < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_filename_matches_its_hash() {
        let hashed = hash_filename("My Movie.mkv");
        assert_eq!(hashed.len(), 12);
        assert!(same_filename("My Movie.mkv", &hashed));
        assert!(same_filename(&hashed, "My Movie.mkv"));
        assert!(same_filename(&hashed, &hash_filename("My Movie.mkv")));
    }

    #[test]
    fn filename_comparison_ignores_punctuation() {
        assert!(same_filename("My.Movie.mkv", "My Movie mkv"));
        assert!(!same_filename("My Movie.mkv", "Other Movie.mkv"));
    }

    #[test]
    fn hidden_filename_matches_anything() {
        assert!(same_filename(PRIVACY_HIDDEN_FILENAME, "whatever.avi"));
    }

    #[test]
    fn zero_size_is_a_wildcard() {
        assert!(same_filesize(&FileSize::Bytes(0), &FileSize::Bytes(12345)));
        assert!(!same_filesize(&FileSize::Bytes(1), &FileSize::Bytes(12345)));
    }

    #[test]
    fn raw_size_matches_hashed_size() {
        let raw = FileSize::Bytes(12345);
        let hashed = FileSize::Hashed(hash_filesize(&raw));
        assert!(same_filesize(&raw, &hashed));
    }

    #[test]
    fn duration_tolerance_is_configurable() {
        assert!(same_file_duration(120.4, 121.9, 2.5));
        assert!(!same_file_duration(120.4, 121.9, 1.0));
    }

    #[test]
    fn privacy_modes_rewrite_metadata() {
        let file = FileInfo::new("Film.mkv", 100.0, 2048);
        let hidden = file.clone().with_privacy(PrivacyMode::DontSend, PrivacyMode::DontSend);
        assert_eq!(hidden.name, PRIVACY_HIDDEN_FILENAME);
        assert_eq!(hidden.size, FileSize::Bytes(0));

        let hashed = file.clone().with_privacy(PrivacyMode::SendHashed, PrivacyMode::SendHashed);
        assert_eq!(hashed.name, hash_filename("Film.mkv"));
        assert!(file.is_same(&hashed, 2.5));
    }

    #[test]
    fn differences_lists_every_mismatch() {
        let a = FileInfo::new("a.mkv", 100.0, 10);
        let b = FileInfo::new("b.mkv", 200.0, 20);
        assert_eq!(a.differences(&b, 2.5), vec!["name", "size", "duration"]);
    }

    #[test]
    fn size_deserializes_from_number_or_hash() {
        let raw: FileInfo =
            serde_json::from_str(r#"{"name":"x","duration":1.0,"size":42}"#).unwrap();
        assert_eq!(raw.size, FileSize::Bytes(42));
        let hashed: FileInfo =
            serde_json::from_str(r#"{"name":"x","duration":1.0,"size":"abcdef123456"}"#).unwrap();
        assert_eq!(hashed.size, FileSize::Hashed("abcdef123456".into()));
    }

    #[test]
    fn privacy_mode_parses_cli_spellings() {
        assert_eq!("send-hashed".parse::<PrivacyMode>(), Ok(PrivacyMode::SendHashed));
        assert_eq!("dont-send".parse::<PrivacyMode>(), Ok(PrivacyMode::DontSend));
        assert!("loud".parse::<PrivacyMode>().is_err());
    }
}
