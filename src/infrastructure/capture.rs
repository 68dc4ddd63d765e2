//! Hex capture files: one notification per line.
//!
//! ```text
//! # KS-S18, standing still
//! aa55 1a19 0000 ...
//! AA:55:1A:19:00:00 ...
//! ```
//!
//! Whitespace and `:` separators are ignored; `#` starts a comment.

use crate::error::{Result, WheelError};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureLine {
    /// 1-based line in the source file
    pub line: usize,
    pub data: Vec<u8>,
}

pub fn parse_capture(text: &str) -> Result<Vec<CaptureLine>> {
    let mut lines = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let content = raw.split('#').next().unwrap_or_default();
        let digits: String = content
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        if digits.is_empty() {
            continue;
        }
        let data = hex::decode(&digits).map_err(|e| WheelError::InvalidCapture {
            line: index + 1,
            reason: e.to_string(),
        })?;
        lines.push(CaptureLine {
            line: index + 1,
            data,
        });
    }
    Ok(lines)
}

pub fn read_capture(path: &Path) -> Result<Vec<CaptureLine>> {
    let text = fs::read_to_string(path)?;
    parse_capture(&text)
}
