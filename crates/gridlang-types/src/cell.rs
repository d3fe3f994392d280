//! Grid cell addresses.
//!
//! Columns are bijective base-26 letter sequences (`A`..`Z`, `AA`..), rows
//! are 1-based integers. Addresses order row-major so that a sorted map of
//! cells reads top-to-bottom, left-to-right.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure to parse an `A1`-style address or column name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty cell address")]
    Empty,
    #[error("invalid column name `{0}`")]
    InvalidColumn(String),
    #[error("invalid row in `{0}`")]
    InvalidRow(String),
}

/// A single cell position, both coordinates 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellAddr {
    pub row: u32,
    pub col: u32,
}

impl CellAddr {
    pub fn new(col: u32, row: u32) -> Self {
        Self { row, col }
    }

    /// Parse `"AB12"` (case-insensitive).
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AddressError::Empty);
        }
        let split = text
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(|| AddressError::InvalidRow(text.to_string()))?;
        let (letters, digits) = text.split_at(split);
        let col = column_index(letters)?;
        let row: u32 = digits
            .parse()
            .map_err(|_| AddressError::InvalidRow(text.to_string()))?;
        if row == 0 {
            return Err(AddressError::InvalidRow(text.to_string()));
        }
        Ok(Self { row, col })
    }

    /// Shift by a (possibly negative) offset; `None` when leaving the grid.
    pub fn offset(self, d_col: i64, d_row: i64) -> Option<Self> {
        let col = i64::from(self.col) + d_col;
        let row = i64::from(self.row) + d_row;
        if col < 1 || row < 1 {
            return None;
        }
        Some(Self {
            col: u32::try_from(col).ok()?,
            row: u32::try_from(row).ok()?,
        })
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row)
    }
}

impl FromStr for CellAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// `1 -> "A"`, `26 -> "Z"`, `27 -> "AA"`.
pub fn column_name(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// `"A" -> 1`, `"ab" -> 28`.
pub fn column_index(letters: &str) -> Result<u32, AddressError> {
    if letters.is_empty() {
        return Err(AddressError::InvalidColumn(letters.to_string()));
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(AddressError::InvalidColumn(letters.to_string()));
        }
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(digit))
            .ok_or_else(|| AddressError::InvalidColumn(letters.to_string()))?;
    }
    Ok(col)
}
