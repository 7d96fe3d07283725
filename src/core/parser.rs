//! Ledger parsing
//!
//! Turns raw pasted text into validated `(address, amount)` entries. One
//! line per transfer, address and amount separated by whitespace or a comma.
//! Lines may carry a zero-padded display ordinal (`012. 0x... 1.5`) from an
//! earlier echo; it is stripped before tokenizing. Validation is whole-input:
//! every bad line is reported, none aborts the pass.

use crate::core::types::{Address, Amount, Entry};
use crate::utils::error::LineError;
use crate::utils::units::{self, UnitsError};
use once_cell::sync::Lazy;
use regex::Regex;

static ORDINAL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{3,4}\.?\s*)+").expect("ordinal pattern"));
static TOKEN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,\s]+").expect("split pattern"));

/// Result of a whole-input validation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    /// Valid entries with contiguous 1-based ordinals
    pub entries: Vec<Entry>,
    /// Per-line failures, in input order
    pub errors: Vec<LineError>,
    /// Sum of all valid entry amounts
    pub total_amount: Amount,
}

impl ParseOutcome {
    /// True when every non-blank line validated
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse raw ledger text into validated entries.
///
/// `decimals` scales human-readable amounts to token base units. Blank lines
/// consume no ordinal. Pure function; the caller owns echoing formatted text
/// back to the input surface.
pub fn parse(raw: &str, decimals: u8) -> ParseOutcome {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    let mut total: Amount = 0;

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let clean = ORDINAL_PREFIX.replace(trimmed, "");
        let tokens: Vec<&str> = TOKEN_SPLIT.split(clean.trim()).filter(|t| !t.is_empty()).collect();

        if tokens.len() < 2 {
            errors.push(LineError {
                line: line_no,
                message: format!("missing address or amount in \"{}\"", clean.trim()),
            });
            continue;
        }

        let address = match Address::parse(tokens[0]) {
            Ok(addr) => addr,
            Err(_) => {
                errors.push(LineError {
                    line: line_no,
                    message: format!("invalid address \"{}\"", tokens[0]),
                });
                continue;
            }
        };

        let amount = match units::parse_units(tokens[1], decimals) {
            Ok(0) => {
                errors.push(LineError {
                    line: line_no,
                    message: format!("amount \"{}\" must be greater than zero", tokens[1]),
                });
                continue;
            }
            Ok(amount) => amount,
            Err(UnitsError::TooManyDecimals { .. }) => {
                errors.push(LineError {
                    line: line_no,
                    message: format!(
                        "amount \"{}\" exceeds the token's {} decimal places",
                        tokens[1], decimals
                    ),
                });
                continue;
            }
            Err(err) => {
                errors.push(LineError {
                    line: line_no,
                    message: err.to_string(),
                });
                continue;
            }
        };

        match total.checked_add(amount) {
            Some(sum) => total = sum,
            None => {
                errors.push(LineError {
                    line: line_no,
                    message: "ledger total overflows 128 bits".to_string(),
                });
                continue;
            }
        }

        entries.push(Entry {
            // Re-numbered below once the pass is complete.
            ordinal: 0,
            address,
            amount,
        });
    }

    for (i, entry) in entries.iter_mut().enumerate() {
        entry.ordinal = (i + 1) as u32;
    }

    ParseOutcome {
        entries,
        errors,
        total_amount: total,
    }
}

/// Echo entries back as zero-padded `NNN. address amount` lines
pub fn format_ledger(entries: &[Entry], decimals: u8) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "{:03}. {} {}",
                e.ordinal,
                e.address,
                units::format_units(e.amount, decimals)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
