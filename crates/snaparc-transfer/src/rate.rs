//! Transfer rate caps in the meter's size syntax.

use std::fmt;
use std::str::FromStr;

use crate::error::TransferError;

/// A transfer rate cap such as `500K` or `2M` (bytes per second).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    amount: u64,
    suffix: Option<char>,
}

impl RateLimit {
    /// The cap in bytes per second.
    pub fn bytes_per_sec(&self) -> u64 {
        let shift = match self.suffix {
            None => 0,
            Some('K') => 10,
            Some('M') => 20,
            Some('G') => 30,
            Some(_) => 40,
        };
        self.amount.saturating_mul(1u64 << shift)
    }
}

impl FromStr for RateLimit {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransferError::InvalidRateLimit {
            input: s.to_string(),
        };
        let trimmed = s.trim();
        let (digits, suffix) = match trimmed.chars().last() {
            Some(c) if c.is_ascii_alphabetic() => {
                let upper = c.to_ascii_uppercase();
                if !matches!(upper, 'K' | 'M' | 'G' | 'T') {
                    return Err(invalid());
                }
                (&trimmed[..trimmed.len() - 1], Some(upper))
            }
            _ => (trimmed, None),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }
        let limit = RateLimit { amount, suffix };
        if limit.bytes_per_sec() == u64::MAX {
            return Err(invalid());
        }
        Ok(limit)
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suffix {
            Some(suffix) => write!(f, "{}{}", self.amount, suffix),
            None => write!(f, "{}", self.amount),
        }
    }
}
