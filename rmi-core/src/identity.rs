//! Identity types for RMI entities

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RmiResult, ValidationError};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Job identifier using UUIDv7 so queue entries sort by creation time.
pub type JobId = Uuid;

/// Generate a new UUIDv7 job id.
pub fn new_job_id() -> JobId {
    Uuid::now_v7()
}

/// Citizen identifier: a validated 11-digit CPF.
///
/// This is the primary key across the durable store, every cache key and
/// every sync job. Formatting characters (`.`, `-`, spaces) are stripped on
/// parse, so `"123.456.789-09"` and `"12345678909"` are the same citizen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CitizenId(String);

impl CitizenId {
    /// Parse and validate a CPF.
    pub fn parse(raw: &str) -> RmiResult<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if !is_valid_cpf(&digits) {
            return Err(ValidationError::InvalidCpf {
                value: raw.to_string(),
            }
            .into());
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CitizenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CitizenId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CitizenId {
    type Error = crate::RmiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CitizenId> for String {
    fn from(id: CitizenId) -> Self {
        id.0
    }
}

/// Check a CPF: formatting is ignored, then the value must have 11 digits,
/// not all equal, with both mod-11 check digits matching.
pub fn is_valid_cpf(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let weight_start = len as u32 + 1;
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, d)| d * (weight_start - i as u32))
            .sum();
        let rest = (sum * 10) % 11;
        if rest == 10 {
            0
        } else {
            rest
        }
    };

    check(9) == digits[9] && check(10) == digits[10]
}
