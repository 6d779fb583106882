//! Phone verification records.

use serde::{Deserialize, Serialize};

use crate::{Phone, PhoneInput, Timestamp};

/// Number of digits in a verification code.
pub const VERIFICATION_CODE_LENGTH: usize = 6;

/// A pending phone verification for one citizen.
///
/// At most one live record exists per citizen: issuing a new one deletes
/// the others. A record whose `expires_at` has passed is inert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneVerification {
    pub cpf: String,
    pub telefone: Phone,
    pub phone_number: String,
    pub code: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl PhoneVerification {
    pub fn new(
        cpf: impl Into<String>,
        input: &PhoneInput,
        code: impl Into<String>,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            cpf: cpf.into(),
            telefone: input.to_phone(false, created_at),
            phone_number: input.full_number(),
            code: code.into(),
            created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Result of submitting a verification code.
///
/// A wrong code leaves the pending record in place, so the citizen may try
/// again until it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    CodeMismatch,
    ExpiredOrNotFound,
}

impl VerificationOutcome {
    /// Compare a submitted code against the live record, if any.
    pub fn judge(record: Option<&PhoneVerification>, submitted: &str, now: Timestamp) -> Self {
        match record {
            None => VerificationOutcome::ExpiredOrNotFound,
            Some(r) if r.is_expired(now) => VerificationOutcome::ExpiredOrNotFound,
            Some(r) if r.code != submitted => VerificationOutcome::CodeMismatch,
            Some(_) => VerificationOutcome::Verified,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }
}
