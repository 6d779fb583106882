//! Input validation for self-declared submissions.
//!
//! Every check here runs before any cache or store I/O. The first failing
//! rule is reported.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{AddressInput, EmailInput, PhoneInput, RmiResult, ValidationError};

/// Accepted ethnicity values.
pub const VALID_ETHNICITIES: &[&str] = &["branca", "preta", "parda", "amarela", "indigena", "outra"];

/// Country code whose numbers require a 2-digit area code.
pub const BRAZIL_DDI: &str = "55";

const MAX_DISPLAY_NAME_LEN: usize = 100;

static CEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}-?\d{3}$").expect("Invalid CEP regex"));
static DDI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}$").expect("Invalid DDI regex"));
static DDD_BR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}$").expect("Invalid DDD regex"));
static DDD_INTL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,4}$").expect("Invalid DDD regex"));
static SUBSCRIBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{7,15}$").expect("Invalid phone regex"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("Invalid email regex")
});

fn required(field: &str, value: &str) -> RmiResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }
        .into());
    }
    Ok(())
}

fn max_len(field: &str, value: &str, max: usize) -> RmiResult<()> {
    if value.chars().count() > max {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("must not exceed {} characters", max),
        }
        .into());
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> crate::RmiError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

pub fn validate_address(input: &AddressInput) -> RmiResult<()> {
    required("cep", &input.cep)?;
    required("estado", &input.estado)?;
    required("municipio", &input.municipio)?;
    required("logradouro", &input.logradouro)?;
    required("numero", &input.numero)?;
    required("bairro", &input.bairro)?;

    if !CEP_RE.is_match(&input.cep) {
        return Err(invalid("cep", "must be in format 00000-000 or 00000000"));
    }
    if input.estado.chars().count() != 2 {
        return Err(invalid("estado", "must be exactly 2 characters"));
    }

    max_len("logradouro", &input.logradouro, 200)?;
    max_len("numero", &input.numero, 20)?;
    if let Some(complemento) = &input.complemento {
        max_len("complemento", complemento, 100)?;
    }
    max_len("bairro", &input.bairro, 100)?;
    max_len("municipio", &input.municipio, 100)?;
    Ok(())
}

/// Phone rules: DDI of 1-3 digits; DDD required only for Brazil, where it
/// is exactly 2 digits (1-4 elsewhere); subscriber of 7-15 digits; the
/// concatenated number between 10 and 15 characters.
pub fn validate_phone(input: &PhoneInput) -> RmiResult<()> {
    let full = input.full_number();
    let phone_err = |reason: &str| -> crate::RmiError {
        ValidationError::InvalidPhone {
            number: full.clone(),
            reason: reason.to_string(),
        }
        .into()
    };

    required("ddi", &input.ddi)?;
    required("valor", &input.valor)?;
    if !DDI_RE.is_match(&input.ddi) {
        return Err(phone_err("DDI must be 1-3 digits"));
    }

    if input.ddi == BRAZIL_DDI {
        required("ddd", &input.ddd)?;
        if !DDD_BR_RE.is_match(&input.ddd) {
            return Err(phone_err("DDD must be exactly 2 digits for Brazil"));
        }
    } else if !input.ddd.is_empty() && !DDD_INTL_RE.is_match(&input.ddd) {
        return Err(phone_err("DDD must be 1-4 digits for international numbers"));
    }

    if !SUBSCRIBER_RE.is_match(&input.valor) {
        return Err(phone_err("phone number must be 7-15 digits"));
    }
    if full.len() < 10 || full.len() > 15 {
        return Err(phone_err("full number must have 10 to 15 digits"));
    }
    Ok(())
}

pub fn validate_email(input: &EmailInput) -> RmiResult<()> {
    required("valor", &input.valor)?;
    if !EMAIL_RE.is_match(&input.valor) {
        return Err(invalid("valor", "invalid email format"));
    }
    max_len("valor", &input.valor, 254)?;
    if let Some((_, domain)) = input.valor.split_once('@') {
        if domain.len() > 253 {
            return Err(invalid("valor", "email domain is too long"));
        }
        if domain.starts_with('.') || domain.ends_with('.') {
            return Err(invalid("valor", "email domain cannot start or end with a dot"));
        }
    }
    Ok(())
}

pub fn is_valid_ethnicity(value: &str) -> bool {
    VALID_ETHNICITIES.contains(&value)
}

pub fn validate_ethnicity(value: &str) -> RmiResult<()> {
    required("valor", value)?;
    if !is_valid_ethnicity(value) {
        return Err(ValidationError::InvalidEthnicity {
            value: value.to_string(),
            options: VALID_ETHNICITIES.join(", "),
        }
        .into());
    }
    Ok(())
}

pub fn validate_display_name(value: &str) -> RmiResult<()> {
    required("nome_exibicao", value)?;
    max_len("nome_exibicao", value, MAX_DISPLAY_NAME_LEN)
}
