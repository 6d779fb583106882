//! Conflict and staleness policy for self-declared resubmissions.
//!
//! A citizen resubmitting the value they already have is told so, unless
//! the stored value is old enough that confirming it is itself useful.

use std::time::Duration;

use rmi_core::{
    Address, Email, Phone, RmiError, RmiResult, SubFieldKind, SubFieldRecord, SubFieldValue,
    Timestamp,
};

#[derive(Debug, Clone, Copy)]
pub struct ConflictPolicy {
    outdated_threshold: Duration,
}

impl ConflictPolicy {
    pub fn new(outdated_threshold: Duration) -> Self {
        Self { outdated_threshold }
    }

    /// A value is stale when it carries no timestamp or is older than the
    /// outdated threshold.
    pub fn is_stale(&self, updated_at: Option<Timestamp>, now: Timestamp) -> bool {
        let Some(updated_at) = updated_at else {
            return true;
        };
        match (now - updated_at).to_std() {
            Ok(age) => age > self.outdated_threshold,
            // Timestamps from the future are fresh.
            Err(_) => false,
        }
    }

    /// Reject `candidate` when it repeats `current` under the field's rule.
    pub fn check(
        &self,
        current: Option<&SubFieldRecord>,
        candidate: &SubFieldValue,
        now: Timestamp,
    ) -> RmiResult<()> {
        let Some(current) = current else {
            return Ok(());
        };
        let repeated = match (&current.value, candidate) {
            (SubFieldValue::Address(old), SubFieldValue::Address(new)) => same_address(old, new),
            (SubFieldValue::Email(old), SubFieldValue::Email(new)) => {
                same_email(old, new) && !self.is_stale(current.updated_at, now)
            }
            (SubFieldValue::Phone(old), SubFieldValue::Phone(new)) => {
                old.is_verified() && same_phone(old, new) && !self.is_stale(current.updated_at, now)
            }
            _ => false,
        };
        if repeated {
            return Err(RmiError::Conflict {
                field: candidate.kind(),
            });
        }
        Ok(())
    }

    /// Whether `kind` has a resubmission rule at all.
    pub fn applies_to(kind: SubFieldKind) -> bool {
        matches!(
            kind,
            SubFieldKind::Address | SubFieldKind::Email | SubFieldKind::Phone
        )
    }
}

fn same_address(old: &Address, new: &Address) -> bool {
    match (&old.principal, &new.principal) {
        (Some(a), Some(b)) => {
            a.bairro == b.bairro
                && a.cep == b.cep
                && a.complemento == b.complemento
                && a.estado == b.estado
                && a.logradouro == b.logradouro
                && a.municipio == b.municipio
                && a.numero == b.numero
                && a.tipo_logradouro == b.tipo_logradouro
        }
        _ => false,
    }
}

fn same_email(old: &Email, new: &Email) -> bool {
    let valor = |e: &Email| e.principal.as_ref().and_then(|p| p.valor.clone());
    matches!((valor(old), valor(new)), (Some(a), Some(b)) if a == b)
}

fn same_phone(old: &Phone, new: &Phone) -> bool {
    match (&old.principal, &new.principal) {
        (Some(a), Some(b)) => {
            a.valor.is_some() && a.ddi == b.ddi && a.ddd == b.ddd && a.valor == b.valor
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use proptest::prelude::*;
    use rmi_core::{AddressInput, CitizenId, EmailInput, PhoneInput};

    const THRESHOLD: Duration = Duration::from_secs(180 * 24 * 3600);

    fn policy() -> ConflictPolicy {
        ConflictPolicy::new(THRESHOLD)
    }

    fn cpf() -> CitizenId {
        CitizenId::parse("12345678909").unwrap()
    }

    fn record(value: SubFieldValue, updated_at: Option<Timestamp>) -> SubFieldRecord {
        SubFieldRecord {
            cpf: cpf(),
            value,
            updated_at,
        }
    }

    fn address_input() -> AddressInput {
        AddressInput {
            bairro: "Centro".to_string(),
            cep: "20040-020".to_string(),
            complemento: None,
            estado: "RJ".to_string(),
            logradouro: "Rua da Assembleia".to_string(),
            municipio: "Rio de Janeiro".to_string(),
            numero: "10".to_string(),
            tipo_logradouro: None,
        }
    }

    fn phone_input() -> PhoneInput {
        PhoneInput {
            ddi: "55".to_string(),
            ddd: "21".to_string(),
            valor: "987654321".to_string(),
        }
    }

    #[test]
    fn test_missing_timestamp_is_stale() {
        assert!(policy().is_stale(None, Utc::now()));
    }

    #[test]
    fn test_identical_address_always_conflicts() {
        let now = Utc::now();
        let ancient = now - ChronoDuration::days(1000);
        let current = record(
            SubFieldValue::Address(address_input().to_address(ancient)),
            Some(ancient),
        );
        let candidate = SubFieldValue::Address(address_input().to_address(now));

        let err = policy().check(Some(&current), &candidate, now).unwrap_err();
        assert_eq!(
            err,
            RmiError::Conflict {
                field: SubFieldKind::Address
            }
        );

        let mut moved = address_input();
        moved.numero = "11".to_string();
        assert!(policy()
            .check(Some(&current), &SubFieldValue::Address(moved.to_address(now)), now)
            .is_ok());
    }

    #[test]
    fn test_email_conflict_is_staleness_gated() {
        let now = Utc::now();
        let email = EmailInput {
            valor: "maria@example.com".to_string(),
        };
        let candidate = SubFieldValue::Email(email.to_email(now));

        let fresh = record(
            SubFieldValue::Email(email.to_email(now)),
            Some(now - ChronoDuration::days(10)),
        );
        assert!(policy().check(Some(&fresh), &candidate, now).unwrap_err().is_conflict());

        let stale = record(
            SubFieldValue::Email(email.to_email(now)),
            Some(now - ChronoDuration::days(181)),
        );
        assert!(policy().check(Some(&stale), &candidate, now).is_ok());

        let legacy = record(SubFieldValue::Email(email.to_email(now)), None);
        assert!(policy().check(Some(&legacy), &candidate, now).is_ok());
    }

    #[test]
    fn test_phone_conflict_requires_verified_fresh_match() {
        let now = Utc::now();
        let candidate = SubFieldValue::Phone(phone_input().to_phone(false, now));
        let recent = Some(now - ChronoDuration::days(10));

        let verified = record(SubFieldValue::Phone(phone_input().to_phone(true, now)), recent);
        assert!(policy().check(Some(&verified), &candidate, now).is_err());

        let unverified = record(SubFieldValue::Phone(phone_input().to_phone(false, now)), recent);
        assert!(policy().check(Some(&unverified), &candidate, now).is_ok());

        let stale = record(
            SubFieldValue::Phone(phone_input().to_phone(true, now)),
            Some(now - ChronoDuration::days(200)),
        );
        assert!(policy().check(Some(&stale), &candidate, now).is_ok());
    }

    #[test]
    fn test_no_rule_for_ethnicity_or_display_name() {
        let now = Utc::now();
        let current = record(SubFieldValue::Ethnicity("parda".to_string()), Some(now));
        assert!(policy()
            .check(Some(&current), &SubFieldValue::Ethnicity("parda".to_string()), now)
            .is_ok());
        assert!(!ConflictPolicy::applies_to(SubFieldKind::DisplayName));
        assert!(policy()
            .check(None, &SubFieldValue::Ethnicity("parda".to_string()), now)
            .is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_staleness_is_monotonic_in_age(a in 0i64..1000, b in 0i64..1000) {
            let now = Utc::now();
            let (younger, older) = if a <= b { (a, b) } else { (b, a) };
            let stale_young = policy().is_stale(Some(now - ChronoDuration::days(younger)), now);
            let stale_old = policy().is_stale(Some(now - ChronoDuration::days(older)), now);
            prop_assert!(!stale_young || stale_old);
        }
    }
}
