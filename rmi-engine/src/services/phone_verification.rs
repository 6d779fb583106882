//! Phone ownership verification.
//!
//! A declared phone is held in a pending record with a short-lived code.
//! Only when the citizen echoes the code back does the phone go through the
//! normal write path, stamped as verified.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rmi_core::{
    validate_phone, CitizenId, ConfigError, PhoneInput, PhoneVerification, RmiResult,
    SubFieldValue, Timestamp, VerificationOutcome, VERIFICATION_CODE_LENGTH,
};
use rmi_storage::{with_deadline, VerificationStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::services::composite_service::CompositeCache;
use crate::services::write_service::CacheService;

/// Delivers verification codes to the citizen (WhatsApp, SMS, ...).
#[async_trait]
pub trait CodeNotifier: Send + Sync {
    async fn send_code(&self, phone_number: &str, code: &str) -> RmiResult<()>;
}

/// What the caller learns about a freshly issued verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingVerification {
    pub phone_number: String,
    pub expires_at: Timestamp,
}

/// Random numeric code of [`VERIFICATION_CODE_LENGTH`] digits.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..VERIFICATION_CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

#[derive(Clone)]
pub struct PhoneVerificationService {
    store: Arc<dyn VerificationStore>,
    writes: CacheService,
    composite: CompositeCache,
    notifier: Option<Arc<dyn CodeNotifier>>,
    ttl: Duration,
    deadline: Duration,
}

impl PhoneVerificationService {
    pub fn new(
        store: Arc<dyn VerificationStore>,
        writes: CacheService,
        composite: CompositeCache,
        notifier: Option<Arc<dyn CodeNotifier>>,
        ttl: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            writes,
            composite,
            notifier,
            ttl,
            deadline,
        }
    }

    /// Issue a new code for `input`, superseding any earlier attempt.
    ///
    /// The phone itself is not written anywhere the composite view reads.
    pub async fn begin_phone_verification(
        &self,
        cpf: &CitizenId,
        input: &PhoneInput,
    ) -> RmiResult<PendingVerification> {
        validate_phone(input)?;
        let now = Utc::now();
        self.writes
            .reject_unchanged(cpf, &SubFieldValue::Phone(input.to_phone(false, now)))
            .await?;

        match with_deadline(self.deadline, "verifications.delete_all", self.store.delete_all_for(cpf)).await {
            Ok(removed) if removed > 0 => debug!(cpf = %cpf, removed, "superseded earlier verifications"),
            Ok(_) => {}
            Err(e) => warn!(cpf = %cpf, error = %e, "failed to delete earlier verifications"),
        }

        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| ConfigError::InvalidValue {
            field: "verification_ttl".to_string(),
            value: format!("{:?}", self.ttl),
            reason: e.to_string(),
        })?;
        let record = PhoneVerification::new(cpf.as_str(), input, generate_code(), now, now + ttl);
        with_deadline(self.deadline, "verifications.insert", self.store.insert(&record)).await?;
        info!(cpf = %cpf, expires_at = %record.expires_at, "phone verification issued");

        match &self.notifier {
            Some(notifier) => {
                if let Err(e) = notifier.send_code(&record.phone_number, &record.code).await {
                    warn!(cpf = %cpf, error = %e, "failed to deliver verification code");
                }
            }
            None => debug!(cpf = %cpf, "no code notifier configured"),
        }

        if let Err(e) = self.composite.invalidate(cpf).await {
            warn!(cpf = %cpf, error = %e, "failed to invalidate composite view");
        }

        Ok(PendingVerification {
            phone_number: record.phone_number,
            expires_at: record.expires_at,
        })
    }

    /// Check a submitted code and, on a match, write the phone as verified.
    pub async fn complete_phone_verification(
        &self,
        cpf: &CitizenId,
        code: &str,
    ) -> RmiResult<VerificationOutcome> {
        let now = Utc::now();
        let record = with_deadline(
            self.deadline,
            "verifications.find_active",
            self.store.find_active(cpf, now),
        )
        .await?;

        let outcome = VerificationOutcome::judge(record.as_ref(), code, now);
        let Some(record) = record.filter(|_| outcome.is_verified()) else {
            info!(cpf = %cpf, outcome = ?outcome, "phone verification rejected");
            return Ok(outcome);
        };

        self.writes.update_phone(cpf, &phone_input_of(&record)).await?;

        if let Err(e) = with_deadline(self.deadline, "verifications.delete", self.store.delete(&record)).await {
            warn!(cpf = %cpf, error = %e, "failed to delete used verification");
        }
        if let Err(e) = self.composite.invalidate(cpf).await {
            warn!(cpf = %cpf, error = %e, "failed to invalidate composite view");
        }
        info!(cpf = %cpf, "phone verified");
        Ok(outcome)
    }
}

fn phone_input_of(record: &PhoneVerification) -> PhoneInput {
    let principal = record.telefone.principal.clone().unwrap_or_default();
    PhoneInput {
        ddi: principal.ddi.unwrap_or_default(),
        ddd: principal.ddd.unwrap_or_default(),
        valor: principal.valor.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmi_core::SubFieldKind;
    use rmi_storage::{
        BatchReader, CacheKey, DataManager, DocumentVerificationStore, InMemoryDurableStore,
        InMemoryKeyValueCache, KeyValueCache, SyncQueue,
    };
    use rmi_test_utils::assertions::{assert_conflict, assert_validation_error};
    use rmi_test_utils::fixtures;
    use std::sync::Mutex;

    use crate::services::composite_service::CompositeService;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl CodeNotifier for RecordingNotifier {
        async fn send_code(&self, phone_number: &str, code: &str) -> RmiResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((phone_number.to_string(), code.to_string()));
            if self.fail {
                return Err(rmi_core::StorageError::CacheUnavailable {
                    reason: "gateway down".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    struct Fixture {
        cache: InMemoryKeyValueCache,
        store: InMemoryDurableStore,
        verifications: DocumentVerificationStore,
        composite: CompositeService,
        service: PhoneVerificationService,
    }

    fn fixture(notifier: Option<Arc<dyn CodeNotifier>>) -> Fixture {
        let cache = InMemoryKeyValueCache::new();
        let shared: Arc<dyn KeyValueCache> = Arc::new(cache.clone());
        let store = InMemoryDurableStore::new();
        let config = fixtures::fast_config();
        let data = DataManager::new(shared.clone(), Arc::new(store.clone()), config.clone());
        let composite_cache = CompositeCache::new(shared.clone(), &config);
        let writes = CacheService::new(
            shared.clone(),
            data.clone(),
            SyncQueue::new(shared.clone(), config.backend_timeout),
            composite_cache.clone(),
        );
        let verifications =
            DocumentVerificationStore::new(Arc::new(store.clone()), "phone_verifications");
        let service = PhoneVerificationService::new(
            Arc::new(verifications.clone()),
            writes,
            composite_cache.clone(),
            notifier,
            config.verification_ttl,
            config.backend_timeout,
        );
        let composite = CompositeService::new(
            data,
            BatchReader::new(shared, config.backend_timeout),
            Arc::new(store.clone()),
            composite_cache,
        );
        Fixture {
            cache,
            store,
            verifications,
            composite,
            service,
        }
    }

    async fn live_code(f: &Fixture) -> String {
        f.verifications
            .find_active(&fixtures::cpf(), Utc::now())
            .await
            .unwrap()
            .unwrap()
            .code
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_begin_does_not_expose_phone_until_verified() {
        let f = fixture(None);
        let cpf = fixtures::cpf();

        let pending = f
            .service
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        assert_eq!(pending.phone_number, "5521987654321");

        let buffered = CacheKey::write_buffer(SubFieldKind::Phone, &cpf).encode();
        assert!(!f.cache.exists(&buffered).await.unwrap());
        assert!(f.composite.read_composite(&cpf).await.is_err());
    }

    #[tokio::test]
    async fn test_complete_with_right_code_writes_verified_phone() {
        let f = fixture(None);
        let cpf = fixtures::cpf();
        f.service
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        let code = live_code(&f).await;

        let outcome = f.service.complete_phone_verification(&cpf, &code).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Verified);

        let merged = f.composite.read_composite(&cpf).await.unwrap();
        let telefone = merged.telefone.unwrap();
        assert_eq!(telefone.indicador, Some(true));
        let principal = telefone.principal.unwrap();
        assert_eq!(principal.valor.as_deref(), Some("987654321"));
        assert_eq!(principal.origem.as_deref(), Some("self-declared"));
        assert_eq!(principal.sistema.as_deref(), Some("rmi"));

        // The record is consumed.
        assert_eq!(
            f.service.complete_phone_verification(&cpf, &code).await.unwrap(),
            VerificationOutcome::ExpiredOrNotFound
        );
    }

    #[tokio::test]
    async fn test_wrong_code_keeps_record_pending() {
        let f = fixture(None);
        let cpf = fixtures::cpf();
        f.service
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        let code = live_code(&f).await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        assert_eq!(
            f.service.complete_phone_verification(&cpf, wrong).await.unwrap(),
            VerificationOutcome::CodeMismatch
        );
        assert_eq!(
            f.service.complete_phone_verification(&cpf, &code).await.unwrap(),
            VerificationOutcome::Verified
        );
    }

    #[tokio::test]
    async fn test_only_latest_attempt_is_live() {
        let f = fixture(None);
        let cpf = fixtures::cpf();
        f.service
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        let first = live_code(&f).await;

        let mut other = fixtures::phone_input();
        other.valor = "912345678".to_string();
        f.service.begin_phone_verification(&cpf, &other).await.unwrap();

        assert_eq!(f.store.count("phone_verifications"), 1);
        let live = f
            .verifications
            .find_active(&cpf, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.phone_number, "5521912345678");

        if first != live.code {
            assert_eq!(
                f.service.complete_phone_verification(&cpf, &first).await.unwrap(),
                VerificationOutcome::CodeMismatch
            );
        }
    }

    #[tokio::test]
    async fn test_expired_record_is_rejected() {
        let f = fixture(None);
        let cpf = fixtures::cpf();
        let created = Utc::now() - chrono::Duration::minutes(10);
        let record = PhoneVerification::new(
            cpf.as_str(),
            &fixtures::phone_input(),
            "123456",
            created,
            created + chrono::Duration::minutes(5),
        );
        f.verifications.insert(&record).await.unwrap();

        assert_eq!(
            f.service.complete_phone_verification(&cpf, "123456").await.unwrap(),
            VerificationOutcome::ExpiredOrNotFound
        );
    }

    #[tokio::test]
    async fn test_verified_phone_cannot_be_redeclared() {
        let f = fixture(None);
        let cpf = fixtures::cpf();
        f.service
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        let code = live_code(&f).await;
        f.service.complete_phone_verification(&cpf, &code).await.unwrap();

        let again = f
            .service
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await;
        assert_conflict(&again, SubFieldKind::Phone);
    }

    #[tokio::test]
    async fn test_invalid_phone_is_rejected_before_io() {
        let f = fixture(None);
        let mut input = fixtures::phone_input();
        input.ddd = String::new();
        let result = f.service.begin_phone_verification(&fixtures::cpf(), &input).await;
        assert_validation_error(&result);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_notifier_receives_code_and_failure_is_not_fatal() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let f = fixture(Some(notifier.clone()));
        let cpf = fixtures::cpf();

        f.service
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        let code = live_code(&f).await;

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("5521987654321".to_string(), code)]);
    }
}
