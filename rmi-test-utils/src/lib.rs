//! RMI Test Utilities
//!
//! Centralized test infrastructure for the RMI workspace:
//! - Proptest generators for citizen ids and self-declared inputs
//! - Failure-injecting backends for exercising the fallback rules
//! - Test fixtures for common scenarios
//! - Custom assertions for the RMI error taxonomy

// Re-export in-memory backends from their source crate
pub use rmi_storage::{InMemoryDurableStore, InMemoryKeyValueCache};

// Re-export core types for convenience
pub use rmi_core::{
    AddressInput, Citizen, CitizenId, EmailInput, EngineConfig, PhoneInput, RmiError, RmiResult,
    StorageError, SubFieldKind, Timestamp, ValidationError,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmi_storage::{CacheStats, KeyValueCache, MemoryUsage};

/// Build a valid CPF from its nine base digits by appending both check
/// digits.
pub fn cpf_from_base(base: [u32; 9]) -> String {
    let mut digits: Vec<u32> = base.iter().map(|d| d % 10).collect();
    for len in [9usize, 10] {
        let sum: u32 = digits
            .iter()
            .enumerate()
            .map(|(i, d)| d * (len as u32 + 1 - i as u32))
            .sum();
        let rest = (sum * 10) % 11;
        digits.push(if rest == 10 { 0 } else { rest });
    }
    digits
        .iter()
        .filter_map(|d| char::from_digit(*d, 10))
        .collect()
}

// ============================================================================
// FAILURE INJECTION
// ============================================================================

/// Cache operation a [`FlakyCache`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Get,
    Set,
    Del,
    Mget,
    Lpush,
    Rpop,
}

/// [`KeyValueCache`] wrapper whose operations can be switched to fail or
/// stall, so tests can drive every fallback rule.
#[derive(Debug, Clone, Default)]
pub struct FlakyCache {
    inner: InMemoryKeyValueCache,
    fail_get: Arc<AtomicBool>,
    fail_set: Arc<AtomicBool>,
    fail_del: Arc<AtomicBool>,
    fail_mget: Arc<AtomicBool>,
    fail_lpush: Arc<AtomicBool>,
    fail_rpop: Arc<AtomicBool>,
    delay_millis: Arc<AtomicU64>,
    set_calls: Arc<AtomicU64>,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing cache so tests can inspect it directly.
    pub fn wrapping(inner: InMemoryKeyValueCache) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryKeyValueCache {
        &self.inner
    }

    pub fn fail(&self, op: CacheOp, failing: bool) {
        let flag = match op {
            CacheOp::Get => &self.fail_get,
            CacheOp::Set => &self.fail_set,
            CacheOp::Del => &self.fail_del,
            CacheOp::Mget => &self.fail_mget,
            CacheOp::Lpush => &self.fail_lpush,
            CacheOp::Rpop => &self.fail_rpop,
        };
        flag.store(failing, Ordering::SeqCst);
    }

    /// Fail every operation.
    pub fn fail_all(&self, failing: bool) {
        for op in [
            CacheOp::Get,
            CacheOp::Set,
            CacheOp::Del,
            CacheOp::Mget,
            CacheOp::Lpush,
            CacheOp::Rpop,
        ] {
            self.fail(op, failing);
        }
    }

    /// Stall every operation for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_millis
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `set` calls attempted, failed ones included.
    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self, flag: &AtomicBool, op: &str) -> RmiResult<()> {
        let delay = self.delay_millis.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::CacheUnavailable {
                reason: format!("injected {} failure", op),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for FlakyCache {
    async fn get(&self, key: &str) -> RmiResult<Option<String>> {
        self.gate(&self.fail_get, "get").await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> RmiResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.gate(&self.fail_set, "set").await?;
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> RmiResult<bool> {
        self.gate(&self.fail_del, "del").await?;
        self.inner.del(key).await
    }

    async fn exists(&self, key: &str) -> RmiResult<bool> {
        self.gate(&self.fail_get, "exists").await?;
        self.inner.exists(key).await
    }

    async fn mget(&self, keys: &[String]) -> RmiResult<Vec<Option<String>>> {
        self.gate(&self.fail_mget, "mget").await?;
        self.inner.mget(keys).await
    }

    async fn lpush(&self, key: &str, value: &str) -> RmiResult<u64> {
        self.gate(&self.fail_lpush, "lpush").await?;
        self.inner.lpush(key, value).await
    }

    async fn rpop(&self, key: &str) -> RmiResult<Option<String>> {
        self.gate(&self.fail_rpop, "rpop").await?;
        self.inner.rpop(key).await
    }

    async fn llen(&self, key: &str) -> RmiResult<u64> {
        self.inner.llen(key).await
    }

    async fn stats(&self) -> RmiResult<CacheStats> {
        self.inner.stats().await
    }

    async fn memory_usage(&self) -> RmiResult<Option<MemoryUsage>> {
        self.inner.memory_usage().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for RMI inputs.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    /// Generate a valid citizen id.
    pub fn arb_cpf() -> impl Strategy<Value = CitizenId> {
        proptest::array::uniform9(0u32..10)
            .prop_filter("all digits equal", |base| base.iter().any(|d| *d != base[0]))
            .prop_filter_map("check digits collapse to a repdigit", |base| {
                CitizenId::parse(&cpf_from_base(base)).ok()
            })
    }

    /// Generate a Brazilian mobile number.
    pub fn arb_br_phone() -> impl Strategy<Value = PhoneInput> {
        ("[1-9][1-9]", "9[0-9]{8}").prop_map(|(ddd, valor)| PhoneInput {
            ddi: "55".to_string(),
            ddd,
            valor,
        })
    }

    /// Generate an international number without area code.
    pub fn arb_intl_phone() -> impl Strategy<Value = PhoneInput> {
        ("[1-9][0-9]?", "[0-9]{9,11}").prop_filter_map("brazil ddi", |(ddi, valor)| {
            if ddi == "55" {
                return None;
            }
            Some(PhoneInput {
                ddi,
                ddd: String::new(),
                valor,
            })
        })
    }

    pub fn arb_phone_input() -> impl Strategy<Value = PhoneInput> {
        prop_oneof![arb_br_phone(), arb_intl_phone()]
    }

    pub fn arb_email_input() -> impl Strategy<Value = EmailInput> {
        ("[a-z][a-z0-9._]{0,15}", "[a-z]{2,10}", "(com|org|gov\\.br|rio)").prop_map(
            |(local, domain, tld)| EmailInput {
                valor: format!("{}@{}.{}", local, domain, tld),
            },
        )
    }

    pub fn arb_address_input() -> impl Strategy<Value = AddressInput> {
        (
            "[A-Z][a-z]{2,20}",
            "[0-9]{5}-?[0-9]{3}",
            proptest::option::of("(Apto|Casa|Bloco) [0-9]{1,3}"),
            "[A-Z]{2}",
            "[A-Z][a-z]{2,30}",
            "[A-Z][a-z]{2,20}",
            "[0-9]{1,5}",
            proptest::option::of("(Rua|Avenida|Travessa)"),
        )
            .prop_map(
                |(bairro, cep, complemento, estado, logradouro, municipio, numero, tipo)| {
                    AddressInput {
                        bairro,
                        cep,
                        complemento,
                        estado,
                        logradouro,
                        municipio,
                        numero,
                        tipo_logradouro: tipo,
                    }
                },
            )
    }

    pub fn arb_ethnicity() -> impl Strategy<Value = String> {
        proptest::sample::select(rmi_core::VALID_ETHNICITIES).prop_map(str::to_string)
    }

    /// Generate a Timestamp within a reasonable range (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use serde_json::{json, Value};

    /// The citizen most tests act on.
    pub fn cpf() -> CitizenId {
        CitizenId::parse("12345678909").unwrap_or_else(|e| panic!("fixture cpf: {}", e))
    }

    /// A second, unrelated citizen.
    pub fn other_cpf() -> CitizenId {
        CitizenId::parse("52998224725").unwrap_or_else(|e| panic!("fixture cpf: {}", e))
    }

    pub fn address_input() -> AddressInput {
        AddressInput {
            bairro: "Centro".to_string(),
            cep: "20040-020".to_string(),
            complemento: Some("Sala 101".to_string()),
            estado: "RJ".to_string(),
            logradouro: "Rua da Assembleia".to_string(),
            municipio: "Rio de Janeiro".to_string(),
            numero: "10".to_string(),
            tipo_logradouro: Some("Rua".to_string()),
        }
    }

    pub fn email_input() -> EmailInput {
        EmailInput {
            valor: "maria.silva@example.com".to_string(),
        }
    }

    pub fn phone_input() -> PhoneInput {
        PhoneInput {
            ddi: "55".to_string(),
            ddd: "21".to_string(),
            valor: "987654321".to_string(),
        }
    }

    /// Engine config with tight deadlines so stalled backends fail fast.
    pub fn fast_config() -> EngineConfig {
        EngineConfig::default().with_backend_timeout(Duration::from_millis(200))
    }

    /// Authoritative citizen document as the ingestion pipeline stores it.
    pub fn citizen_doc(cpf: &CitizenId) -> Value {
        json!({
            "cpf": cpf.as_str(),
            "nome": "Maria da Silva",
            "endereco": {
                "indicador": false,
                "principal": {
                    "logradouro": "Avenida Presidente Vargas",
                    "numero": "1",
                    "bairro": "Centro",
                    "municipio": "Rio de Janeiro",
                    "estado": "RJ",
                    "cep": "20071-000",
                    "origem": "ingestion"
                }
            },
            "email": {
                "principal": {"valor": "maria.antigo@example.com", "origem": "ingestion"}
            },
            "telefone": {
                "indicador": false,
                "principal": {"ddi": "55", "ddd": "21", "valor": "911111111"}
            },
            "raca": "branca",
            "documentos": {"rg": "123456789"}
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for the RMI error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &RmiResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RmiResult<T>) {
        match result {
            Err(e) if e.is_not_found() => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &RmiResult<T>, field: SubFieldKind) {
        match result {
            Err(RmiError::Conflict { field: f }) => {
                assert_eq!(*f, field, "Wrong field in Conflict error")
            }
            other => panic!("Expected Conflict on {:?}, got: {:?}", field, other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &RmiResult<T>) {
        match result {
            Err(RmiError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &RmiResult<T>) {
        match result {
            Err(e) if e.is_backend() => {}
            other => panic!("Expected backend error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cpf_from_base_matches_known_value() {
        assert_eq!(cpf_from_base([1, 2, 3, 4, 5, 6, 7, 8, 9]), "12345678909");
        assert_eq!(cpf_from_base([5, 2, 9, 9, 8, 2, 2, 4, 7]), "52998224725");
    }

    #[tokio::test]
    async fn test_flaky_cache_switches() {
        let cache = FlakyCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();

        cache.fail(CacheOp::Get, true);
        assert!(cache.get("k").await.unwrap_err().is_backend());
        cache.fail(CacheOp::Get, false);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.fail_all(true);
        assert!(cache.set("k", "w", Duration::from_secs(60)).await.is_err());
        assert_eq!(cache.set_calls(), 2);
        assert_eq!(cache.inner().get("k").await.unwrap().as_deref(), Some("v"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_inputs_validate(
            phone in generators::arb_phone_input(),
            email in generators::arb_email_input(),
            address in generators::arb_address_input(),
            ethnicity in generators::arb_ethnicity(),
        ) {
            prop_assert!(rmi_core::validate_phone(&phone).is_ok(), "{:?}", phone);
            prop_assert!(rmi_core::validate_email(&email).is_ok(), "{:?}", email);
            prop_assert!(rmi_core::validate_address(&address).is_ok(), "{:?}", address);
            prop_assert!(rmi_core::validate_ethnicity(&ethnicity).is_ok());
        }

        #[test]
        fn prop_arb_cpf_is_valid(cpf in generators::arb_cpf()) {
            prop_assert!(rmi_core::is_valid_cpf(cpf.as_str()));
        }
    }
}
