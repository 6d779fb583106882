//! End-to-end harness: a full engine over a fault-injectable cache and an
//! in-memory durable store, plus the worker that connects them.

use std::sync::Arc;
use std::time::Duration;

use rmi_core::{CitizenId, EngineConfig};
use rmi_storage::InMemoryDurableStore;
use rmi_test_utils::{fixtures, FlakyCache};

use crate::config::WorkerConfig;
use crate::jobs::{DegradedMode, SyncWorker};
use crate::state::EngineContext;

pub(crate) struct EngineHarness {
    pub cache: FlakyCache,
    pub store: InMemoryDurableStore,
    pub ctx: EngineContext,
    pub degraded: DegradedMode,
    pub worker: SyncWorker,
}

impl EngineHarness {
    pub fn new() -> Self {
        Self::with_config(fixtures::fast_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let cache = FlakyCache::new();
        let store = InMemoryDurableStore::new();
        let ctx = EngineContext::new(
            Arc::new(cache.clone()),
            Arc::new(store.clone()),
            config,
            None,
        )
        .unwrap_or_else(|e| panic!("harness config: {}", e));
        let degraded = DegradedMode::new();
        let worker = ctx.sync_worker(
            WorkerConfig {
                poll_interval: Duration::from_millis(5),
                backoff_step: Duration::from_millis(10),
                max_backoff: Duration::from_millis(20),
                ..WorkerConfig::default()
            },
            degraded.clone(),
        );
        Self {
            cache,
            store,
            ctx,
            degraded,
            worker,
        }
    }

    /// Seed the authoritative record for `cpf`.
    pub fn seed_citizen(&self, cpf: &CitizenId) {
        self.store
            .seed(&self.ctx.config.collections.citizens, fixtures::citizen_doc(cpf));
    }

    /// Run worker cycles until every queue is empty.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            let results = self.worker.run_cycle().await;
            if results.is_empty() {
                return processed;
            }
            processed += results.len();
        }
    }

    /// The live verification code for `cpf`, read straight from the store.
    pub fn live_code(&self, cpf: &CitizenId) -> Option<String> {
        let docs = self
            .store
            .documents(&self.ctx.config.collections.phone_verifications);
        docs.iter()
            .filter(|d| d["cpf"] == cpf.as_str())
            .filter_map(|d| d["code"].as_str().map(str::to_string))
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use proptest::prelude::*;
    use rmi_core::{Address, EntityKind, SubFieldInput, SubFieldKind, VerificationOutcome};
    use rmi_storage::{CacheKey, KeyValueCache};
    use rmi_test_utils::assertions::{assert_conflict, assert_not_found};
    use rmi_test_utils::{generators, CacheOp};
    use serde_json::json;

    // ------------------------------------------------------------------
    // Write-then-read consistency
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_write_is_visible_before_and_after_sync() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.seed_citizen(&cpf);

        h.ctx
            .writes
            .update_email(&cpf, &fixtures::email_input())
            .await
            .unwrap();
        let before = h.ctx.read_composite(&cpf).await.unwrap();
        let valor = |c: &rmi_core::Citizen| {
            c.email
                .as_ref()
                .and_then(|e| e.principal.as_ref())
                .and_then(|p| p.valor.clone())
        };
        assert_eq!(valor(&before).as_deref(), Some("maria.silva@example.com"));

        assert_eq!(h.drain().await, 1);
        let buffer = CacheKey::write_buffer(SubFieldKind::Email, &cpf).encode();
        assert!(!h.cache.inner().exists(&buffer).await.unwrap());

        // Served from the read cache the worker filled.
        h.ctx.composite.invalidate(&cpf).await.unwrap();
        let after = h.ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(valor(&after), valor(&before));

        // And from the durable store once every cache tier is gone.
        h.ctx
            .data
            .delete(&cpf, EntityKind::SelfDeclared(SubFieldKind::Email))
            .await
            .unwrap();
        h.ctx.composite.invalidate(&cpf).await.unwrap();
        let durable = h.ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(valor(&durable), valor(&before));
    }

    #[tokio::test]
    async fn test_latest_write_wins_across_sync() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.ctx.writes.update_ethnicity(&cpf, "parda").await.unwrap();
        h.drain().await;
        h.ctx.writes.update_ethnicity(&cpf, "preta").await.unwrap();

        let merged = h.ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(merged.raca.as_deref(), Some("preta"));

        h.drain().await;
        let docs = h.store.documents("self_declared");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["raca"], "preta");
    }

    #[tokio::test]
    async fn test_latest_write_wins_while_older_job_syncs() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.ctx.writes.update_ethnicity(&cpf, "parda").await.unwrap();
        h.ctx.writes.update_ethnicity(&cpf, "preta").await.unwrap();

        let first = h.ctx.queue.dequeue("self_declared_raca").await.unwrap().unwrap();
        assert_eq!(first.data["raca"], "parda");
        assert!(h.worker.process_job(first).await.success);

        let merged = h.ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(merged.raca.as_deref(), Some("preta"));

        h.drain().await;
        h.ctx.composite.invalidate(&cpf).await.unwrap();
        let merged = h.ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(merged.raca.as_deref(), Some("preta"));
        assert_eq!(h.store.documents("self_declared")[0]["raca"], "preta");
    }

    #[tokio::test]
    async fn test_write_survives_durable_outage() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.store.set_offline(true);

        h.ctx.writes.update_display_name(&cpf, "Maria").await.unwrap();
        h.worker.run_cycle().await;

        let key = CacheKey::write_buffer(SubFieldKind::DisplayName, &cpf).encode();
        assert!(h.cache.inner().exists(&key).await.unwrap());

        h.store.set_offline(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.drain().await;
        assert_eq!(h.store.documents("self_declared")[0]["nome_exibicao"], "Maria");
    }

    // ------------------------------------------------------------------
    // Merge precedence
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_unverified_phone_hidden_verified_phone_shown() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.seed_citizen(&cpf);

        let pending = h
            .ctx
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        assert_eq!(pending.phone_number, "5521987654321");

        let hidden = h.ctx.read_composite(&cpf).await.unwrap();
        let telefone = hidden.telefone.unwrap();
        assert_eq!(telefone.indicador, Some(false));
        assert_eq!(
            telefone.principal.unwrap().valor.as_deref(),
            Some("911111111")
        );

        let code = h.live_code(&cpf).unwrap();
        assert_eq!(
            h.ctx.complete_phone_verification(&cpf, &code).await.unwrap(),
            VerificationOutcome::Verified
        );

        let shown = h.ctx.read_composite(&cpf).await.unwrap();
        let telefone = shown.telefone.unwrap();
        assert_eq!(telefone.indicador, Some(true));
        assert_eq!(
            telefone.principal.unwrap().valor.as_deref(),
            Some("987654321")
        );
    }

    #[tokio::test]
    async fn test_self_declared_overlays_authoritative_record() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.seed_citizen(&cpf);

        h.ctx
            .writes
            .update_address(&cpf, &fixtures::address_input())
            .await
            .unwrap();
        h.ctx.writes.update_ethnicity(&cpf, "indigena").await.unwrap();

        let merged = h.ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(merged.nome.as_deref(), Some("Maria da Silva"));
        assert_eq!(merged.raca.as_deref(), Some("indigena"));
        let endereco = merged.endereco.unwrap();
        // The authoritative indicador is kept when it was present.
        assert_eq!(endereco.indicador, Some(false));
        assert_eq!(
            endereco.principal.unwrap().cep.as_deref(),
            Some(fixtures::address_input().cep.as_str())
        );
        assert_eq!(merged.nome_exibicao, None);
    }

    // ------------------------------------------------------------------
    // Staleness-gated conflicts
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_address_resubmission_conflicts_even_when_old() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        let old = Utc::now() - ChronoDuration::days(400);
        let address: Address = fixtures::address_input().to_address(old);
        h.store.seed(
            "self_declared",
            json!({"cpf": cpf.as_str(), "endereco": address, "updated_at": old}),
        );

        let again = h.ctx.writes.update_address(&cpf, &fixtures::address_input()).await;
        assert_conflict(&again, SubFieldKind::Address);
    }

    #[tokio::test]
    async fn test_phone_conflict_only_for_fresh_verified_match() {
        let h = EngineHarness::new();
        let phone = fixtures::phone_input();
        let seed = |cpf: &CitizenId, age_days: i64| {
            let at = Utc::now() - ChronoDuration::days(age_days);
            h.store.seed(
                "self_declared",
                json!({"cpf": cpf.as_str(), "telefone": phone.to_phone(true, at), "updated_at": at}),
            );
        };

        let recent = fixtures::cpf();
        seed(&recent, 10);
        let fresh = h.ctx.begin_phone_verification(&recent, &phone).await;
        assert_conflict(&fresh, SubFieldKind::Phone);

        let outdated = fixtures::other_cpf();
        seed(&outdated, 200);
        h.ctx.begin_phone_verification(&outdated, &phone).await.unwrap();
    }

    #[tokio::test]
    async fn test_email_conflict_lifts_after_threshold() {
        let config = fixtures::fast_config().with_outdated_threshold(Duration::from_secs(1));
        let h = EngineHarness::with_config(config);
        let cpf = fixtures::cpf();

        h.ctx.writes.update_email(&cpf, &fixtures::email_input()).await.unwrap();
        assert_conflict(
            &h.ctx.writes.update_email(&cpf, &fixtures::email_input()).await,
            SubFieldKind::Email,
        );

        tokio::time::sleep(Duration::from_millis(1100)).await;
        h.ctx.writes.update_email(&cpf, &fixtures::email_input()).await.unwrap();
    }

    // ------------------------------------------------------------------
    // Verification single-flight
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_concurrent_begins_leave_one_live_record() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        let phone = fixtures::phone_input();

        let (a, b) = tokio::join!(
            h.ctx.begin_phone_verification(&cpf, &phone),
            h.ctx.begin_phone_verification(&cpf, &phone),
        );
        a.unwrap();
        b.unwrap();
        h.ctx.begin_phone_verification(&cpf, &phone).await.unwrap();

        assert_eq!(h.store.count("phone_verifications"), 1);
        let code = h.live_code(&cpf).unwrap();
        assert_eq!(
            h.ctx.complete_phone_verification(&cpf, &code).await.unwrap(),
            VerificationOutcome::Verified
        );
        assert_eq!(h.store.count("phone_verifications"), 0);
    }

    #[tokio::test]
    async fn test_verified_phone_reaches_durable_store() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.ctx
            .begin_phone_verification(&cpf, &fixtures::phone_input())
            .await
            .unwrap();
        let code = h.live_code(&cpf).unwrap();
        h.ctx.complete_phone_verification(&cpf, &code).await.unwrap();
        h.drain().await;

        let doc = &h.store.documents("self_declared")[0];
        assert_eq!(doc["telefone"]["indicador"], true);
        assert_eq!(doc["telefone"]["principal"]["sistema"], "rmi");
    }

    // ------------------------------------------------------------------
    // Batched reads
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_batch_read_falls_back_when_pipeline_fails() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.ctx.writes.update_ethnicity(&cpf, "parda").await.unwrap();
        h.cache.fail(CacheOp::Mget, true);

        let key = CacheKey::write_buffer(SubFieldKind::Ethnicity, &cpf).encode();
        let found = h.ctx.batch.read_many(&[key.clone(), "missing".to_string()]).await;
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&key));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_batch_read_returns_exactly_present_keys(
            present in proptest::collection::btree_set("[a-z]{1,8}", 0..12),
            absent in proptest::collection::btree_set("[A-Z]{1,8}", 0..12),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let h = EngineHarness::new();
                for key in &present {
                    h.cache.inner().set(key, &format!("v-{key}"), Duration::from_secs(60)).await.unwrap();
                }
                let requested: Vec<String> = present.iter().chain(absent.iter()).cloned().collect();
                let found = h.ctx.batch.read_many(&requested).await;

                prop_assert_eq!(found.len(), present.len());
                for key in &present {
                    prop_assert_eq!(found.get(key), Some(&format!("v-{key}")));
                }
                Ok::<(), TestCaseError>(())
            })?;
        }

        #[test]
        fn prop_write_then_read_any_citizen(
            cpf in generators::arb_cpf(),
            raca in generators::arb_ethnicity(),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let h = EngineHarness::new();
                h.ctx.update_sub_field(&cpf, &SubFieldInput::Ethnicity(raca.clone())).await.unwrap();
                let merged = h.ctx.read_composite(&cpf).await.unwrap();
                prop_assert_eq!(merged.raca, Some(raca));
                Ok::<(), TestCaseError>(())
            })?;
        }
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    /// A citizen updates their email, the queue is drained, the caches
    /// expire, and the value is still served from the durable store.
    #[tokio::test]
    async fn test_scenario_email_update_round_trip() {
        let config = fixtures::fast_config()
            .with_write_buffer_ttl(Duration::from_millis(200))
            .with_read_cache_ttl(Duration::from_millis(200))
            .with_composite_ttl(Duration::from_millis(200));
        let h = EngineHarness::with_config(config);
        let cpf = fixtures::cpf();
        h.seed_citizen(&cpf);

        h.ctx.writes.update_email(&cpf, &fixtures::email_input()).await.unwrap();
        h.drain().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let merged = h.ctx.read_composite(&cpf).await.unwrap();
        let email = merged.email.unwrap();
        assert_eq!(email.indicador, Some(true));
        assert_eq!(
            email.principal.unwrap().valor.as_deref(),
            Some("maria.silva@example.com")
        );
    }

    /// A citizen with a cache outage still gets their composite view, and a
    /// citizen nobody knows about gets NotFound rather than an error.
    #[tokio::test]
    async fn test_scenario_cache_outage_and_unknown_citizen() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.seed_citizen(&cpf);
        h.cache.fail_all(true);

        let merged = h.ctx.read_composite(&cpf).await.unwrap();
        assert_eq!(merged.nome.as_deref(), Some("Maria da Silva"));

        h.cache.fail_all(false);
        assert_not_found(&h.ctx.read_composite(&fixtures::other_cpf()).await);
    }

    #[tokio::test]
    async fn test_degraded_worker_leaves_jobs_queued() {
        let h = EngineHarness::new();
        let cpf = fixtures::cpf();
        h.ctx.writes.update_ethnicity(&cpf, "outra").await.unwrap();

        h.degraded.activate("durable_store_down").await;
        assert_eq!(h.drain().await, 0);
        assert_eq!(h.ctx.queue.depth("self_declared_raca").await.unwrap(), 1);

        h.degraded.deactivate().await;
        assert_eq!(h.drain().await, 1);
    }
}
