//! Persistence of pending phone verifications.

use std::sync::Arc;

use async_trait::async_trait;
use rmi_core::{CitizenId, PhoneVerification, RmiError, RmiResult, Timestamp};
use serde_json::Value;

use crate::durable::{DurableStore, Filter};

/// Store of pending phone verification records.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Remove every record for the citizen, live or expired.
    async fn delete_all_for(&self, cpf: &CitizenId) -> RmiResult<u64>;

    async fn insert(&self, record: &PhoneVerification) -> RmiResult<()>;

    /// The newest record for the citizen whose `expires_at` is after `now`.
    async fn find_active(&self, cpf: &CitizenId, now: Timestamp) -> RmiResult<Option<PhoneVerification>>;

    /// Remove one record. Returns whether it existed.
    async fn delete(&self, record: &PhoneVerification) -> RmiResult<bool>;
}

/// [`VerificationStore`] kept as documents in a durable store collection.
#[derive(Clone)]
pub struct DocumentVerificationStore {
    store: Arc<dyn DurableStore>,
    collection: String,
}

impl DocumentVerificationStore {
    pub fn new(store: Arc<dyn DurableStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    fn decode(doc: Value) -> RmiResult<PhoneVerification> {
        serde_json::from_value(doc).map_err(|e| RmiError::serialization("phone_verification", e))
    }
}

#[async_trait]
impl VerificationStore for DocumentVerificationStore {
    async fn delete_all_for(&self, cpf: &CitizenId) -> RmiResult<u64> {
        self.store
            .delete_many(&self.collection, &Filter::by_cpf(cpf.as_str()))
            .await
    }

    async fn insert(&self, record: &PhoneVerification) -> RmiResult<()> {
        let doc = serde_json::to_value(record)
            .map_err(|e| RmiError::serialization("phone_verification", e))?;
        self.store.insert_one(&self.collection, doc).await
    }

    async fn find_active(&self, cpf: &CitizenId, now: Timestamp) -> RmiResult<Option<PhoneVerification>> {
        let filter = Filter::by_cpf(cpf.as_str()).and_gt("expires_at", now.to_rfc3339());
        let docs = self.store.find_many(&self.collection, &filter).await?;

        let mut newest: Option<PhoneVerification> = None;
        for doc in docs {
            let record = Self::decode(doc)?;
            if newest.as_ref().map_or(true, |n| record.created_at > n.created_at) {
                newest = Some(record);
            }
        }
        Ok(newest)
    }

    async fn delete(&self, record: &PhoneVerification) -> RmiResult<bool> {
        let filter = Filter::by_cpf(record.cpf.as_str()).and_eq("code", record.code.as_str());
        self.store.delete_one(&self.collection, &filter).await
    }
}
