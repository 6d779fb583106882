//! Durable document store seam.
//!
//! The durable store is the system of record: citizen documents, the
//! self-declared collection and pending phone verifications all live here.
//! Documents are JSON objects keyed by whatever field the filter names,
//! in practice `cpf`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rmi_core::{RmiResult, StorageError};
use serde_json::{Map, Value};

/// One field condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    /// Strictly greater. Timestamps are compared as instants, numbers
    /// numerically, strings lexically.
    Gt(Value),
}

/// Conjunction of top-level field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    /// Filter on one field equal to `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_eq(field, value)
    }

    /// The filter every per-citizen collection uses.
    pub fn by_cpf(cpf: impl Into<String>) -> Self {
        let cpf: String = cpf.into();
        Self::eq("cpf", cpf)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), Condition::Eq(value.into())));
        self
    }

    pub fn and_gt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), Condition::Gt(value.into())));
        self
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    /// Whether `doc` satisfies every condition.
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|(field, condition)| {
            let Some(actual) = doc.get(field) else {
                return false;
            };
            match condition {
                Condition::Eq(expected) => actual == expected,
                Condition::Gt(bound) => compare(actual, bound) == Some(Ordering::Greater),
            }
        })
    }

    /// Equality conditions as a document, used as the base of an upsert.
    fn equality_fields(&self) -> Map<String, Value> {
        self.conditions
            .iter()
            .filter_map(|(field, condition)| match condition {
                Condition::Eq(v) => Some((field.clone(), v.clone())),
                Condition::Gt(_) => None,
            })
            .collect()
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(tx), Ok(ty)) => Some(tx.cmp(&ty)),
                _ => Some(x.cmp(y)),
            }
        }
        _ => None,
    }
}

/// Keep only the projected top-level fields.
pub fn project(doc: &Value, fields: &[&str]) -> Value {
    let Value::Object(map) = doc else {
        return doc.clone();
    };
    let projected: Map<String, Value> = fields
        .iter()
        .filter_map(|f| map.get(*f).map(|v| (f.to_string(), v.clone())))
        .collect();
    Value::Object(projected)
}

/// Pluggable durable document store.
///
/// Implementations must be thread-safe. `upsert` has `$set` semantics:
/// top-level fields of `doc` overwrite the matched document's fields and
/// leave the others alone.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// First document matching `filter`, optionally projected.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[&str]>,
    ) -> RmiResult<Option<Value>>;

    async fn find_many(&self, collection: &str, filter: &Filter) -> RmiResult<Vec<Value>>;

    async fn insert_one(&self, collection: &str, doc: Value) -> RmiResult<()>;

    /// Merge `doc` into the first match, or insert the filter's equality
    /// fields plus `doc` when nothing matches.
    async fn upsert(&self, collection: &str, filter: &Filter, doc: Value) -> RmiResult<()>;

    /// Delete the first match. Returns whether a document was removed.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> RmiResult<bool>;

    /// Delete every match. Returns how many were removed.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> RmiResult<u64>;

    /// Cheap liveness check.
    async fn ping(&self) -> RmiResult<()>;
}

/// In-memory [`DurableStore`] for tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDurableStore {
    collections: Arc<RwLock<HashMap<String, Vec<Value>>>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document directly, bypassing the trait.
    pub fn seed(&self, collection: &str, doc: Value) {
        if let Ok(mut collections) = self.collections.write() {
            collections.entry(collection.to_string()).or_default().push(doc);
        }
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .map(|c| c.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Make every call fail with `StoreUnavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    fn check_online(&self) -> RmiResult<()> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::StoreUnavailable {
                reason: "store offline".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[&str]>,
    ) -> RmiResult<Option<Value>> {
        self.check_online()?;
        let collections = self.collections.read().map_err(|_| StorageError::LockPoisoned)?;
        let found = collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)));
        Ok(found.map(|doc| match projection {
            Some(fields) => project(doc, fields),
            None => doc.clone(),
        }))
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> RmiResult<Vec<Value>> {
        self.check_online()?;
        let collections = self.collections.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_one(&self, collection: &str, doc: Value) -> RmiResult<()> {
        self.check_online()?;
        if !doc.is_object() {
            return Err(StorageError::WriteFailed {
                collection: collection.to_string(),
                reason: "document must be an object".to_string(),
            }
            .into());
        }
        let mut collections = self.collections.write().map_err(|_| StorageError::LockPoisoned)?;
        collections.entry(collection.to_string()).or_default().push(doc);
        Ok(())
    }

    async fn upsert(&self, collection: &str, filter: &Filter, doc: Value) -> RmiResult<()> {
        self.check_online()?;
        let Value::Object(fields) = doc else {
            return Err(StorageError::WriteFailed {
                collection: collection.to_string(),
                reason: "document must be an object".to_string(),
            }
            .into());
        };

        let mut collections = self.collections.write().map_err(|_| StorageError::LockPoisoned)?;
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| filter.matches(d)) {
            Some(Value::Object(existing)) => {
                for (k, v) in fields {
                    existing.insert(k, v);
                }
            }
            Some(_) => {
                return Err(StorageError::WriteFailed {
                    collection: collection.to_string(),
                    reason: "stored document is not an object".to_string(),
                }
                .into())
            }
            None => {
                let mut created = filter.equality_fields();
                created.extend(fields);
                docs.push(Value::Object(created));
            }
        }
        Ok(())
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> RmiResult<bool> {
        self.check_online()?;
        let mut collections = self.collections.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(idx) => {
                docs.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> RmiResult<u64> {
        self.check_online()?;
        let mut collections = self.collections.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn ping(&self) -> RmiResult<()> {
        self.check_online()
    }
}
