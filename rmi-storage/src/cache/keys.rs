//! Typed cache key builder.
//!
//! Every key the engine reads or writes is built here. `CacheKey`'s private
//! inner enum means a key can only come from one of the constructors below,
//! so a write-buffer key can never be mistaken for a read-cache key and
//! every tier carries its own TTL.

use std::fmt;
use std::time::Duration;

use rmi_core::{CitizenId, EngineConfig, EntityKind};

/// Separator between key segments.
const SEPARATOR: char = ':';

/// Cache tier a per-entity key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Most recent write, authoritative until it expires.
    WriteBuffer,
    /// Longer-lived copy of durable data.
    ReadCache,
}

impl CacheTier {
    fn segment(&self) -> &'static str {
        match self {
            CacheTier::WriteBuffer => "write",
            CacheTier::ReadCache => "cache",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "write" => Some(CacheTier::WriteBuffer),
            "cache" => Some(CacheTier::ReadCache),
            _ => None,
        }
    }

    /// TTL entries in this tier are written with.
    pub fn ttl(&self, config: &EngineConfig) -> Duration {
        match self {
            CacheTier::WriteBuffer => config.write_buffer_ttl,
            CacheTier::ReadCache => config.read_cache_ttl,
        }
    }
}

/// A cache key built from typed parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: KeyInner,
}

/// Private inner enum - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyInner {
    /// `<entity>:<tier>:<cpf>`
    Entity {
        entity: EntityKind,
        tier: CacheTier,
        cpf: CitizenId,
    },
    /// `citizen:<cpf>`
    Composite { cpf: CitizenId },
    /// `sync:queue:<type>`
    SyncQueue { job_type: String },
    /// `sync:dlq:<type>`
    DeadLetter { job_type: String },
}

impl CacheKey {
    /// `<entity>:write:<cpf>`
    pub fn write_buffer(entity: impl Into<EntityKind>, cpf: &CitizenId) -> Self {
        Self::entity(entity.into(), CacheTier::WriteBuffer, cpf)
    }

    /// `<entity>:cache:<cpf>`
    pub fn read_cache(entity: impl Into<EntityKind>, cpf: &CitizenId) -> Self {
        Self::entity(entity.into(), CacheTier::ReadCache, cpf)
    }

    pub fn entity(entity: EntityKind, tier: CacheTier, cpf: &CitizenId) -> Self {
        Self {
            inner: KeyInner::Entity {
                entity,
                tier,
                cpf: cpf.clone(),
            },
        }
    }

    /// `citizen:<cpf>`, the cached composite view.
    pub fn composite(cpf: &CitizenId) -> Self {
        Self {
            inner: KeyInner::Composite { cpf: cpf.clone() },
        }
    }

    /// `sync:queue:<type>`
    pub fn sync_queue(job_type: &str) -> Self {
        Self {
            inner: KeyInner::SyncQueue {
                job_type: job_type.to_string(),
            },
        }
    }

    /// `sync:dlq:<type>`
    pub fn dead_letter(job_type: &str) -> Self {
        Self {
            inner: KeyInner::DeadLetter {
                job_type: job_type.to_string(),
            },
        }
    }

    /// Tier of a per-entity key, `None` for composite and queue keys.
    pub fn tier(&self) -> Option<CacheTier> {
        match &self.inner {
            KeyInner::Entity { tier, .. } => Some(*tier),
            _ => None,
        }
    }

    pub fn citizen(&self) -> Option<&CitizenId> {
        match &self.inner {
            KeyInner::Entity { cpf, .. } | KeyInner::Composite { cpf } => Some(cpf),
            _ => None,
        }
    }

    /// Encode to the string stored in the cache.
    pub fn encode(&self) -> String {
        match &self.inner {
            KeyInner::Entity { entity, tier, cpf } => {
                format!("{}{SEPARATOR}{}{SEPARATOR}{}", entity.type_name(), tier.segment(), cpf)
            }
            KeyInner::Composite { cpf } => format!("citizen{SEPARATOR}{}", cpf),
            KeyInner::SyncQueue { job_type } => format!("sync{SEPARATOR}queue{SEPARATOR}{}", job_type),
            KeyInner::DeadLetter { job_type } => format!("sync{SEPARATOR}dlq{SEPARATOR}{}", job_type),
        }
    }

    /// Decode a key string.
    ///
    /// Returns `None` if the segment count is wrong, the entity or tier is
    /// unknown, or the citizen id does not validate.
    pub fn decode(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        match parts.as_slice() {
            ["citizen", cpf] => Some(Self::composite(&CitizenId::parse(cpf).ok()?)),
            ["sync", "queue", job_type] if !job_type.is_empty() => Some(Self::sync_queue(job_type)),
            ["sync", "dlq", job_type] if !job_type.is_empty() => Some(Self::dead_letter(job_type)),
            [entity, tier, cpf] => {
                let entity = EntityKind::from_type_name(entity)?;
                let tier = CacheTier::from_segment(tier)?;
                let cpf = CitizenId::parse(cpf).ok()?;
                Some(Self::entity(entity, tier, &cpf))
            }
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rmi_core::SubFieldKind;

    fn cpf() -> CitizenId {
        CitizenId::parse("12345678909").unwrap()
    }

    #[test]
    fn test_key_formats() {
        let id = cpf();
        assert_eq!(
            CacheKey::write_buffer(SubFieldKind::Email, &id).encode(),
            "self_declared_email:write:12345678909"
        );
        assert_eq!(
            CacheKey::read_cache(SubFieldKind::Ethnicity, &id).encode(),
            "self_declared_raca:cache:12345678909"
        );
        assert_eq!(
            CacheKey::read_cache(EntityKind::Citizen, &id).encode(),
            "citizen:cache:12345678909"
        );
        assert_eq!(CacheKey::composite(&id).encode(), "citizen:12345678909");
        assert_eq!(
            CacheKey::sync_queue("self_declared_phone").encode(),
            "sync:queue:self_declared_phone"
        );
        assert_eq!(
            CacheKey::dead_letter("self_declared_phone").encode(),
            "sync:dlq:self_declared_phone"
        );
    }

    #[test]
    fn test_tiers_never_collide() {
        let id = cpf();
        for kind in SubFieldKind::ALL {
            let write = CacheKey::write_buffer(kind, &id);
            let read = CacheKey::read_cache(kind, &id);
            assert_ne!(write.encode(), read.encode());
            assert_eq!(write.tier(), Some(CacheTier::WriteBuffer));
            assert_eq!(read.tier(), Some(CacheTier::ReadCache));
        }
        assert_eq!(CacheKey::composite(&id).tier(), None);
    }

    #[test]
    fn test_tier_ttls_follow_config() {
        let config = EngineConfig::default();
        assert_eq!(CacheTier::WriteBuffer.ttl(&config), config.write_buffer_ttl);
        assert_eq!(CacheTier::ReadCache.ttl(&config), config.read_cache_ttl);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CacheKey::decode("").is_none());
        assert!(CacheKey::decode("citizen:123").is_none());
        assert!(CacheKey::decode("self_declared_email:stale:12345678909").is_none());
        assert!(CacheKey::decode("pet:cache:12345678909").is_none());
        assert!(CacheKey::decode("sync:queue:").is_none());
    }

    fn entity_strategy() -> impl Strategy<Value = EntityKind> {
        prop_oneof![
            Just(EntityKind::Citizen),
            Just(EntityKind::SelfDeclared(SubFieldKind::Address)),
            Just(EntityKind::SelfDeclared(SubFieldKind::Email)),
            Just(EntityKind::SelfDeclared(SubFieldKind::Phone)),
            Just(EntityKind::SelfDeclared(SubFieldKind::Ethnicity)),
            Just(EntityKind::SelfDeclared(SubFieldKind::DisplayName)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_entity_key_decode_inverts_encode(
            entity in entity_strategy(),
            write in any::<bool>(),
        ) {
            let tier = if write { CacheTier::WriteBuffer } else { CacheTier::ReadCache };
            let key = CacheKey::entity(entity, tier, &cpf());
            prop_assert_eq!(CacheKey::decode(&key.encode()), Some(key));
        }

        #[test]
        fn prop_queue_key_decode_inverts_encode(job_type in "[a-z_]{1,30}") {
            let queue = CacheKey::sync_queue(&job_type);
            prop_assert_eq!(CacheKey::decode(&queue.encode()), Some(queue));
            let dlq = CacheKey::dead_letter(&job_type);
            prop_assert_eq!(CacheKey::decode(&dlq.encode()), Some(dlq));
        }
    }
}
