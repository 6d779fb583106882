//! Tri-state tier reads and the ordered fallback chain.
//!
//! Both the single-entity read path and the composite merger walk the same
//! ordered list of sources: the write buffer, the read cache, then the
//! durable store. Each source answers with a [`TierRead`]; [`resolve_tiers`]
//! owns the fallback rules so no caller re-implements them.

use std::fmt;
use std::future::Future;

use rmi_core::{RmiError, RmiResult};
use tracing::{debug, warn};

/// A source a value can be read from, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierSource {
    WriteBuffer,
    ReadCache,
    DurableStore,
}

impl TierSource {
    /// The full chain: freshest first, durable last.
    pub const CHAIN: [TierSource; 3] = [
        TierSource::WriteBuffer,
        TierSource::ReadCache,
        TierSource::DurableStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierSource::WriteBuffer => "write_buffer",
            TierSource::ReadCache => "read_cache",
            TierSource::DurableStore => "durable_store",
        }
    }

    pub fn is_cache(&self) -> bool {
        !matches!(self, TierSource::DurableStore)
    }
}

impl fmt::Display for TierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of reading one tier.
///
/// A miss and a failure are different: a miss means the tier is healthy and
/// has nothing, a failure means the tier could not answer. The chain treats
/// both as "try the next tier", but only a failure on the last tier turns
/// into an error.
#[derive(Debug)]
pub enum TierRead<T> {
    Hit(T),
    Miss,
    Error(RmiError),
}

impl<T> TierRead<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, TierRead::Hit(_))
    }

    pub fn map<U, F>(self, f: F) -> TierRead<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            TierRead::Hit(v) => TierRead::Hit(f(v)),
            TierRead::Miss => TierRead::Miss,
            TierRead::Error(e) => TierRead::Error(e),
        }
    }

    /// Decode a hit, turning a decode failure into a tier failure.
    pub fn and_then<U, F>(self, f: F) -> TierRead<U>
    where
        F: FnOnce(T) -> RmiResult<U>,
    {
        match self {
            TierRead::Hit(v) => match f(v) {
                Ok(decoded) => TierRead::Hit(decoded),
                Err(e) => TierRead::Error(e),
            },
            TierRead::Miss => TierRead::Miss,
            TierRead::Error(e) => TierRead::Error(e),
        }
    }
}

impl<T> From<RmiResult<Option<T>>> for TierRead<T> {
    fn from(result: RmiResult<Option<T>>) -> Self {
        match result {
            Ok(Some(v)) => TierRead::Hit(v),
            Ok(None) => TierRead::Miss,
            Err(e) => TierRead::Error(e),
        }
    }
}

/// A value together with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: TierSource,
}

impl<T> Resolved<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    /// True when the value did not come from the cache, so the cache should
    /// be repopulated with it.
    pub fn needs_repopulate(&self) -> bool {
        !self.source.is_cache()
    }
}

/// Walk `tiers` in order and return the first hit.
///
/// - `Hit` stops the walk.
/// - `Miss` moves on.
/// - `Error` is logged and moves on, except on the last tier where it is
///   returned.
///
/// Returns `Ok(None)` when every tier missed (or every tier but the last
/// failed and the last missed).
pub async fn resolve_tiers<T, F, Fut>(
    key: &str,
    tiers: &[TierSource],
    mut read: F,
) -> RmiResult<Option<Resolved<T>>>
where
    F: FnMut(TierSource) -> Fut,
    Fut: Future<Output = TierRead<T>>,
{
    let last = tiers.len().saturating_sub(1);
    for (idx, source) in tiers.iter().copied().enumerate() {
        match read(source).await {
            TierRead::Hit(value) => {
                debug!(key = %key, tier = %source, "tier hit");
                return Ok(Some(Resolved { value, source }));
            }
            TierRead::Miss => {
                debug!(key = %key, tier = %source, "tier miss");
            }
            TierRead::Error(e) if idx == last => {
                return Err(e);
            }
            TierRead::Error(e) => {
                warn!(key = %key, tier = %source, error = %e, "tier read failed, falling back");
            }
        }
    }
    Ok(None)
}
