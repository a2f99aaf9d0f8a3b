// Capability resolution - cached queries against the external policy evaluator

//! # Capability Resolver
//!
//! Authorization policy lives outside this process. The resolver asks the
//! external evaluator for a subject's [`CapabilitySet`] and caches the answer
//! per `subject:tenant:partition` for a short TTL.
//!
//! There is intentionally no single-flight: two concurrent misses for the
//! same key both hit the evaluator and the last write wins. Capability sets
//! are small and the evaluator is idempotent, so duplicate calls are cheaper
//! than coordination.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::TtlCache;
use crate::models::{CapabilitySet, RequestContext};
use crate::Result;

/// External policy engine boundary.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Resolve the full capability set for the given request identity.
    async fn evaluate(&self, rctx: &RequestContext) -> Result<CapabilitySet>;
}

/// Caching front of the policy evaluator.
pub struct CapabilityResolver {
    evaluator: Arc<dyn PolicyEvaluator>,
    cache: TtlCache<CapabilitySet>,
    ttl: Duration,
}

impl CapabilityResolver {
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, ttl: Duration, capacity: usize) -> Self {
        CapabilityResolver {
            evaluator,
            cache: TtlCache::new(capacity),
            ttl,
        }
    }

    /// Resolve the caller's capabilities, consulting the cache first.
    pub async fn resolve(&self, rctx: &RequestContext) -> Result<CapabilitySet> {
        let key = rctx.capability_cache_key();
        if let Some(caps) = self.cache.get(&key) {
            return Ok(caps);
        }

        debug!(subject = %rctx.subject_id, tenant = %rctx.tenant_id, "capability cache miss");
        let caps = self.evaluator.evaluate(rctx).await?;
        self.cache.insert(key, caps.clone(), self.ttl);
        Ok(caps)
    }

    /// Drop every cached set for a subject within a tenant, across all
    /// partitions.
    pub fn invalidate(&self, subject_id: &str, tenant_id: &str) {
        self.cache
            .invalidate(&format!("{subject_id}:{tenant_id}:"), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEvaluator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PolicyEvaluator for CountingEvaluator {
        async fn evaluate(&self, rctx: &RequestContext) -> Result<CapabilitySet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CapabilitySet::from_iter([format!(
                "{}.read",
                rctx.tenant_id
            )]))
        }
    }

    #[tokio::test]
    async fn test_resolution_is_cached() {
        let evaluator = Arc::new(CountingEvaluator {
            calls: AtomicUsize::new(0),
        });
        let resolver =
            CapabilityResolver::new(Arc::clone(&evaluator) as _, Duration::from_secs(60), 100);
        let rctx = RequestContext::new("alice", "t1", "p1");

        let first = resolver.resolve(&rctx).await.unwrap();
        let second = resolver.resolve(&rctx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_identities_resolve_separately() {
        let evaluator = Arc::new(CountingEvaluator {
            calls: AtomicUsize::new(0),
        });
        let resolver =
            CapabilityResolver::new(Arc::clone(&evaluator) as _, Duration::from_secs(60), 100);

        resolver
            .resolve(&RequestContext::new("alice", "t1", "p1"))
            .await
            .unwrap();
        resolver
            .resolve(&RequestContext::new("alice", "t2", "p1"))
            .await
            .unwrap();
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_all_partitions_of_subject_tenant() {
        let evaluator = Arc::new(CountingEvaluator {
            calls: AtomicUsize::new(0),
        });
        let resolver =
            CapabilityResolver::new(Arc::clone(&evaluator) as _, Duration::from_secs(60), 100);

        resolver
            .resolve(&RequestContext::new("alice", "t1", "p1"))
            .await
            .unwrap();
        resolver
            .resolve(&RequestContext::new("alice", "t1", "p2"))
            .await
            .unwrap();
        resolver
            .resolve(&RequestContext::new("bob", "t1", "p1"))
            .await
            .unwrap();
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 3);

        resolver.invalidate("alice", "t1");

        resolver
            .resolve(&RequestContext::new("alice", "t1", "p1"))
            .await
            .unwrap();
        resolver
            .resolve(&RequestContext::new("bob", "t1", "p1"))
            .await
            .unwrap();
        // alice re-resolved, bob still cached
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 4);
    }
}
