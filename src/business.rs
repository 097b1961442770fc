//! "Does this identity own an active business?"
//!
//! The answer is looked up in the [`BusinessDirectory`] with a timeout and
//! kept for a short while per identity so navigating between pages does not
//! hit the provider every time.

use crate::provider::{Business, BusinessDirectory, BusinessStatus, ProviderError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Outcome of a business check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum BusinessCheck {
    /// The directory answered
    #[serde(rename_all = "camelCase")]
    Verified {
        has_business: bool,
        status: Option<BusinessStatus>,
        business_id: Option<String>,
    },
    /// The directory did not answer in time; assume the business exists
    Assumed,
}

impl BusinessCheck {
    pub fn from_record(record: Option<&Business>) -> Self {
        BusinessCheck::Verified {
            has_business: record.is_some(),
            status: record.map(|b| b.status),
            business_id: record.map(|b| b.id.clone()),
        }
    }

    /// True when the identity may use the dashboard
    pub fn allows_dashboard(&self) -> bool {
        match self {
            BusinessCheck::Verified {
                has_business,
                status,
                ..
            } => *has_business && status.is_some_and(|s| s.is_active()),
            BusinessCheck::Assumed => true,
        }
    }

    pub fn business_id(&self) -> Option<&str> {
        match self {
            BusinessCheck::Verified { business_id, .. } => business_id.as_deref(),
            BusinessCheck::Assumed => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedCheck {
    check: BusinessCheck,
    checked_at: Instant,
}

pub struct BusinessGate {
    directory: Arc<dyn BusinessDirectory>,
    timeout: Duration,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedCheck>>,
}

impl BusinessGate {
    pub fn new(directory: Arc<dyn BusinessDirectory>, timeout: Duration, ttl: Duration) -> Self {
        BusinessGate {
            directory,
            timeout,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Arc<dyn BusinessDirectory> {
        &self.directory
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached answer for `user_id`, if one is still fresh
    pub fn cached(&self, user_id: &str) -> Option<BusinessCheck> {
        let cache = self.cache.read().ok()?;
        cache
            .get(user_id)
            .filter(|entry| entry.checked_at.elapsed() < self.ttl)
            .map(|entry| entry.check.clone())
    }

    /// Check `user_id`, using the cache when it is fresh
    ///
    /// Only answers from the directory are cached; an assumed answer is
    /// retried on the next call.
    pub async fn check(&self, user_id: &str) -> Result<BusinessCheck, ProviderError> {
        if let Some(check) = self.cached(user_id) {
            debug!("business check for {} served from cache", user_id);
            return Ok(check);
        }

        match tokio::time::timeout(self.timeout, self.directory.find_by_owner(user_id)).await {
            Ok(Ok(record)) => {
                let check = BusinessCheck::from_record(record.as_ref());
                self.store(user_id, check.clone());
                Ok(check)
            }
            Ok(Err(e)) => {
                warn!("business lookup for {} failed: {}", user_id, e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "business lookup for {} timed out after {:?}, assuming it exists",
                    user_id, self.timeout
                );
                Ok(BusinessCheck::Assumed)
            }
        }
    }

    /// Remember a directory answer, e.g. right after a business was created
    ///
    /// Expired entries of other identities are dropped on the way.
    pub fn store(&self, user_id: &str, check: BusinessCheck) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| entry.checked_at.elapsed() < self.ttl);
            cache.insert(
                user_id.to_string(),
                CachedCheck {
                    check,
                    checked_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, user_id: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(user_id);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::provider::{Business, BusinessDirectory, BusinessStatus, ProviderError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory directory with an optional artificial delay
    pub struct MemoryDirectory {
        pub delay: Duration,
        pub businesses: Mutex<HashMap<String, Business>>,
        pub lookups: AtomicUsize,
    }

    impl MemoryDirectory {
        pub fn new(delay: Duration) -> Self {
            MemoryDirectory {
                delay,
                businesses: Mutex::new(HashMap::new()),
                lookups: AtomicUsize::new(0),
            }
        }

        pub fn with_business(self, owner_id: &str, status: BusinessStatus) -> Self {
            self.businesses.lock().unwrap().insert(
                owner_id.to_string(),
                Business {
                    id: format!("biz-{}", owner_id),
                    owner_id: owner_id.to_string(),
                    name: "Corner Cafe".to_string(),
                    status,
                    created_at: Utc::now(),
                },
            );
            self
        }

        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BusinessDirectory for MemoryDirectory {
        async fn find_by_owner(&self, owner_id: &str) -> Result<Option<Business>, ProviderError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.businesses.lock().unwrap().get(owner_id).cloned())
        }

        async fn create(&self, owner_id: &str, name: &str) -> Result<Business, ProviderError> {
            let mut businesses = self.businesses.lock().unwrap();
            if businesses.contains_key(owner_id) {
                return Err(ProviderError::BusinessExists);
            }
            let business = Business {
                id: format!("biz-{}", owner_id),
                owner_id: owner_id.to_string(),
                name: name.to_string(),
                status: BusinessStatus::Active,
                created_at: Utc::now(),
            };
            businesses.insert(owner_id.to_string(), business.clone());
            Ok(business)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryDirectory;
    use super::*;

    #[tokio::test]
    async fn active_business_allows_dashboard() {
        let directory = MemoryDirectory::new(Duration::ZERO).with_business("u1", BusinessStatus::Active);
        let gate = BusinessGate::new(Arc::new(directory), Duration::from_secs(1), Duration::from_secs(120));
        let check = gate.check("u1").await.unwrap();
        assert!(check.allows_dashboard());
        assert_eq!(
            check,
            BusinessCheck::Verified {
                has_business: true,
                status: Some(BusinessStatus::Active),
                business_id: Some("biz-u1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn pending_or_missing_business_does_not() {
        let directory = MemoryDirectory::new(Duration::ZERO).with_business("u1", BusinessStatus::Pending);
        let gate = BusinessGate::new(Arc::new(directory), Duration::from_secs(1), Duration::from_secs(120));
        assert!(!gate.check("u1").await.unwrap().allows_dashboard());
        assert!(!gate.check("nobody").await.unwrap().allows_dashboard());
    }

    #[tokio::test]
    async fn answers_are_cached_per_identity() {
        let directory = Arc::new(MemoryDirectory::new(Duration::ZERO).with_business("u1", BusinessStatus::Active));
        let gate = BusinessGate::new(directory.clone(), Duration::from_secs(1), Duration::from_secs(120));

        gate.check("u1").await.unwrap();
        gate.check("u1").await.unwrap();
        assert_eq!(directory.lookups(), 1);

        gate.check("u2").await.unwrap();
        assert_eq!(directory.lookups(), 2);
    }

    #[tokio::test]
    async fn stale_answers_are_refetched() {
        let directory = Arc::new(MemoryDirectory::new(Duration::ZERO));
        let gate = BusinessGate::new(directory.clone(), Duration::from_secs(1), Duration::from_millis(20));

        gate.check("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(gate.cached("u1").is_none());
        gate.check("u1").await.unwrap();
        assert_eq!(directory.lookups(), 2);
    }

    #[tokio::test]
    async fn slow_directory_is_assumed_and_not_cached() {
        let directory = Arc::new(MemoryDirectory::new(Duration::from_millis(300)));
        let gate = BusinessGate::new(directory.clone(), Duration::from_millis(20), Duration::from_secs(120));

        let check = gate.check("u1").await.unwrap();
        assert_eq!(check, BusinessCheck::Assumed);
        assert!(check.allows_dashboard());
        assert!(gate.cached("u1").is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_store() {
        let directory = Arc::new(MemoryDirectory::new(Duration::ZERO));
        let gate = BusinessGate::new(directory.clone(), Duration::from_secs(1), Duration::from_millis(20));

        gate.check("u1").await.unwrap();
        gate.check("u2").await.unwrap();
        assert_eq!(gate.cache.read().unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        gate.check("u3").await.unwrap();
        let cache = gate.cache.read().unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("u3"));
    }

    #[test]
    fn only_verified_checks_carry_an_id() {
        let business = Business {
            id: "biz-1".to_string(),
            owner_id: "u1".to_string(),
            name: "Corner Cafe".to_string(),
            status: BusinessStatus::Active,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(BusinessCheck::from_record(Some(&business)).business_id(), Some("biz-1"));
        assert_eq!(BusinessCheck::from_record(None).business_id(), None);
        assert_eq!(BusinessCheck::Assumed.business_id(), None);
    }

    #[tokio::test]
    async fn invalidate_forces_a_lookup() {
        let directory = Arc::new(MemoryDirectory::new(Duration::ZERO));
        let gate = BusinessGate::new(directory.clone(), Duration::from_secs(1), Duration::from_secs(120));

        gate.check("u1").await.unwrap();
        gate.invalidate("u1");
        gate.check("u1").await.unwrap();
        assert_eq!(directory.lookups(), 2);
    }
}
