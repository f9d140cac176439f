//! Metadata Cache
//!
//! TTL-bounded profile and logo cache with two layers: an in-memory map and
//! a durable [`CacheStore`] namespaced by a fixed cache version. Lookups
//! read memory only. A miss starts a load that tries the durable store
//! (subject to TTL) and then the network, so consumers never wait on disk.
//! At most one load per symbol is in flight at a time.
//!
//! The logo is resolved once when a profile is fetched and cached alongside
//! it, following a fixed preference order: provider logo, then a favicon
//! derived from the company website, then a generic fallback image.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::application::ports::{CacheStore, CompanyProfile, MarketDataApi, StoreError};
use crate::domain::streaming::Symbol;
use crate::infrastructure::metrics::{self, LookupResult};

/// Version of the persisted cache layout.
pub const CACHE_VERSION: u32 = 1;

/// Default favicon service; `{domain}` is replaced with the website host.
pub const DEFAULT_FAVICON_TEMPLATE: &str = "https://www.google.com/s2/favicons?domain={domain}&sz=64";

/// Default image used when neither a logo nor a favicon is available.
pub const DEFAULT_FALLBACK_LOGO: &str = "/assets/logo-placeholder.svg";

// =============================================================================
// Cached Entries
// =============================================================================

/// A cached profile together with its resolved logo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProfile {
    /// When the profile was fetched.
    pub fetched_at: DateTime<Utc>,
    /// Provider profile.
    pub profile: CompanyProfile,
    /// Resolved logo URL.
    pub logo: String,
}

impl CachedProfile {
    /// Whether the entry is still within `ttl` at `now`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return true;
        };
        now.signed_duration_since(self.fetched_at) < ttl
    }
}

/// Profile and logo as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    /// Provider profile.
    pub profile: CompanyProfile,
    /// Resolved logo URL.
    pub logo: String,
}

impl From<&CachedProfile> for ProfileView {
    fn from(cached: &CachedProfile) -> Self {
        Self {
            profile: cached.profile.clone(),
            logo: cached.logo.clone(),
        }
    }
}

// =============================================================================
// Logo Resolution
// =============================================================================

/// Logo preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoPolicy {
    /// Favicon service URL containing a `{domain}` placeholder.
    pub favicon_template: String,
    /// Image used when nothing better is available.
    pub fallback_url: String,
}

impl Default for LogoPolicy {
    fn default() -> Self {
        Self {
            favicon_template: DEFAULT_FAVICON_TEMPLATE.to_string(),
            fallback_url: DEFAULT_FALLBACK_LOGO.to_string(),
        }
    }
}

impl LogoPolicy {
    /// Pick the logo for a profile.
    #[must_use]
    pub fn resolve(&self, profile: &CompanyProfile) -> String {
        if let Some(logo) = non_blank(profile.logo_url.as_deref()) {
            return logo.to_string();
        }

        non_blank(profile.website_url.as_deref())
            .and_then(website_host)
            .map_or_else(
                || self.fallback_url.clone(),
                |domain| self.favicon_template.replace("{domain}", &domain),
            )
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn website_host(website: &str) -> Option<String> {
    let parsed = Url::parse(website)
        .or_else(|_| Url::parse(&format!("https://{website}")))
        .ok()?;
    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

// =============================================================================
// Cache
// =============================================================================

/// Metadata cache tunables.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Entries older than this are treated as absent.
    pub ttl: Duration,
    /// Logo preference order.
    pub logo: LogoPolicy,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            logo: LogoPolicy::default(),
        }
    }
}

/// Answer from [`MetadataCache::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Cached profile within TTL.
    Ready(ProfileView),
    /// Not cached; a fetch is in flight.
    Pending,
}

/// Outcome of [`MetadataCache::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A fresh entry was already cached; no request made.
    Fresh,
    /// Fetched from the network and cached.
    Fetched,
    /// Another fetch for the symbol was already running.
    InFlight,
    /// Network fetch failed.
    Failed,
}

impl RefreshOutcome {
    /// Whether a network request was made.
    #[must_use]
    pub const fn hit_network(self) -> bool {
        matches!(self, Self::Fetched | Self::Failed)
    }
}

/// Two-layer profile cache with in-flight deduplication.
pub struct MetadataCache {
    api: Arc<dyn MarketDataApi>,
    store: Arc<dyn CacheStore>,
    config: MetadataConfig,
    namespace: String,
    memory: RwLock<HashMap<Symbol, CachedProfile>>,
    in_flight: Arc<Mutex<HashSet<Symbol>>>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("namespace", &self.namespace)
            .field("ttl", &self.config.ttl)
            .field("cached", &self.memory.read().len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl MetadataCache {
    /// Create a cache over the given endpoint and durable store.
    #[must_use]
    pub fn new(
        api: Arc<dyn MarketDataApi>,
        store: Arc<dyn CacheStore>,
        config: MetadataConfig,
    ) -> Self {
        Self {
            api,
            store,
            config,
            namespace: format!("profile-cache-v{CACHE_VERSION}"),
            memory: RwLock::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Durable store namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Look up a fresh entry in memory. The durable store is consulted by
    /// the fetch path, never here.
    #[must_use]
    pub fn lookup(&self, symbol: &Symbol) -> Option<CachedProfile> {
        let cached = self
            .memory
            .read()
            .get(symbol)
            .filter(|cached| cached.is_fresh(self.config.ttl, Utc::now()))
            .cloned()?;
        metrics::record_profile_lookup(LookupResult::Memory);
        Some(cached)
    }

    /// Memory-only lookup that ignores TTL.
    #[must_use]
    pub fn peek(&self, symbol: &str) -> Option<CachedProfile> {
        self.memory.read().get(symbol).cloned()
    }

    /// Resolve a symbol for a consumer. On a memory miss a background load
    /// is started (unless one is already running) and `Pending` is
    /// returned. The load tries the durable store before the endpoint.
    pub fn resolve(self: &Arc<Self>, symbol: &Symbol) -> Resolution {
        if let Some(cached) = self.lookup(symbol) {
            return Resolution::Ready(ProfileView::from(&cached));
        }

        if let Some(guard) = self.try_begin(symbol) {
            let cache = Arc::clone(self);
            let symbol = symbol.clone();
            tokio::spawn(async move {
                let _ = cache.load(&symbol, guard).await;
            });
        } else {
            metrics::record_profile_lookup(LookupResult::InFlight);
        }
        Resolution::Pending
    }

    /// Make sure a fresh entry exists for `symbol`, fetching if needed.
    pub async fn refresh(&self, symbol: &Symbol) -> RefreshOutcome {
        if self.lookup(symbol).is_some() {
            return RefreshOutcome::Fresh;
        }

        let Some(guard) = self.try_begin(symbol) else {
            metrics::record_profile_lookup(LookupResult::InFlight);
            return RefreshOutcome::InFlight;
        };

        self.load(symbol, guard).await
    }

    /// Whether a fetch for `symbol` is running.
    #[must_use]
    pub fn is_in_flight(&self, symbol: &str) -> bool {
        self.in_flight.lock().contains(symbol)
    }

    /// All in-memory entries, for the consumer snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Symbol, ProfileView> {
        self.memory
            .read()
            .iter()
            .map(|(symbol, cached)| (symbol.clone(), ProfileView::from(cached)))
            .collect()
    }

    fn try_begin(&self, symbol: &Symbol) -> Option<InFlightGuard> {
        let inserted = self.in_flight.lock().insert(symbol.clone());
        inserted.then(|| InFlightGuard {
            set: Arc::clone(&self.in_flight),
            symbol: symbol.clone(),
        })
    }

    /// Durable store first, then the endpoint. Runs under the in-flight
    /// guard so concurrent misses share one load.
    async fn load(&self, symbol: &Symbol, _guard: InFlightGuard) -> RefreshOutcome {
        let durable = self
            .load_durable(symbol)
            .await
            .filter(|cached| cached.is_fresh(self.config.ttl, Utc::now()));
        if let Some(cached) = durable {
            metrics::record_profile_lookup(LookupResult::Store);
            self.memory.write().insert(symbol.clone(), cached);
            return RefreshOutcome::Fresh;
        }

        if self.fetch(symbol).await.is_some() {
            RefreshOutcome::Fetched
        } else {
            RefreshOutcome::Failed
        }
    }

    async fn fetch(&self, symbol: &Symbol) -> Option<CachedProfile> {
        match self.api.profile(symbol).await {
            Ok(profile) => {
                let logo = self.config.logo.resolve(&profile);
                let cached = CachedProfile {
                    fetched_at: Utc::now(),
                    profile,
                    logo,
                };
                self.memory.write().insert(symbol.clone(), cached.clone());
                self.persist(symbol, &cached).await;
                metrics::record_profile_lookup(LookupResult::Fetched);
                tracing::debug!(symbol = %symbol, logo = %cached.logo, "Profile cached");
                Some(cached)
            }
            Err(e) => {
                metrics::record_profile_lookup(LookupResult::Failed);
                tracing::warn!(symbol = %symbol, error = %e, "Profile fetch failed");
                None
            }
        }
    }

    async fn load_durable(&self, symbol: &Symbol) -> Option<CachedProfile> {
        let value = match self.store.get(&self.namespace, symbol.as_str()).await {
            Ok(value) => value?,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Durable cache read failed");
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::debug!(symbol = %symbol, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    async fn persist(&self, symbol: &Symbol, cached: &CachedProfile) {
        let result = match serde_json::to_value(cached) {
            Ok(value) => self.store.set(&self.namespace, symbol.as_str(), value).await,
            Err(e) => Err(StoreError::from(e)),
        };
        if let Err(e) = result {
            tracing::warn!(symbol = %symbol, error = %e, "Durable cache write failed");
        }
    }
}

/// Removes a symbol from the in-flight set when dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Symbol>>>,
    symbol: Symbol,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.symbol);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use test_case::test_case;
    use tokio::sync::Notify;

    use super::*;
    use crate::application::ports::{FetchError, QuoteSnapshot};
    use crate::infrastructure::persistence::InMemoryCacheStore;

    struct FakeApi {
        calls: AtomicUsize,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                gate: None,
            }
        }
    }

    #[async_trait]
    impl MarketDataApi for FakeApi {
        async fn quote(&self, _symbol: &Symbol) -> Result<QuoteSnapshot, FetchError> {
            Err(FetchError::Transport("unused".into()))
        }

        async fn profile(&self, symbol: &Symbol) -> Result<CompanyProfile, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(FetchError::Status {
                    status: 404,
                    body: String::new(),
                });
            }
            Ok(CompanyProfile {
                name: Some(format!("{symbol} Corp")),
                logo_url: None,
                website_url: Some("https://www.example.com".into()),
            })
        }
    }

    fn cache_with(api: Arc<FakeApi>, store: Arc<InMemoryCacheStore>) -> Arc<MetadataCache> {
        Arc::new(MetadataCache::new(api, store, MetadataConfig::default()))
    }

    #[test_case(Some("https://cdn/logo.png"), Some("https://acme.io"), "https://cdn/logo.png" ; "provider logo wins")]
    #[test_case(Some("  "), Some("https://www.Acme.io/about"), "https://www.google.com/s2/favicons?domain=acme.io&sz=64" ; "blank logo uses favicon")]
    #[test_case(None, Some("acme.io"), "https://www.google.com/s2/favicons?domain=acme.io&sz=64" ; "bare domain website")]
    #[test_case(None, None, "/assets/logo-placeholder.svg" ; "fallback")]
    fn logo_preference_order(logo: Option<&str>, website: Option<&str>, expected: &str) {
        let profile = CompanyProfile {
            name: None,
            logo_url: logo.map(String::from),
            website_url: website.map(String::from),
        };
        assert_eq!(LogoPolicy::default().resolve(&profile), expected);
    }

    #[test]
    fn freshness_respects_ttl() {
        let now = Utc::now();
        let cached = CachedProfile {
            fetched_at: now - chrono::Duration::hours(25),
            profile: CompanyProfile::default(),
            logo: String::new(),
        };
        assert!(!cached.is_fresh(Duration::from_secs(86_400), now));
        assert!(cached.is_fresh(Duration::from_secs(2 * 86_400), now));
    }

    #[tokio::test]
    async fn refresh_fetches_once_then_serves_cache() {
        let api = Arc::new(FakeApi::new());
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = cache_with(Arc::clone(&api), Arc::clone(&store));
        let symbol = Symbol::new("AAPL");

        assert_eq!(cache.refresh(&symbol).await, RefreshOutcome::Fetched);
        assert_eq!(cache.refresh(&symbol).await, RefreshOutcome::Fresh);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        let cached = cache.lookup(&symbol).unwrap();
        assert_eq!(cached.profile.name.as_deref(), Some("AAPL Corp"));
        assert!(cached.logo.contains("example.com"));

        // Persisted under the versioned namespace.
        assert!(store.get("profile-cache-v1", "AAPL").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn durable_entry_is_promoted() {
        let api = Arc::new(FakeApi::new());
        let store = Arc::new(InMemoryCacheStore::new());
        let cached = CachedProfile {
            fetched_at: Utc::now(),
            profile: CompanyProfile {
                name: Some("Stored".into()),
                ..CompanyProfile::default()
            },
            logo: "stored.png".into(),
        };
        store
            .set("profile-cache-v1", "MSFT", serde_json::to_value(&cached).unwrap())
            .await
            .unwrap();

        let cache = cache_with(Arc::clone(&api), store);
        let symbol = Symbol::new("MSFT");
        assert!(cache.peek("MSFT").is_none());
        assert_eq!(cache.refresh(&symbol).await, RefreshOutcome::Fresh);
        assert_eq!(cache.peek("MSFT").unwrap().logo, "stored.png");
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    /// Store whose reads wait until released.
    struct SlowStore {
        inner: InMemoryCacheStore,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl CacheStore for SlowStore {
        async fn get(
            &self,
            namespace: &str,
            key: &str,
        ) -> Result<Option<serde_json::Value>, StoreError> {
            self.gate.notified().await;
            self.inner.get(namespace, key).await
        }

        async fn set(
            &self,
            namespace: &str,
            key: &str,
            value: serde_json::Value,
        ) -> Result<(), StoreError> {
            self.inner.set(namespace, key, value).await
        }
    }

    #[tokio::test]
    async fn resolve_does_not_wait_on_durable_store() {
        let api = Arc::new(FakeApi::new());
        let gate = Arc::new(Notify::new());
        let store = SlowStore {
            inner: InMemoryCacheStore::new(),
            gate: Arc::clone(&gate),
        };
        let cached = CachedProfile {
            fetched_at: Utc::now(),
            profile: CompanyProfile::default(),
            logo: "disk.png".into(),
        };
        store
            .set("profile-cache-v1", "AMD", serde_json::to_value(&cached).unwrap())
            .await
            .unwrap();
        let cache = Arc::new(MetadataCache::new(
            Arc::clone(&api) as Arc<dyn MarketDataApi>,
            Arc::new(store),
            MetadataConfig::default(),
        ));
        let symbol = Symbol::new("AMD");

        // The read is parked on the gate; resolve still answers at once.
        assert_eq!(cache.resolve(&symbol), Resolution::Pending);
        tokio::task::yield_now().await;
        assert!(cache.is_in_flight("AMD"));
        assert_eq!(cache.resolve(&symbol), Resolution::Pending);

        gate.notify_one();
        for _ in 0..100 {
            if !cache.is_in_flight("AMD") {
                break;
            }
            tokio::task::yield_now().await;
        }

        let Resolution::Ready(view) = cache.resolve(&symbol) else {
            panic!("expected durable entry to be promoted");
        };
        assert_eq!(view.logo, "disk.png");
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_durable_entry_is_refetched() {
        let api = Arc::new(FakeApi::new());
        let store = Arc::new(InMemoryCacheStore::new());
        let expired = CachedProfile {
            fetched_at: Utc::now() - chrono::Duration::days(2),
            profile: CompanyProfile::default(),
            logo: "old.png".into(),
        };
        store
            .set("profile-cache-v1", "TSLA", serde_json::to_value(&expired).unwrap())
            .await
            .unwrap();

        let cache = cache_with(Arc::clone(&api), store);
        assert_eq!(
            cache.refresh(&Symbol::new("TSLA")).await,
            RefreshOutcome::Fetched
        );
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_are_deduplicated() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(FakeApi {
            gate: Some(Arc::clone(&gate)),
            ..FakeApi::new()
        });
        let cache = cache_with(Arc::clone(&api), Arc::new(InMemoryCacheStore::new()));
        let symbol = Symbol::new("NVDA");

        assert_eq!(cache.resolve(&symbol), Resolution::Pending);
        tokio::task::yield_now().await;
        assert!(cache.is_in_flight("NVDA"));

        assert_eq!(cache.resolve(&symbol), Resolution::Pending);
        assert_eq!(cache.refresh(&symbol).await, RefreshOutcome::InFlight);

        gate.notify_one();
        for _ in 0..100 {
            if !cache.is_in_flight("NVDA") {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(cache.resolve(&symbol), Resolution::Ready(_)));
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_releases_in_flight_slot() {
        let api = Arc::new(FakeApi {
            fail: true,
            ..FakeApi::new()
        });
        let cache = cache_with(Arc::clone(&api), Arc::new(InMemoryCacheStore::new()));
        let symbol = Symbol::new("BAD");

        assert_eq!(cache.refresh(&symbol).await, RefreshOutcome::Failed);
        assert!(!cache.is_in_flight("BAD"));
        assert_eq!(cache.refresh(&symbol).await, RefreshOutcome::Failed);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }
}
