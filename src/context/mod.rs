//! Interfaces to the collaborators that name a task and describe what is in it.

mod feed;

pub use feed::ActivationFeed;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub context_id: String,
    pub display_name: String,
    pub icon_ref: Option<String>,
}

impl ContextInfo {
    pub fn new(context_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            display_name: display_name.into(),
            icon_ref: None,
        }
    }

    /// Uses the raw task identifier as both id and name.
    pub fn fallback(task_id: &str) -> Self {
        Self::new(task_id, task_id)
    }
}

/// Maps an opaque OS task identifier to a context.
pub trait ContextResolver: Send + Sync {
    fn resolve(&self, task_id: &str) -> Option<ContextInfo>;
}

/// Optional source of auxiliary context such as a window title or URL.
pub trait DetailCapturer: Send + Sync {
    fn capture(&self, task_id: &str) -> Option<String>;
}

/// Resolver backed by a fixed table of display names.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    display_names: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new(display_names: HashMap<String, String>) -> Self {
        Self { display_names }
    }
}

impl ContextResolver for StaticResolver {
    fn resolve(&self, task_id: &str) -> Option<ContextInfo> {
        self.display_names
            .get(task_id)
            .map(|name| ContextInfo::new(task_id, name.clone()))
    }
}

/// Caches resolutions and falls back to the raw identifier when the inner
/// resolver has nothing. Fallbacks are not cached so metadata that shows up
/// later is still picked up.
pub struct CachedResolver {
    inner: Arc<dyn ContextResolver>,
    cache: Mutex<HashMap<String, ContextInfo>>,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn ContextResolver>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, task_id: &str) -> ContextInfo {
        if let Some(hit) = self.cache().get(task_id) {
            return hit.clone();
        }

        match self.inner.resolve(task_id) {
            Some(info) => {
                self.cache().insert(task_id.to_string(), info.clone());
                info
            }
            None => {
                log::debug!("No metadata for {task_id}; using raw identifier");
                ContextInfo::fallback(task_id)
            }
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, ContextInfo>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drops detail for contexts the user marked private.
#[derive(Debug, Default, Clone)]
pub struct PrivacyFilter {
    private_contexts: HashSet<String>,
}

impl PrivacyFilter {
    pub fn new(private_contexts: impl IntoIterator<Item = String>) -> Self {
        Self {
            private_contexts: private_contexts.into_iter().collect(),
        }
    }

    pub fn apply(&self, context_id: &str, detail: Option<String>) -> Option<String> {
        if self.private_contexts.contains(context_id) {
            return None;
        }
        detail.filter(|value| !value.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl ContextResolver for Counting {
        fn resolve(&self, task_id: &str) -> Option<ContextInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (task_id == "com.apple.Safari").then(|| ContextInfo {
                context_id: task_id.into(),
                display_name: "Safari".into(),
                icon_ref: Some("icons/safari.png".into()),
            })
        }
    }

    #[test]
    fn cached_resolver_hits_inner_once_per_known_task() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let resolver = CachedResolver::new(inner.clone());

        assert_eq!(resolver.resolve("com.apple.Safari").display_name, "Safari");
        assert_eq!(resolver.resolve("com.apple.Safari").display_name, "Safari");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let unknown = resolver.resolve("pid:4411");
        assert_eq!(unknown, ContextInfo::fallback("pid:4411"));
        resolver.resolve("pid:4411");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn static_resolver_uses_configured_names() {
        let resolver = StaticResolver::new(HashMap::from([(
            "com.microsoft.VSCode".to_string(),
            "Visual Studio Code".to_string(),
        )]));
        assert_eq!(
            resolver.resolve("com.microsoft.VSCode").map(|info| info.display_name),
            Some("Visual Studio Code".to_string())
        );
        assert_eq!(resolver.resolve("com.apple.Notes"), None);
    }

    #[test]
    fn privacy_filter_strips_private_and_blank_detail() {
        let filter = PrivacyFilter::new(["com.agilebits.onepassword".to_string()]);
        assert_eq!(
            filter.apply("com.agilebits.onepassword", Some("Vault".into())),
            None
        );
        assert_eq!(filter.apply("com.apple.Safari", Some("  ".into())), None);
        assert_eq!(
            filter.apply("com.apple.Safari", Some("docs.rs".into())),
            Some("docs.rs".to_string())
        );
    }
}
