use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{CachedResolver, ContextResolver, DetailCapturer, PrivacyFilter};
use crate::engine::EngineHandle;

/// Turns raw OS task identifiers into activation signals for the engine.
pub struct ActivationFeed {
    resolver: CachedResolver,
    capturer: Option<Arc<dyn DetailCapturer>>,
    privacy: PrivacyFilter,
    engine: EngineHandle,
}

impl ActivationFeed {
    pub fn new(
        resolver: Arc<dyn ContextResolver>,
        privacy: PrivacyFilter,
        engine: EngineHandle,
    ) -> Self {
        Self {
            resolver: CachedResolver::new(resolver),
            capturer: None,
            privacy,
            engine,
        }
    }

    pub fn with_capturer(mut self, capturer: Arc<dyn DetailCapturer>) -> Self {
        self.capturer = Some(capturer);
        self
    }

    /// `detail` supplied by the host wins over the capturer.
    pub async fn activate(
        &self,
        task_id: &str,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let context = self.resolver.resolve(task_id);
        let detail = detail.or_else(|| {
            self.capturer
                .as_ref()
                .and_then(|capturer| capturer.capture(task_id))
        });
        let detail = self.privacy.apply(&context.context_id, detail);

        self.engine.context_activated(context, detail, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticResolver;
    use crate::engine::{Engine, EngineConfig};
    use crate::storage::MemoryStore;
    use std::collections::HashMap;

    struct WindowTitles;

    impl DetailCapturer for WindowTitles {
        fn capture(&self, task_id: &str) -> Option<String> {
            Some(format!("{task_id} window"))
        }
    }

    #[tokio::test]
    async fn resolves_names_and_filters_private_detail() {
        let store = MemoryStore::new();
        let (engine, _task) = Engine::start(Arc::new(store), EngineConfig::default()).await;
        let resolver = StaticResolver::new(HashMap::from([(
            "com.apple.Safari".to_string(),
            "Safari".to_string(),
        )]));
        let feed = ActivationFeed::new(
            Arc::new(resolver),
            PrivacyFilter::new(["com.apple.Notes".to_string()]),
            engine.clone(),
        )
        .with_capturer(Arc::new(WindowTitles));

        feed.activate("com.apple.Safari", None, Utc::now()).await.unwrap();
        let session = engine.current_session().await.unwrap().unwrap();
        assert_eq!(session.display_name, "Safari");
        assert_eq!(session.context_detail.as_deref(), Some("com.apple.Safari window"));

        feed.activate("com.apple.Notes", Some("Diary".into()), Utc::now())
            .await
            .unwrap();
        let session = engine.current_session().await.unwrap().unwrap();
        assert_eq!(session.display_name, "com.apple.Notes");
        assert_eq!(session.context_detail, None);
    }
}
