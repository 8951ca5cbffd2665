//! Tiered model router. Picks a model id per tier, enforces per-call
//! timeouts (30 s for the small tiers, 120 s for the large ones), and falls
//! back to the local/cheaper provider when the primary raises a transient
//! error. Fallback responses are tagged `local/<model>` so the drift
//! detector can spot channels coasting on the fallback tier.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

const SMALL_TIMEOUT: Duration = Duration::from_secs(30);
const LARGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Main reasoning loop.
    Default,
    /// Task decomposition and subtask execution.
    Subagent,
    /// Cheap tier: assessment, critic, hints.
    Chat,
    /// Cheap tier: intent classification.
    Intent,
}

impl ModelTier {
    fn is_small(&self) -> bool {
        matches!(self, ModelTier::Chat | ModelTier::Intent)
    }
}

#[derive(Debug, Clone)]
pub struct TierModels {
    pub default: String,
    pub subagent: String,
    pub chat: String,
    pub intent: String,
}

impl TierModels {
    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Default => &self.default,
            ModelTier::Subagent => &self.subagent,
            ModelTier::Chat => &self.chat,
            ModelTier::Intent => &self.intent,
        }
    }
}

pub struct ModelRouter {
    models: TierModels,
    primary: Arc<dyn LlmProvider>,
    /// Optional fallback provider plus the model it serves.
    fallback: Option<(Arc<dyn LlmProvider>, String)>,
}

impl ModelRouter {
    pub fn new(
        models: TierModels,
        primary: Arc<dyn LlmProvider>,
        fallback: Option<(Arc<dyn LlmProvider>, String)>,
    ) -> Self {
        Self {
            models,
            primary,
            fallback,
        }
    }

    pub fn model_for(&self, tier: ModelTier) -> String {
        self.models.model_for(tier).to_string()
    }

    /// True for model ids produced by the fallback slot.
    pub fn is_fallback_model(model_id: &str) -> bool {
        model_id.starts_with("local/")
    }

    /// Send a request on the given tier. The request's `model` field is
    /// overwritten with the tier's model.
    pub async fn send(
        &self,
        tier: ModelTier,
        mut req: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        req.model = self.models.model_for(tier).to_string();
        let timeout = if tier.is_small() {
            SMALL_TIMEOUT
        } else {
            LARGE_TIMEOUT
        };

        let primary_err = match tokio::time::timeout(timeout, self.primary.send(&req)).await {
            Ok(Ok(resp)) => return Ok(resp),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout,
        };

        if !primary_err.is_transient() {
            return Err(primary_err);
        }

        let Some((fallback, fallback_model)) = &self.fallback else {
            return Err(primary_err);
        };

        warn!(
            provider = self.primary.name(),
            error = %primary_err,
            "primary provider failed transiently, trying fallback"
        );

        req.model = fallback_model.clone();
        match tokio::time::timeout(timeout, fallback.send(&req)).await {
            Ok(Ok(mut resp)) => {
                info!(model = %fallback_model, "fallback provider served the request");
                resp.model = format!("local/{fallback_model}");
                Ok(resp)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    /// One-shot text completion on a tier.
    pub async fn complete(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let req = ChatRequest::simple(system, user, max_tokens);
        Ok(self.send(tier, req).await?.content)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;

    fn models() -> TierModels {
        TierModels {
            default: "big-model".into(),
            subagent: "mid-model".into(),
            chat: "small-model".into(),
            intent: "small-model".into(),
        }
    }

    #[tokio::test]
    async fn tier_selects_model() {
        let primary = Arc::new(ScriptedProvider::new("p", vec![]));
        let router = ModelRouter::new(models(), primary.clone(), None);

        router
            .send(ModelTier::Intent, ChatRequest::simple("s", "u", 10))
            .await
            .unwrap();
        assert_eq!(primary.calls.lock().unwrap()[0].model, "small-model");

        router
            .send(ModelTier::Default, ChatRequest::simple("s", "u", 10))
            .await
            .unwrap();
        assert_eq!(primary.calls.lock().unwrap()[1].model, "big-model");
    }

    #[tokio::test]
    async fn transient_failure_falls_back_and_tags_model() {
        let primary = Arc::new(ScriptedProvider::new(
            "p",
            vec![Err(ProviderError::Unavailable("down".into()))],
        ));
        let fallback = Arc::new(ScriptedProvider::new("f", vec![]));
        let router = ModelRouter::new(
            models(),
            primary,
            Some((fallback.clone(), "llama3".to_string())),
        );

        let resp = router
            .send(ModelTier::Chat, ChatRequest::simple("s", "u", 10))
            .await
            .unwrap();
        assert_eq!(resp.model, "local/llama3");
        assert!(ModelRouter::is_fallback_model(&resp.model));
        assert_eq!(fallback.calls.lock().unwrap()[0].model, "llama3");
    }

    #[tokio::test]
    async fn permanent_failure_does_not_fall_back() {
        let primary = Arc::new(ScriptedProvider::new(
            "p",
            vec![Err(ProviderError::Api {
                status: 401,
                message: "bad key".into(),
            })],
        ));
        let fallback = Arc::new(ScriptedProvider::new("f", vec![]));
        let router = ModelRouter::new(models(), primary, Some((fallback.clone(), "m".into())));

        let err = router
            .send(ModelTier::Chat, ChatRequest::simple("s", "u", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 401, .. }));
        assert!(fallback.calls.lock().unwrap().is_empty());
    }
}
