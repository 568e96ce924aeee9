// SPDX-License-Identifier: MIT

//! Builds a ready-to-run research engine from [`Settings`]

use crate::adk::error::RefineryError;
use crate::adk::model::anthropic::AnthropicModel;
use crate::adk::model::openai::OpenAIModel;
use crate::adk::model::retry::RetryingGenerator;
use crate::adk::model::TextGenerator;
use crate::adk::search::brave::BraveSearch;
use crate::adk::search::tavily::TavilySearch;
use crate::adk::search::{RetryingSearch, WebSearch};
use crate::refinery::config::Settings;
use crate::refinery::engine::{Engine, EngineConfig};
use crate::refinery::gate::ScoreGate;
use crate::refinery::research::{research_pipeline, research_schema};
use std::sync::Arc;

/// Text generator for the configured provider, wrapped in the retry policy
pub fn build_generator(settings: &Settings) -> Result<Arc<dyn TextGenerator>, RefineryError> {
    let timeout = settings.request_timeout();
    let policy = settings.retry_policy();

    let generator: Arc<dyn TextGenerator> = match settings.provider.as_str() {
        "openai" => {
            let key = Some(settings.llm_api_key.clone()).filter(|k| !k.is_empty());
            let model = OpenAIModel::new(
                settings.model.clone(),
                key,
                settings.effective_base_url(),
                timeout,
            )?
            .with_debug(settings.debug_llm);
            Arc::new(RetryingGenerator::new(model, policy))
        }
        "anthropic" => {
            let model = AnthropicModel::new(
                settings.model.clone(),
                settings.llm_api_key.clone(),
                Some(settings.effective_base_url().to_string()),
                timeout,
            )?
            .with_debug(settings.debug_llm);
            Arc::new(RetryingGenerator::new(model, policy))
        }
        other => {
            return Err(RefineryError::config(format!(
                "unknown LLM provider '{}', expected openai or anthropic",
                other
            )))
        }
    };

    log::info!(
        "Using {} model {} at {}",
        generator.provider(),
        settings.model,
        settings.effective_base_url()
    );
    Ok(generator)
}

/// Web search backend for the configured provider, wrapped in the retry policy
pub fn build_search(settings: &Settings) -> Result<Arc<dyn WebSearch>, RefineryError> {
    let timeout = settings.request_timeout();
    let policy = settings.retry_policy();
    let key = settings.search_api_key.clone();

    match settings.search_provider.as_str() {
        "tavily" => Ok(Arc::new(RetryingSearch::new(
            TavilySearch::new(key, timeout)?,
            policy,
        ))),
        "brave" => Ok(Arc::new(RetryingSearch::new(
            BraveSearch::new(key, timeout)?,
            policy,
        ))),
        other => Err(RefineryError::config(format!(
            "unknown search provider '{}', expected tavily or brave",
            other
        ))),
    }
}

/// Research engine wired with the score gate and a credential preflight
///
/// Missing keys do not fail here: the preflight reports them when a run
/// starts, so the run ends `Failed` with the problem in its error list.
pub fn build_research_engine(settings: &Settings) -> Result<Engine, RefineryError> {
    let generator = build_generator(settings)?;
    let search = build_search(settings)?;

    let preflight_settings = settings.clone();
    let engine = Engine::new(
        research_pipeline(generator, search, settings),
        ScoreGate::new(settings.quality_threshold),
    )
    .with_schema(research_schema())
    .with_config(EngineConfig {
        max_iterations: settings.max_iterations,
    })
    .with_preflight(move || preflight_settings.validate());

    log::info!(
        "Built research engine: stages [{}], threshold {}, max {} passes",
        engine.pipeline().stage_names().join(" -> "),
        settings.quality_threshold,
        settings.max_iterations
    );
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinery::state::Phase;

    #[test]
    fn test_unknown_provider_is_config_error() {
        let settings = Settings {
            provider: "gemini".to_string(),
            ..Settings::default()
        };
        assert!(matches!(
            build_generator(&settings),
            Err(RefineryError::Config(_))
        ));
    }

    #[test]
    fn test_engine_has_six_stages() {
        let engine = build_research_engine(&Settings::default()).unwrap();
        assert_eq!(
            engine.pipeline().stage_names(),
            vec!["decompose", "retrieve", "analyze", "verify", "synthesize", "report"]
        );
        assert_eq!(engine.config().max_iterations, 2);
        assert_eq!(
            engine.pipeline().stage_timeout(),
            Some(Settings::default().stage_timeout())
        );
    }

    #[tokio::test]
    async fn test_missing_keys_fail_the_run_without_calls() {
        let engine = build_research_engine(&Settings::default()).unwrap();
        let state = engine.run("AI in healthcare").await;

        assert_eq!(state.phase(), Phase::Failed);
        assert!(state.errors()[0].contains("OPENROUTER_API_KEY"));
        assert_eq!(state.usage().total_llm_calls(), 0);
    }
}
