// SPDX-License-Identifier: MIT

//! Split the question into focused sub-queries

use super::{prompts, Llm, REPORT, SUB_QUERIES, SUB_QUERIES_HISTORY};
use crate::adk::model::{GenerationOptions, TextGenerator};
use crate::refinery::stage::{Stage, StageUpdate};
use crate::refinery::state::WorkflowState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct DecomposeStage {
    llm: Llm,
    max_sub_queries: usize,
}

impl DecomposeStage {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        options: GenerationOptions,
        max_sub_queries: usize,
    ) -> Self {
        Self {
            llm: Llm::new(generator, options),
            max_sub_queries: max_sub_queries.max(1),
        }
    }

    /// Follow-ups the previous report asked for, only when refining
    fn follow_ups(state: &WorkflowState) -> Vec<String> {
        if state.iteration() == 0 {
            return Vec::new();
        }
        state
            .get_path(&format!("{}.follow_up_queries", REPORT))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract(&self, answer: &Value) -> Vec<String> {
        let list = answer
            .get(SUB_QUERIES)
            .or_else(|| answer.get("items"))
            .and_then(Value::as_array);

        list.map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .take(self.max_sub_queries)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
    }
}

#[async_trait]
impl Stage for DecomposeStage {
    fn name(&self) -> &str {
        "decompose"
    }

    async fn execute(&self, state: &WorkflowState) -> StageUpdate {
        let query = state.query();
        let follow_ups = Self::follow_ups(state);
        if !follow_ups.is_empty() {
            log::info!(
                "Refinement pass {}: targeting {} gaps",
                state.iteration(),
                follow_ups.len()
            );
        }

        let user = prompts::decompose_user(query, &follow_ups);
        let (update, sub_queries) = match self.llm.ask(prompts::DECOMPOSE_SYSTEM, &user).await {
            Ok(answer) => {
                let mut sub_queries = self.extract(&answer.value);
                if sub_queries.is_empty() {
                    sub_queries.push(query.to_string());
                }
                log::info!("Decomposed into {} sub-queries: {:?}", sub_queries.len(), sub_queries);
                let update = StageUpdate::new()
                    .record_call(answer.usage)
                    .status(format!("Decomposed into {} sub-queries", sub_queries.len()));
                (update, sub_queries)
            }
            Err(e) => {
                log::error!("Decomposition failed, using the original query: {}", e);
                let update = StageUpdate::new()
                    .record_call(None)
                    .error(format!("Decomposer: {}", e))
                    .status("Decomposition fallback");
                (update, vec![query.to_string()])
            }
        };

        update
            .set(SUB_QUERIES, json!(sub_queries))
            .append(SUB_QUERIES_HISTORY, json!(sub_queries))
    }
}
