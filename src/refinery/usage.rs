// SPDX-License-Identifier: MIT

//! Per-run usage accounting

use crate::adk::model::TokenUsage;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters for one stage across all passes of a run
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StageUsage {
    pub llm_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub search_calls: u64,
}

impl StageUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Usage grouped by stage name, scoped to a single engine run
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageLedger {
    by_stage: BTreeMap<String, StageUsage>,
}

impl UsageLedger {
    pub fn record(&mut self, stage: &str, llm_calls: u64, tokens: TokenUsage, search_calls: u64) {
        if llm_calls == 0 && search_calls == 0 && tokens.total() == 0 {
            return;
        }
        let entry = self.by_stage.entry(stage.to_string()).or_default();
        entry.llm_calls += llm_calls;
        entry.prompt_tokens += tokens.prompt_tokens;
        entry.completion_tokens += tokens.completion_tokens;
        entry.search_calls += search_calls;
    }

    pub fn stage(&self, stage: &str) -> Option<&StageUsage> {
        self.by_stage.get(stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = (&String, &StageUsage)> {
        self.by_stage.iter()
    }

    pub fn total_tokens(&self) -> u64 {
        self.by_stage.values().map(StageUsage::total_tokens).sum()
    }

    pub fn total_llm_calls(&self) -> u64 {
        self.by_stage.values().map(|s| s.llm_calls).sum()
    }

    pub fn total_search_calls(&self) -> u64 {
        self.by_stage.values().map(|s| s.search_calls).sum()
    }
}
