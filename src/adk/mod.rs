// SPDX-License-Identifier: MIT

//! Capability layer: the external collaborators a workflow talks to
//!
//! - [model] - text generation (LLM backends, retry/timeout)
//! - [search] - web search backends
//! - [store] - artifact persistence
//! - [json] - lenient JSON recovery from model answers

pub mod error;
pub mod json;
pub mod model;
pub mod search;
pub mod store;
