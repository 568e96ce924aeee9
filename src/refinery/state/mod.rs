// SPDX-License-Identifier: MIT

//! State management for refinement workflows
//!
//! This module provides:
//! - `StateSchema` - declares each field's type and merge strategy
//! - `WorkflowState` - the record threaded through stages and iterations
//! - `ReducerType` - strategies for merging values into state

mod schema;
mod store;

pub use schema::{FieldType, ReducerType, StateFieldDef, StateSchema};
pub use store::{Phase, WorkflowState};
