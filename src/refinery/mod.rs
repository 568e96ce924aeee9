// SPDX-License-Identifier: MIT

//! Quality-gated reflection engine and the research pipeline built on it

pub mod builder;
pub mod config;
pub mod engine;
pub mod gate;
pub mod pipeline;
pub mod research;
pub mod stage;
pub mod state;
pub mod usage;
