//! Test Helper Utilities
//!
//! Shared utilities for testing tcv-engine

#![allow(dead_code)]

pub mod engine;
pub mod providers;

pub use engine::{engine, engine_with, init_test_logging, test_settings, TestEngine};
pub use providers::{Script, ScriptedProvider, ANSWER_COST};
