//! Test Helper Utilities
//!
//! Shared utilities for testing studyferry

#![allow(dead_code)]

pub mod fake_registry;
pub mod study_generator;

pub use fake_registry::{serve_registry, RegistryFixture, SharedFixture};
pub use study_generator::{write_study_file, StudyFileConfig, EXPLICIT_VR_LE, SC_SOP_CLASS};
