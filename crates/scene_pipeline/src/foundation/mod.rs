//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the pipeline:
//! - Math types and operations
//! - Frame timing and frame-rate capping
//! - Logging utilities

pub mod math;
pub mod time;
pub mod logging;
