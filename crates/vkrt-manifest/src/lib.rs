//! Pipeline manifests
//!
//! A manifest is a YAML document listing the programs of a pipeline together
//! with their shader files and parameter layouts, plus optional context
//! options. This crate parses and validates manifests and registers them into
//! a [`vkrt::Context`].

mod manifest;

pub use manifest::*;
