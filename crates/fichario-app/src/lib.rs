//! Fichario: PDF intake, Gemini-backed ficha técnica extraction and batch
//! consolidation behind a small HTTP API.

pub mod cli;
pub mod config;
pub mod error;
pub mod pdf;
pub mod pipeline;
pub mod services;
