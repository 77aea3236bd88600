//! vortex-observer: throttled, supervised background analysis of clinical
//! case context by a locally hosted language model.

pub mod analyzer;
pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod normalizer;
pub mod patterns;
pub mod prompts;
pub mod result;
pub mod server;
pub mod tasks;
pub mod throttle;
pub mod utils;

pub use analyzer::ClinicalAnalyzer;
pub use config::Config;
pub use context::{AnalysisContext, AnalysisMode, AnalysisRequest};
pub use error::{Result, VortexError};
pub use result::AnalysisResult;
pub use server::VortexServer;
