//! Configuration and state models.

pub mod config;
pub mod state;

pub use config::{ClassifyConfig, DeskConfig, OcrConfig, SidecarConfig, ToolsConfig};
pub use state::OcrState;
