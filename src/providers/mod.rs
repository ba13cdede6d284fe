//! Search provider module
//!
//! Defines the Provider capability trait, a registry mapping provider ids
//! to implementations, and the built-in adapters.

mod loader;
mod registry;
mod traits;

pub mod ahmia;
pub mod duckduckgo;
pub mod wikipedia;

pub use loader::ProviderLoader;
pub use registry::ProviderRegistry;
pub use traits::*;

use crate::error::ProviderError;
use scraper::Selector;

/// Compile a CSS selector, reporting failures as parse errors
pub(crate) fn selector(css: &str) -> Result<Selector, ProviderError> {
    Selector::parse(css)
        .map_err(|e| ProviderError::Parse(format!("invalid selector {}: {:?}", css, e)))
}
