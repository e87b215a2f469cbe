//! Shared module registry helper
//!
//! Every command that resolves module names builds its registry here.

use mtriage_core::{composite, Registry};

/// Register every built-in selector and analyser into `registry`
///
/// - Local (selector)
/// - ExtractTypes
/// - Rank, Flatten
/// - Meta (composite over any of the above)
pub fn register_all_modules(registry: &mut Registry) {
    mtriage_local::plugin::register(registry);
    mtriage_extract_types::plugin::register(registry);
    mtriage_ranking::plugin::register(registry);
    composite::register(registry);
}

pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    register_all_modules(&mut registry);
    registry
}
