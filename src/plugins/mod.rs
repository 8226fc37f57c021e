// ABOUTME: Built-in plugins shipped with the noko binary
// ABOUTME: builtin_registry() registers them all; rooms enable or disable them through policy

pub mod chat;
pub mod default;
pub mod feeds;
pub mod keywords;
pub mod post_office;
pub mod seen;
pub mod transform;

use noko_core::{Config, Plugin, PluginRegistry, RegistryError};
use std::sync::Arc;

/// Every built-in plugin, configured from `config` where a plugin needs it at construction
pub fn builtin(config: &Config) -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(default::DefaultPlugin),
        Arc::new(chat::ChatPlugin),
        Arc::new(seen::SeenPlugin),
        Arc::new(post_office::PostOffice::from_config(config)),
        Arc::new(keywords::KeywordsPlugin),
        Arc::new(feeds::FeedsPlugin::from_config(config)),
    ]
}

/// The built-ins plus one transform command per `*_filter` prompt.
///
/// Transform styles go last and skip any name another plugin already serves.
pub fn builtin_registry(config: &Config) -> Result<PluginRegistry, RegistryError> {
    let mut registry = PluginRegistry::new();
    for plugin in builtin(config) {
        registry.register(plugin)?;
    }
    let transform = transform::TransformPlugin::from_config(config)
        .skipping(|name| registry.resolve(name).is_ok());
    registry.register(Arc::new(transform))?;
    Ok(registry)
}
