//! Wiring from on-disk configuration to a ready [`Gateway`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use spark_ai::{
    CredentialStore, DispatchConfig, Gateway, GenerationOverride, GenerationSettings,
    ProviderRegistry, Vendor,
};
use spark_core::GatewayConfig;

pub fn dispatch_config(config: &GatewayConfig) -> DispatchConfig {
    let overrides = config
        .provider_overrides
        .iter()
        .filter(|(_, o)| o.max_tokens.is_some() || o.temperature.is_some())
        .map(|(id, o)| {
            (
                id.clone(),
                GenerationOverride {
                    max_tokens: o.max_tokens,
                    temperature: o.temperature,
                },
            )
        })
        .collect();

    DispatchConfig {
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        generation: GenerationSettings {
            max_tokens: config.default_max_tokens,
            temperature: config.default_temperature,
            overrides,
        },
        image_quality: config.image_quality.clone(),
    }
}

/// Built-in catalog with configured endpoint overrides applied.
pub fn registry(config: &GatewayConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::builtin();
    for (id, o) in &config.provider_overrides {
        let Some(endpoint) = &o.endpoint else {
            continue;
        };
        registry = registry
            .with_endpoint(id, endpoint.clone())
            .with_context(|| format!("Invalid endpoint override for {id}"))?;
        info!("Endpoint for {id} overridden to {endpoint}");
    }
    Ok(registry)
}

/// Credential store from a vendor slug → key map. Unknown slugs are skipped.
pub fn credentials(keys: &BTreeMap<String, String>) -> CredentialStore {
    let store = CredentialStore::new();
    let parsed = keys.iter().filter_map(|(slug, key)| match slug.parse::<Vendor>() {
        Ok(vendor) => Some((vendor, key.clone())),
        Err(e) => {
            warn!("Ignoring stored key: {e}");
            None
        }
    });
    store.set_credentials(parsed);
    store
}

pub fn gateway(config: &GatewayConfig, keys: &BTreeMap<String, String>) -> Result<Gateway> {
    Ok(Gateway::new(
        registry(config)?,
        Arc::new(credentials(keys)),
        dispatch_config(config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_core::ProviderOverride;

    #[test]
    fn dispatch_config_carries_defaults_and_overrides() {
        let mut config = GatewayConfig::default();
        config.request_timeout_secs = 10;
        config.default_max_tokens = 1000;
        config.provider_overrides.insert(
            "claude-3-opus".into(),
            ProviderOverride {
                temperature: Some(0.4),
                ..Default::default()
            },
        );
        config.provider_overrides.insert(
            "gpt-4-turbo".into(),
            ProviderOverride {
                endpoint: Some("http://localhost:9/v1/chat/completions".into()),
                ..Default::default()
            },
        );

        let dispatch = dispatch_config(&config);
        assert_eq!(dispatch.request_timeout, Duration::from_secs(10));
        assert_eq!(dispatch.generation.max_tokens, 1000);
        assert_eq!(
            dispatch.generation.overrides["claude-3-opus"].temperature,
            Some(0.4)
        );
        // Endpoint-only overrides do not touch generation settings.
        assert!(!dispatch.generation.overrides.contains_key("gpt-4-turbo"));
        assert_eq!(dispatch.image_quality, "standard");
    }

    #[test]
    fn registry_applies_endpoint_overrides() {
        let mut config = GatewayConfig::default();
        config.provider_overrides.insert(
            "gemini-pro".into(),
            ProviderOverride {
                endpoint: Some("http://proxy.local/models/gemini-pro:generateContent".into()),
                ..Default::default()
            },
        );
        let registry = registry(&config).unwrap();
        assert_eq!(
            registry.get("gemini-pro").unwrap().endpoint,
            "http://proxy.local/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn registry_rejects_override_for_unknown_provider() {
        let mut config = GatewayConfig::default();
        config.provider_overrides.insert(
            "llama-70b".into(),
            ProviderOverride {
                endpoint: Some("http://x".into()),
                ..Default::default()
            },
        );
        assert!(registry(&config).is_err());
    }

    #[test]
    fn credentials_skip_unknown_vendors() {
        let mut keys = BTreeMap::new();
        keys.insert("anthropic".to_string(), "sk-ant".to_string());
        keys.insert("mistral".to_string(), "m-key".to_string());
        let store = credentials(&keys);
        assert_eq!(store.configured_vendors(), vec![Vendor::Anthropic]);
    }

    #[test]
    fn gateway_lists_providers_for_loaded_keys() {
        let mut keys = BTreeMap::new();
        keys.insert("google".to_string(), "g".to_string());
        let gateway = gateway(&GatewayConfig::default(), &keys).unwrap();
        let ids: Vec<String> = gateway.list_available().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["gemini-pro"]);
    }
}
