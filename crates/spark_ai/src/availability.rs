//! Which providers can be used with the credentials currently configured.
//!
//! Eligibility is a pure function of local state; nothing is probed over the
//! network.

use crate::credentials::CredentialStore;
use crate::registry::{ProviderDescriptor, ProviderRegistry};

/// Whether `descriptor` is usable given `credentials`.
pub fn is_available(descriptor: &ProviderDescriptor, credentials: &CredentialStore) -> bool {
    !descriptor.requires_credential || credentials.has(descriptor.vendor)
}

/// Registry entries usable right now, in catalog order.
pub fn list_available(
    registry: &ProviderRegistry,
    credentials: &CredentialStore,
) -> Vec<ProviderDescriptor> {
    registry
        .all()
        .iter()
        .filter(|d| is_available(d, credentials))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BUILTIN_PROVIDERS;
    use crate::types::Vendor;

    fn ids(list: &[ProviderDescriptor]) -> Vec<&str> {
        list.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn nothing_available_without_credentials() {
        let registry = ProviderRegistry::builtin();
        let credentials = CredentialStore::new();
        assert!(list_available(&registry, &credentials).is_empty());
    }

    #[test]
    fn setting_credential_makes_vendor_appear() {
        let registry = ProviderRegistry::builtin();
        let credentials = CredentialStore::new();

        credentials.set_credentials([(Vendor::Anthropic, "sk-ant")]);
        assert_eq!(
            ids(&list_available(&registry, &credentials)),
            vec!["claude-3-opus", "claude-3-sonnet"]
        );

        credentials.set_credentials([(Vendor::Google, "g-key")]);
        assert_eq!(
            ids(&list_available(&registry, &credentials)),
            vec!["claude-3-opus", "claude-3-sonnet", "gemini-pro"]
        );
    }

    #[test]
    fn descriptors_sharing_a_vendor_move_together() {
        let registry = ProviderRegistry::builtin();
        let credentials = CredentialStore::new();

        credentials.set_credentials([(Vendor::OpenAi, "sk")]);
        assert_eq!(
            ids(&list_available(&registry, &credentials)),
            vec!["gpt-4-turbo", "gpt-3.5-turbo", "dall-e-3"]
        );

        credentials.remove(Vendor::OpenAi);
        assert!(list_available(&registry, &credentials).is_empty());
    }

    #[test]
    fn credential_free_descriptor_is_always_available() {
        let mut local = BUILTIN_PROVIDERS[0].clone();
        local.id = "local-proxy".into();
        local.requires_credential = false;
        let registry = ProviderRegistry::new(vec![local, BUILTIN_PROVIDERS[1].clone()]).unwrap();

        let credentials = CredentialStore::new();
        assert_eq!(ids(&list_available(&registry, &credentials)), vec!["local-proxy"]);
    }

    #[test]
    fn empty_credential_does_not_count() {
        let registry = ProviderRegistry::builtin();
        let credentials = CredentialStore::new();
        credentials.set_credentials([(Vendor::Google, "")]);
        assert!(list_available(&registry, &credentials).is_empty());
    }
}
