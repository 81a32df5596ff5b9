//! DR configuration registry
//!
//! Resolves the effective configuration for a scope and hands out leases to
//! in-flight operations. A scope's configuration cannot be replaced while any
//! lease on it is held.

use crate::{map_storage_error, Error, Result};
use dashmap::DashMap;
use palisade_core::{DrConfiguration, DrScope};
use palisade_storage::MetadataStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct ConfigRegistry {
    store: Arc<dyn MetadataStore>,
    leases: Arc<DashMap<String, usize>>,
    /// Serializes writes against lease acquisition
    write_gate: Arc<Mutex<()>>,
}

impl ConfigRegistry {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            leases: Arc::new(DashMap::new()),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Validate and store a configuration
    ///
    /// # Errors
    ///
    /// - `Configuration` when the targets are invalid
    /// - `ConfigurationInUse` while an operation holds a lease on the scope
    #[instrument(skip(self, config), fields(scope = %config.scope))]
    pub async fn put(&self, config: &DrConfiguration) -> Result<()> {
        config.validate()?;

        let _gate = self.write_gate.lock().await;
        let key = config.scope.key();
        let held = self.leases.get(&key).map(|count| *count).unwrap_or(0);
        if held > 0 {
            return Err(Error::ConfigurationInUse(config.scope.clone()));
        }

        self.store
            .put_configuration(config)
            .await
            .map_err(|e| map_storage_error(e, "Failed to store DR configuration"))?;

        info!(
            rto_minutes = config.rto_minutes,
            rpo_minutes = config.rpo_minutes,
            "DR configuration updated"
        );
        Ok(())
    }

    /// Configuration in force for `scope`: its own, else the system-wide one,
    /// else platform defaults
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn effective(&self, scope: &DrScope) -> Result<DrConfiguration> {
        if let Some(config) = self.lookup(scope).await? {
            return Ok(config);
        }
        if !matches!(scope, DrScope::System) {
            if let Some(config) = self.lookup(&DrScope::System).await? {
                debug!("Tenant inherits system configuration");
                return Ok(config);
            }
        }
        Ok(DrConfiguration::platform_default(DrScope::System))
    }

    /// Resolve the effective configuration and pin it until the lease drops
    pub async fn lease(&self, scope: &DrScope) -> Result<(ConfigLease, DrConfiguration)> {
        let _gate = self.write_gate.lock().await;
        let config = self.effective(scope).await?;
        let key = config.scope.key();
        *self.leases.entry(key.clone()).or_insert(0) += 1;

        let lease = ConfigLease {
            leases: Arc::clone(&self.leases),
            key,
        };
        Ok((lease, config))
    }

    /// Leases currently held on `scope`
    pub fn active_leases(&self, scope: &DrScope) -> usize {
        self.leases.get(&scope.key()).map(|count| *count).unwrap_or(0)
    }

    async fn lookup(&self, scope: &DrScope) -> Result<Option<DrConfiguration>> {
        self.store
            .get_configuration(scope)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load DR configuration"))
    }
}

/// Pins a scope's configuration for the lifetime of an operation
#[derive(Debug)]
pub struct ConfigLease {
    leases: Arc<DashMap<String, usize>>,
    key: String,
}

impl Drop for ConfigLease {
    fn drop(&mut self) {
        if let Some(mut count) = self.leases.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        self.leases.remove_if(&self.key, |_, count| *count == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::TenantId;
    use palisade_storage::MemoryStore;

    fn registry() -> ConfigRegistry {
        ConfigRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_falls_back_to_platform_default() {
        let registry = registry();
        let config = registry
            .effective(&DrScope::Tenant(TenantId::new("acme")))
            .await
            .unwrap();
        assert_eq!(config.scope, DrScope::System);
        assert_eq!(config.rpo_minutes, 15);
    }

    #[tokio::test]
    async fn test_tenant_inherits_system_configuration() {
        let registry = registry();
        let mut system = DrConfiguration::platform_default(DrScope::System);
        system.rto_minutes = 60;
        registry.put(&system).await.unwrap();

        let tenant = DrScope::Tenant(TenantId::new("acme"));
        assert_eq!(registry.effective(&tenant).await.unwrap().rto_minutes, 60);

        let mut own = DrConfiguration::platform_default(tenant.clone());
        own.rto_minutes = 30;
        registry.put(&own).await.unwrap();
        assert_eq!(registry.effective(&tenant).await.unwrap().rto_minutes, 30);
    }

    #[tokio::test]
    async fn test_invalid_configuration_rejected() {
        let registry = registry();
        let mut config = DrConfiguration::platform_default(DrScope::System);
        config.rpo_minutes = 0;
        assert!(matches!(
            registry.put(&config).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_leased_configuration_is_immutable() {
        let registry = registry();
        let config = DrConfiguration::platform_default(DrScope::System);
        registry.put(&config).await.unwrap();

        let (lease, _) = registry.lease(&DrScope::System).await.unwrap();
        assert_eq!(registry.active_leases(&DrScope::System), 1);
        assert_eq!(
            registry.put(&config).await,
            Err(Error::ConfigurationInUse(DrScope::System))
        );

        drop(lease);
        assert_eq!(registry.active_leases(&DrScope::System), 0);
        assert!(registry.put(&config).await.is_ok());
    }
}
