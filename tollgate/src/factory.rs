//! Construction and reuse of the session's authentication client

use std::{fmt, sync::Arc};

use crate::{
    client::{AuthClient, AuthClientFactory},
    error::AcquireError,
    ConfigSnapshot,
};

struct Bound {
    snapshot: Arc<ConfigSnapshot>,
    client: Arc<dyn AuthClient>,
}

/// Holds the single authentication client bound to the current configuration
///
/// Requesting a client for the configuration version already bound returns
/// the existing client. Any other configuration discards it and builds a new
/// one. Discarding does not abort operations already dispatched to the old
/// client.
pub struct SessionClientFactory {
    factory: Box<dyn AuthClientFactory>,
    bound: Option<Bound>,
}

impl SessionClientFactory {
    /// Constructs a factory that builds clients with `factory`
    pub fn new(factory: impl AuthClientFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            bound: None,
        }
    }

    /// Returns the client for `snapshot`, building one if needed
    pub fn get_or_create(
        &mut self,
        snapshot: &Arc<ConfigSnapshot>,
    ) -> Result<Arc<dyn AuthClient>, AcquireError> {
        if let Some(bound) = &self.bound {
            if bound.snapshot.same_version(snapshot) {
                return Ok(Arc::clone(&bound.client));
            }
            tracing::debug!(
                old_fingerprint = bound.snapshot.fingerprint().map(|f| f.as_str()),
                new_fingerprint = snapshot.fingerprint().map(|f| f.as_str()),
                "configuration changed, discarding authentication client"
            );
        }

        self.bound = None;
        let client = self.factory.initialize(snapshot)?;
        tracing::debug!(
            fingerprint = snapshot.fingerprint().map(|f| f.as_str()),
            "authentication client initialized"
        );
        self.bound = Some(Bound {
            snapshot: Arc::clone(snapshot),
            client: Arc::clone(&client),
        });
        Ok(client)
    }

    /// The currently bound client, if any
    pub fn current(&self) -> Option<Arc<dyn AuthClient>> {
        self.bound.as_ref().map(|b| Arc::clone(&b.client))
    }

    /// Whether the bound client was built for `snapshot`
    pub fn is_bound_to(&self, snapshot: &ConfigSnapshot) -> bool {
        self.bound
            .as_ref()
            .map_or(false, |b| b.snapshot.same_version(snapshot))
    }

    /// Discards the bound client
    pub fn invalidate(&mut self) {
        self.bound = None;
    }
}

impl fmt::Debug for SessionClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionClientFactory")
            .field(
                "bound_fingerprint",
                &self
                    .bound
                    .as_ref()
                    .map(|b| b.snapshot.fingerprint().map(ToOwned::to_owned)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::{sample_config, sample_snapshot},
        testing::ScriptedClientFactory,
    };

    #[test]
    fn same_fingerprint_reuses_client() {
        let scripted = ScriptedClientFactory::new();
        let mut factory = SessionClientFactory::new(scripted.clone());

        let v1 = Arc::new(sample_snapshot("v1"));
        let a = factory.get_or_create(&v1).unwrap();
        let b = factory
            .get_or_create(&Arc::new(sample_snapshot("v1")))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(scripted.init_count(), 1);
    }

    #[test]
    fn different_fingerprint_rebuilds_client() {
        let scripted = ScriptedClientFactory::new();
        let mut factory = SessionClientFactory::new(scripted.clone());

        let a = factory.get_or_create(&Arc::new(sample_snapshot("v1"))).unwrap();
        let v2 = Arc::new(sample_snapshot("v2"));
        let b = factory.get_or_create(&v2).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(scripted.init_count(), 2);
        assert!(factory.is_bound_to(&v2));
    }

    #[test]
    fn unfingerprinted_configs_compare_by_value() {
        let scripted = ScriptedClientFactory::new();
        let mut factory = SessionClientFactory::new(scripted.clone());

        let plain = Arc::new(ConfigSnapshot::new(sample_config(), None));
        factory.get_or_create(&plain).unwrap();
        factory
            .get_or_create(&Arc::new(ConfigSnapshot::new(sample_config(), None)))
            .unwrap();
        assert_eq!(scripted.init_count(), 1);
    }

    #[test]
    fn failed_initialization_leaves_nothing_bound() {
        let scripted = ScriptedClientFactory::new();
        let mut factory = SessionClientFactory::new(scripted.clone());
        factory.get_or_create(&Arc::new(sample_snapshot("v1"))).unwrap();

        scripted.fail_next_init();
        assert!(factory
            .get_or_create(&Arc::new(sample_snapshot("v2")))
            .is_err());
        assert!(factory.current().is_none());
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let scripted = ScriptedClientFactory::new();
        let mut factory = SessionClientFactory::new(scripted.clone());
        let v1 = Arc::new(sample_snapshot("v1"));

        factory.get_or_create(&v1).unwrap();
        factory.invalidate();
        assert!(factory.current().is_none());
        factory.get_or_create(&v1).unwrap();
        assert_eq!(scripted.init_count(), 2);
    }
}
