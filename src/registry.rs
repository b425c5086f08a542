//! The thread-safe map of announced services.

use crate::errors::Result;
use crate::service::{Service, ServiceState};
use crate::validation_error;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::RwLock;

/// All services this responder owns, keyed by `service_id`. Readers take
/// snapshots; nothing holds the lock across I/O.
#[derive(Default)]
pub(crate) struct Registry {
    inner: RwLock<HashMap<String, Service>>,
}

/// Why a rename did not happen.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum RenameError {
    /// The service is no longer registered.
    Missing,

    /// A different service already owns the target id.
    Occupied,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Adds a service under its `service_id`. A second service with the
    /// same id is rejected whatever state the first one is in.
    pub fn insert(&self, service: Service) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let service_id = service.service_id();

        if inner.contains_key(&service_id) {
            validation_error!("service_id", service_id, "already registered");
        }

        inner.insert(service_id, service);
        Ok(())
    }

    pub fn remove(&self, service_id: &str) -> Option<Service> {
        self.inner.write().unwrap().remove(service_id)
    }

    /// A point-in-time copy of one service.
    pub fn get(&self, service_id: &str) -> Option<Service> {
        self.inner.read().unwrap().get(service_id).cloned()
    }

    /// A point-in-time copy of every service.
    pub fn snapshot(&self) -> Vec<Service> {
        self.inner.read().unwrap().values().cloned().collect()
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn set_state(&self, service_id: &str, state: ServiceState) -> bool {
        match self.inner.write().unwrap().get_mut(service_id) {
            Some(service) => {
                service.state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_txt(&self, service_id: &str, txt: BTreeMap<String, String>) -> bool {
        match self.inner.write().unwrap().get_mut(service_id) {
            Some(service) => {
                service.txt = txt;
                true
            }
            None => false,
        }
    }

    /// Renames a service in one step, so the old name is never observable
    /// alongside the new one. Refuses a target id another service already
    /// owns rather than silently replacing it. Returns the new
    /// `service_id`.
    pub fn rename(
        &self,
        service_id: &str,
        new_instance: &str,
    ) -> std::result::Result<String, RenameError> {
        let mut inner = self.inner.write().unwrap();

        let service = match inner.get(service_id) {
            Some(s) => s,
            None => return Err(RenameError::Missing),
        };

        let mut renamed = service.clone();
        renamed.instance_name = new_instance.to_string();
        let new_id = renamed.service_id();

        if new_id != service_id && inner.contains_key(&new_id) {
            return Err(RenameError::Occupied);
        }

        inner.remove(service_id);
        inner.insert(new_id.clone(), renamed);
        Ok(new_id)
    }

    /// Every distinct service type with at least one registered instance,
    /// for the "_services._dns-sd._udp.local" enumeration.
    pub fn service_types(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut types: Vec<String> = inner.values().map(|s| s.service_type.clone()).collect();
        types.sort();
        types.dedup();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn service(instance: &str, service_type: &str) -> Service {
        Service::new(
            instance,
            service_type,
            8080,
            "myhost.local",
            Ipv4Addr::new(192, 168, 1, 100),
        )
    }

    #[test]
    fn test_insert_duplicate() {
        let registry = Registry::new();
        registry.insert(service("A", "_http._tcp.local")).unwrap();
        assert!(registry.insert(service("A", "_http._tcp.local")).is_err());
        assert!(registry.insert(service("B", "_http._tcp.local")).is_ok());
    }

    #[test]
    fn test_rename() {
        let registry = Registry::new();
        registry.insert(service("A", "_http._tcp.local")).unwrap();

        let new_id = registry.rename("A._http._tcp.local", "A-2").unwrap();
        assert_eq!(new_id, "A-2._http._tcp.local");
        assert!(registry.get("A._http._tcp.local").is_none());
        assert_eq!(registry.get(&new_id).unwrap().instance_name, "A-2");

        assert_eq!(
            registry.rename("A._http._tcp.local", "A-3"),
            Err(RenameError::Missing)
        );
    }

    #[test]
    fn test_rename_refuses_occupied_target() {
        let registry = Registry::new();
        registry.insert(service("A", "_http._tcp.local")).unwrap();
        registry.insert(service("A-2", "_http._tcp.local")).unwrap();

        // The would-be new id belongs to a different service; both
        // entries survive untouched.
        assert_eq!(
            registry.rename("A._http._tcp.local", "A-2"),
            Err(RenameError::Occupied)
        );
        assert_eq!(registry.get("A._http._tcp.local").unwrap().instance_name, "A");
        assert_eq!(
            registry.get("A-2._http._tcp.local").unwrap().instance_name,
            "A-2"
        );
    }

    #[test]
    fn test_service_types() {
        let registry = Registry::new();
        registry.insert(service("A", "_http._tcp.local")).unwrap();
        registry.insert(service("B", "_http._tcp.local")).unwrap();
        registry.insert(service("C", "_ipp._tcp.local")).unwrap();

        assert_eq!(
            registry.service_types(),
            vec!["_http._tcp.local".to_string(), "_ipp._tcp.local".to_string()]
        );
    }
}
