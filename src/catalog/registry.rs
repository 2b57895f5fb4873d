//! Metric catalog
//!
//! Owns metric definitions. Lookups clone an `Arc`, so readers never hold
//! the lock while using a definition.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::definition::{MetricDefinition, NewMetric};
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::types::{identify_series, Labels, SeriesKey};

#[derive(Default)]
struct CatalogState {
    by_name: HashMap<String, Arc<MetricDefinition>>,
    by_id: HashMap<Uuid, String>,
}

/// Registry of metric definitions
pub struct MetricCatalog {
    state: RwLock<CatalogState>,
    default_retention_days: u32,
    clock: SharedClock,
}

impl MetricCatalog {
    /// Create an empty catalog
    pub fn new(default_retention_days: u32, clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            default_retention_days,
            clock,
        }
    }

    /// Register a metric
    ///
    /// Fails with `InvalidDefinition` when the name is missing or malformed.
    /// A taken name is `AlreadyExists` whatever the rest of the request
    /// holds; only then are type, retention and labels validated.
    pub fn register(&self, request: NewMetric) -> Result<Arc<MetricDefinition>> {
        let name = request.validated_name()?.to_string();

        let mut state = self.state.write();
        if state.by_name.contains_key(&name) {
            return Err(Error::AlreadyExists(name));
        }
        let definition = Arc::new(
            request.into_definition(self.default_retention_days, self.clock.now_millis())?,
        );
        state
            .by_id
            .insert(definition.id, definition.name.clone());
        state
            .by_name
            .insert(definition.name.clone(), definition.clone());
        drop(state);

        info!(
            metric = %definition.name,
            metric_type = %definition.metric_type,
            retention_days = definition.retention_days,
            "Metric registered"
        );
        Ok(definition)
    }

    /// Look up a metric by name
    pub fn resolve(&self, name: &str) -> Result<Arc<MetricDefinition>> {
        self.state
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("metric '{}'", name)))
    }

    /// Look up a metric by its registration id
    pub fn resolve_by_id(&self, id: &Uuid) -> Result<Arc<MetricDefinition>> {
        let state = self.state.read();
        state
            .by_id
            .get(id)
            .and_then(|name| state.by_name.get(name))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("metric id {}", id)))
    }

    /// Look up a metric by id string or, failing that, by name
    pub fn resolve_ref(&self, id_or_name: &str) -> Result<Arc<MetricDefinition>> {
        match Uuid::parse_str(id_or_name) {
            Ok(id) => self.resolve_by_id(&id),
            Err(_) => self.resolve(id_or_name),
        }
    }

    /// Run `f` only while `id` is the live registration of `name`
    ///
    /// Deregistration waits for `f` to return. Returns `None` when the
    /// metric was removed or registered again under a new id.
    pub fn while_registered<T>(&self, name: &str, id: Uuid, f: impl FnOnce() -> T) -> Option<T> {
        let state = self.state.read();
        match state.by_name.get(name) {
            Some(def) if def.id == id => Some(f()),
            _ => None,
        }
    }

    /// Remove a metric definition
    pub fn deregister(&self, name: &str) -> Result<Arc<MetricDefinition>> {
        let mut state = self.state.write();
        let definition = state
            .by_name
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("metric '{}'", name)))?;
        state.by_id.remove(&definition.id);
        drop(state);

        debug!(metric = name, "Metric deregistered");
        Ok(definition)
    }

    /// All definitions sorted by name
    pub fn list(&self) -> Vec<Arc<MetricDefinition>> {
        let mut defs: Vec<_> = self.state.read().by_name.values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered metrics
    pub fn len(&self) -> usize {
        self.state.read().by_name.len()
    }

    /// Whether no metric is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Series identity for a metric name and label set
    pub fn identify_series(&self, metric_name: &str, labels: &Labels) -> SeriesKey {
        identify_series(metric_name, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn catalog() -> MetricCatalog {
        MetricCatalog::new(30, Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn test_register_and_resolve() {
        let catalog = catalog();
        let def = catalog
            .register(NewMetric::gauge("temperature").with_unit("celsius"))
            .unwrap();

        assert_eq!(def.created_at, 1_000);
        assert_eq!(catalog.resolve("temperature").unwrap().id, def.id);
        assert_eq!(catalog.resolve_by_id(&def.id).unwrap().name, "temperature");
        assert_eq!(
            catalog.resolve_ref(&def.id.to_string()).unwrap().name,
            "temperature"
        );
        assert_eq!(catalog.resolve_ref("temperature").unwrap().id, def.id);
    }

    #[test]
    fn test_duplicate_registration_regardless_of_payload() {
        let catalog = catalog();
        catalog.register(NewMetric::gauge("temperature")).unwrap();

        let err = catalog
            .register(NewMetric::counter("temperature").with_retention_days(3))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(name) if name == "temperature"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_with_invalid_payload() {
        let catalog = catalog();
        catalog.register(NewMetric::gauge("cpu")).unwrap();

        let bad_type = NewMetric {
            name: Some("cpu".to_string()),
            metric_type: Some("INVALID_TYPE".to_string()),
            ..NewMetric::default()
        };
        assert!(matches!(
            catalog.register(bad_type),
            Err(Error::AlreadyExists(_))
        ));

        let no_type = NewMetric {
            name: Some("cpu".to_string()),
            ..NewMetric::default()
        };
        assert!(matches!(
            catalog.register(no_type),
            Err(Error::AlreadyExists(_))
        ));

        assert!(matches!(
            catalog.register(NewMetric::gauge("cpu").with_retention_days(0)),
            Err(Error::AlreadyExists(_))
        ));

        // A fresh name still gets full validation
        assert!(matches!(
            catalog.register(NewMetric::gauge("disk").with_retention_days(0)),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(matches!(
            catalog.register(NewMetric::gauge("Bad-Name")),
            Err(Error::InvalidDefinition(_))
        ));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_resolve_unknown() {
        let catalog = catalog();
        assert!(matches!(catalog.resolve("nope"), Err(Error::NotFound(_))));
        assert!(matches!(
            catalog.resolve_by_id(&Uuid::nil()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_deregister_frees_name() {
        let catalog = catalog();
        let first = catalog.register(NewMetric::gauge("temperature")).unwrap();
        catalog.deregister("temperature").unwrap();

        assert!(catalog.resolve_by_id(&first.id).is_err());
        assert!(catalog.deregister("temperature").is_err());

        let second = catalog.register(NewMetric::gauge("temperature")).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_while_registered_tracks_registration() {
        let catalog = catalog();
        let first = catalog.register(NewMetric::gauge("temperature")).unwrap();
        assert_eq!(catalog.while_registered("temperature", first.id, || 7), Some(7));

        catalog.deregister("temperature").unwrap();
        assert_eq!(catalog.while_registered("temperature", first.id, || 7), None);

        let second = catalog.register(NewMetric::counter("temperature")).unwrap();
        assert_eq!(catalog.while_registered("temperature", first.id, || 7), None);
        assert_eq!(catalog.while_registered("temperature", second.id, || 7), Some(7));
    }

    #[test]
    fn test_list_sorted() {
        let catalog = catalog();
        catalog.register(NewMetric::gauge("zeta")).unwrap();
        catalog.register(NewMetric::gauge("alpha")).unwrap();
        let names: Vec<_> = catalog.list().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
