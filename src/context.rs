//! Per-run context.
//!
//! A [`Context`] is one reconciliation run: it owns the identity cache, the
//! engine configuration and the run id stamped on every report. Nothing is
//! process-wide; dropping the context discards every instance it resolved.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::converge::{ConvergenceExecutor, ConvergencePlan, ConvergenceReport, RunReport};
use crate::error::{AttributeError, Result};
use crate::instance::{IdentityCache, IdentityKey, ResourceInstance};
use crate::schema::{ResourceType, Value};

/// One reconciliation run.
#[derive(Debug)]
pub struct Context {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    config: EngineConfig,
    cache: RefCell<IdentityCache>,
    executor: ConvergenceExecutor,
}

impl Context {
    /// Starts a run.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let run_id = Uuid::new_v4();
        debug!("Starting run {run_id}");
        Self {
            run_id,
            started_at: Utc::now(),
            config,
            cache: RefCell::new(IdentityCache::new()),
            executor: ConvergenceExecutor::new(run_id),
        }
    }

    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When the run started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolves the instance for an identity, creating it on first use.
    ///
    /// Identity values are coerced and checked before lookup, so value-equal
    /// identities always yield the same instance within the run.
    ///
    /// # Errors
    ///
    /// Returns an `AttributeError` if a name is not an identity attribute, a
    /// value is invalid, or no identity value is supplied or defaulted.
    pub fn resolve<I, K, V>(&self, resource_type: &Rc<ResourceType>, identity: I) -> Result<Rc<ResourceInstance>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.resolve_with_parent(resource_type, identity, None)
    }

    /// Resolves an instance from a single scalar.
    ///
    /// The scalar is offered to identity attributes in declaration order and
    /// the first one that claims it receives it.
    ///
    /// # Errors
    ///
    /// Returns `NoIdentityMatch` if no identity attribute claims the value.
    pub fn resolve_scalar(&self, resource_type: &Rc<ResourceType>, raw: impl Into<Value>) -> Result<Rc<ResourceInstance>> {
        let raw = raw.into();
        let target = resource_type
            .identity_descriptors()
            .find(|d| d.claims_scalar(resource_type.name(), &raw))
            .map(|d| d.name().to_string());

        match target {
            Some(name) => {
                debug!("Scalar {raw} resolves {}.{name}", resource_type.name());
                self.resolve(resource_type, [(name, raw)])
            }
            None => Err(AttributeError::NoIdentityMatch {
                resource_type: resource_type.name().to_string(),
                actual: raw.to_string(),
            }
            .into()),
        }
    }

    /// Resolves an instance of a nested type declared on the parent's type.
    ///
    /// Children live in the run-wide cache, so two parents naming the same
    /// child identity share one child. The first parent to resolve a child
    /// is the one its defaults see.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNested` if the parent type declares no such child,
    /// and the errors of [`Context::resolve`] otherwise.
    pub fn resolve_nested<I, K, V>(
        &self,
        parent: &Rc<ResourceInstance>,
        child: &str,
        identity: I,
    ) -> Result<Rc<ResourceInstance>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let child_type = Rc::clone(parent.resource_type().nested_type(child)?);
        self.resolve_with_parent(&child_type, identity, Some(Rc::clone(parent)))
    }

    fn resolve_with_parent<I, K, V>(
        &self,
        resource_type: &Rc<ResourceType>,
        identity: I,
        parent: Option<Rc<ResourceInstance>>,
    ) -> Result<Rc<ResourceInstance>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let type_name = resource_type.name();
        let mut supplied = BTreeMap::new();
        for (name, value) in identity {
            let name = name.into();
            let Some(descriptor) = resource_type.descriptor(&name) else {
                return Err(AttributeError::UnknownAttribute {
                    resource_type: type_name.to_string(),
                    attribute: name,
                }
                .into());
            };
            if !descriptor.is_identity() {
                return Err(AttributeError::NotIdentity {
                    resource_type: type_name.to_string(),
                    attribute: name,
                }
                .into());
            }
            let value = descriptor.normalize(type_name, value.into())?;
            supplied.insert(name, value);
        }

        if let Some(instance) = self.lookup_supplied(resource_type, &supplied) {
            return Ok(instance);
        }

        // Defaults of unsupplied identity attributes may read the parent, so
        // the candidate is built before the key is known. Those defaults run
        // again on every resolve that leaves them unsupplied.
        let candidate = ResourceInstance::new(
            Rc::clone(resource_type),
            supplied,
            parent,
            self.config.default_policy,
        );
        candidate.freeze_identity()?;

        if candidate.identity_values().iter().all(|(_, v)| v.is_absent()) {
            return Err(AttributeError::MissingIdentity {
                resource_type: type_name.to_string(),
            }
            .into());
        }

        let key = candidate.identity_key();
        let (instance, inserted) = self
            .cache
            .borrow_mut()
            .get_or_insert(key, Rc::new(candidate));
        if inserted {
            debug!("Created {instance}");
        }
        Ok(instance)
    }

    /// Finds a cached instance when every identity value was supplied.
    fn lookup_supplied(
        &self,
        resource_type: &ResourceType,
        supplied: &BTreeMap<String, Value>,
    ) -> Option<Rc<ResourceInstance>> {
        let values = resource_type
            .identity_descriptors()
            .map(|d| supplied.get(d.name()).cloned())
            .collect::<Option<Vec<_>>>()?;
        let key = IdentityKey::new(resource_type.name(), values);
        self.cache.borrow().get(&key).cloned()
    }

    /// Shows what converging the instance would do.
    ///
    /// # Errors
    ///
    /// Returns an error if the observed state cannot be loaded or diffed.
    pub fn plan(&self, instance: &ResourceInstance) -> Result<ConvergencePlan> {
        self.executor.plan(instance)
    }

    /// Converges one instance.
    ///
    /// # Errors
    ///
    /// Returns a `LoadError` or `ConvergenceError`; see
    /// [`ConvergenceExecutor::converge`].
    pub fn converge(&self, instance: &ResourceInstance) -> Result<ConvergenceReport> {
        self.executor.converge(instance)
    }

    /// Converges every resolved instance in resolution order.
    ///
    /// Stops at the first failure unless `continue_on_error` is set.
    #[must_use]
    pub fn converge_all(&self) -> RunReport {
        let instances = self.instances();
        info!("Converging {} instance(s) in run {}", instances.len(), self.run_id);

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        let mut not_attempted = Vec::new();

        for (idx, instance) in instances.iter().enumerate() {
            match self.converge(instance) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!("Failed to converge {instance}: {err}");
                    failures.push(format!("{instance}: {err}"));
                    if !self.config.continue_on_error {
                        not_attempted = instances[idx + 1..]
                            .iter()
                            .map(|i| i.display_name())
                            .collect();
                        if !not_attempted.is_empty() {
                            warn!("Stopping run; {} instance(s) not attempted", not_attempted.len());
                        }
                        break;
                    }
                }
            }
        }

        RunReport {
            run_id: self.run_id,
            success: failures.is_empty(),
            reports,
            failures,
            not_attempted,
        }
    }

    /// Drops an instance from the cache so the next resolve creates a fresh
    /// one. Returns true if it was cached.
    pub fn evict(&self, instance: &ResourceInstance) -> bool {
        let removed = self.cache.borrow_mut().remove(&instance.identity_key());
        if removed {
            debug!("Evicted {instance}");
        }
        removed
    }

    /// Resolved instances in resolution order.
    #[must_use]
    pub fn instances(&self) -> Vec<Rc<ResourceInstance>> {
        self.cache.borrow().instances()
    }

    /// Number of resolved instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Returns true if nothing was resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
