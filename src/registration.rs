//! Ledger of dynamic capability registrations.
//!
//! A registration id moves from Unregistered to Active on `register` and back
//! on `unregister`. Re-registering an active id is rejected rather than
//! merged. A method may be backed either by a static capability declared at
//! initialization or by dynamic registrations, never both.

use crate::error::{LspError, Result};
use crate::types::{Registration, RegistrationParams, Unregistration, UnregistrationParams};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct LedgerState {
    active: HashMap<String, Registration>,
    static_methods: HashSet<String>,
}

impl LedgerState {
    fn check_register(&self, registration: &Registration) -> Result<()> {
        if self.active.contains_key(&registration.id) {
            return Err(LspError::AlreadyRegistered(registration.id.clone()));
        }
        if self.static_methods.contains(&registration.method) {
            return Err(LspError::CapabilityConflict {
                method: registration.method.clone(),
            });
        }
        Ok(())
    }

    fn check_unregister(&self, unregistration: &Unregistration) -> Result<()> {
        match self.active.get(&unregistration.id) {
            None => Err(LspError::NotRegistered(unregistration.id.clone())),
            Some(active) if active.method != unregistration.method => {
                Err(LspError::MethodMismatch {
                    id: unregistration.id.clone(),
                    expected: active.method.clone(),
                    actual: unregistration.method.clone(),
                })
            }
            Some(_) => Ok(()),
        }
    }
}

/// Active dynamic registrations of one session.
#[derive(Debug, Default)]
pub struct RegistrationLedger {
    state: RwLock<LedgerState>,
}

impl RegistrationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a registration.
    pub async fn register(&self, registration: Registration) -> Result<()> {
        let mut state = self.state.write().await;
        if let Err(e) = state.check_register(&registration) {
            log::error!("Rejected registration: {}", e);
            return Err(e);
        }
        log::debug!(
            "Registered '{}' for {}",
            registration.id,
            registration.method
        );
        state.active.insert(registration.id.clone(), registration);
        Ok(())
    }

    /// Activate a batch of registrations. The batch is validated as a whole
    /// first, so a rejected batch leaves the ledger untouched.
    pub async fn register_all(&self, params: RegistrationParams) -> Result<()> {
        let mut state = self.state.write().await;
        {
            let mut batch_ids = HashSet::new();
            for registration in &params.registrations {
                let checked = state.check_register(registration).and_then(|_| {
                    if batch_ids.insert(registration.id.as_str()) {
                        Ok(())
                    } else {
                        Err(LspError::AlreadyRegistered(registration.id.clone()))
                    }
                });
                if let Err(e) = checked {
                    log::error!("Rejected registration batch: {}", e);
                    return Err(e);
                }
            }
        }
        for registration in params.registrations {
            log::debug!(
                "Registered '{}' for {}",
                registration.id,
                registration.method
            );
            state.active.insert(registration.id.clone(), registration);
        }
        Ok(())
    }

    /// Deactivate a registration by id, returning it.
    pub async fn unregister(&self, id: &str) -> Result<Registration> {
        let mut state = self.state.write().await;
        match state.active.remove(id) {
            Some(registration) => {
                log::debug!("Unregistered '{}' for {}", id, registration.method);
                Ok(registration)
            }
            None => {
                log::error!("Cannot unregister '{}': not active", id);
                Err(LspError::NotRegistered(id.to_string()))
            }
        }
    }

    /// Deactivate a batch of registrations. Each entry must name an active
    /// id with its recorded method; a rejected batch leaves the ledger
    /// untouched.
    pub async fn unregister_all(&self, params: UnregistrationParams) -> Result<Vec<Registration>> {
        let mut state = self.state.write().await;
        let mut batch_ids = HashSet::new();
        for unregistration in &params.unregistrations {
            let checked = state.check_unregister(unregistration).and_then(|_| {
                if batch_ids.insert(unregistration.id.as_str()) {
                    Ok(())
                } else {
                    Err(LspError::NotRegistered(unregistration.id.clone()))
                }
            });
            if let Err(e) = checked {
                log::error!("Rejected unregistration batch: {}", e);
                return Err(e);
            }
        }
        Ok(params
            .unregistrations
            .iter()
            .filter_map(|unregistration| state.active.remove(&unregistration.id))
            .collect())
    }

    /// Record a capability declared statically at initialization.
    pub async fn declare_static(&self, method: impl Into<String>) -> Result<()> {
        let method = method.into();
        let mut state = self.state.write().await;
        if state.active.values().any(|r| r.method == method) {
            log::error!("Cannot declare '{}' statically: it is registered dynamically", method);
            return Err(LspError::CapabilityConflict { method });
        }
        state.static_methods.insert(method);
        Ok(())
    }

    /// Whether `method` is currently backed by at least one registration.
    pub async fn is_registered(&self, method: &str) -> bool {
        self.state
            .read()
            .await
            .active
            .values()
            .any(|r| r.method == method)
    }

    /// Whether `method` is statically declared.
    pub async fn is_static(&self, method: &str) -> bool {
        self.state.read().await.static_methods.contains(method)
    }

    /// All active registrations for `method`.
    pub async fn registrations_for(&self, method: &str) -> Vec<Registration> {
        self.state
            .read()
            .await
            .active
            .values()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Look up an active registration by id.
    pub async fn get(&self, id: &str) -> Option<Registration> {
        self.state.read().await.active.get(id).cloned()
    }

    /// Number of active registrations.
    pub async fn len(&self) -> usize {
        self.state.read().await.active.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Session teardown: drop every active registration without individual
    /// unregister calls. Static declarations are cleared as well.
    pub async fn teardown(&self) -> Vec<Registration> {
        let mut state = self.state.write().await;
        state.static_methods.clear();
        let dropped: Vec<Registration> = state.active.drain().map(|(_, r)| r).collect();
        if !dropped.is_empty() {
            log::debug!("Dropped {} registrations on teardown", dropped.len());
        }
        dropped
    }
}
