//! Per-request jurisdiction scoping.

use std::sync::Arc;

use georise_gis_models::{Caller, JurisdictionScope, Role};

use crate::GisError;
use crate::compiler::{CompiledQuery, Predicate};
use crate::store::IncidentStore;

/// Resolves which part of the map a caller may see.
///
/// Scope is looked up on every call and never cached: a change to an
/// agency's polygon or a staff member's agency takes effect on the next
/// request.
#[derive(Clone)]
pub struct JurisdictionResolver {
    store: Arc<dyn IncidentStore>,
}

impl JurisdictionResolver {
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }

    /// Only agency staff are restricted. Staff whose agency has no
    /// jurisdiction polygon see everything.
    ///
    /// # Errors
    ///
    /// Returns [`GisError::Jurisdiction`] if the lookup fails. A failed
    /// lookup never widens the scope.
    pub async fn resolve(&self, caller: &Caller) -> Result<JurisdictionScope, GisError> {
        match caller.role {
            Role::AgencyStaff => {
                let agency = self
                    .store
                    .jurisdiction_agency(caller.id)
                    .await
                    .map_err(|e| {
                        log::error!("Failed to resolve jurisdiction for user {}: {e}", caller.id);
                        GisError::Jurisdiction(e)
                    })?;

                Ok(agency.map_or_else(
                    || {
                        log::debug!(
                            "User {} has no agency jurisdiction, not restricting",
                            caller.id
                        );
                        JurisdictionScope::Unrestricted
                    },
                    |agency_id| JurisdictionScope::Agency { agency_id },
                ))
            }
            Role::Admin | Role::Citizen => Ok(JurisdictionScope::Unrestricted),
        }
    }
}

/// Adds the scope's predicate, if any, to `query`.
pub fn apply(scope: JurisdictionScope, query: &mut CompiledQuery) {
    if let JurisdictionScope::Agency { agency_id } = scope {
        query.push(Predicate::Jurisdiction { agency_id });
    }
}
