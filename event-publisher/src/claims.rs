use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const MAPPER_ID: &str = "cotai-tenant-id-mapper";
pub const DEFAULT_TENANT_CLAIM: &str = "tenant_id";
pub const TENANT_ATTRIBUTE: &str = "tenant_id";
const MAPPER_PRIORITY: i32 = 50;

/// The slice of a provider user the mapper reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    pub fn attribute(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Copies the user's tenant into issued tokens. Multi-tenant users get their first tenant.
#[derive(Debug, Clone)]
pub struct TenantClaimMapper {
    claim_name: String,
}

impl Default for TenantClaimMapper {
    fn default() -> Self {
        Self {
            claim_name: DEFAULT_TENANT_CLAIM.to_string(),
        }
    }
}

impl TenantClaimMapper {
    /// A blank claim name keeps the default.
    pub fn with_claim_name(claim_name: impl Into<String>) -> Self {
        let claim_name = claim_name.into();
        if claim_name.trim().is_empty() {
            return Self::default();
        }
        Self { claim_name }
    }

    pub fn id(&self) -> &'static str {
        MAPPER_ID
    }

    pub fn priority(&self) -> i32 {
        MAPPER_PRIORITY
    }

    pub fn claim_name(&self) -> &str {
        &self.claim_name
    }

    /// Returns the tenant written, if any. Missing users and attributes leave
    /// the claims untouched.
    pub fn set_claim(&self, user: Option<&UserRecord>, claims: &mut Map<String, Value>) -> Option<String> {
        let Some(user) = user else {
            warn!(claim = %self.claim_name, "No user on session; cannot set tenant claim");
            return None;
        };

        let tenants = user.attribute(TENANT_ATTRIBUTE);
        let Some(tenant_id) = tenants.first() else {
            warn!(
                username = %user.username,
                user_id = %user.id,
                "User has no tenant_id attribute and cannot access tenant resources"
            );
            return None;
        };

        if tenants.len() > 1 {
            debug!(username = %user.username, tenants = tenants.len(), %tenant_id, "User belongs to several tenants; using the first");
        }

        claims.insert(self.claim_name.clone(), Value::String(tenant_id.clone()));
        debug!(claim = %self.claim_name, %tenant_id, username = %user.username, "Set tenant claim");
        Some(tenant_id.clone())
    }
}
