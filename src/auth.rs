//! Token verification and role/scope enforcement. Pure functions over an
//! HS256-signed bearer token — no transport anywhere in here; any carrier
//! (HTTP header, CLI flag, test literal) works.

use std::collections::HashSet;
use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Operator roles, weakest first. The derived ordering is the role lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Agent,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Agent => "agent",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Role::Viewer),
            "agent" => Some(Role::Agent),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub agent_scope: Option<String>,
    pub permissions: HashSet<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default)]
    perms: Vec<String>,
    iat: i64,
    exp: i64,
}

pub struct AuthGate {
    secret: String,
    token_ttl: Duration,
}

impl AuthGate {
    pub fn new(secret: impl Into<String>, token_ttl: Duration) -> Self {
        AuthGate {
            secret: secret.into(),
            token_ttl,
        }
    }

    /// Sign a token for an operator. Used by the `mint-token` command and
    /// by tests; the interactive login flow lives elsewhere.
    pub fn mint(
        &self,
        user_id: &str,
        username: &str,
        role: Role,
        agent_scope: Option<String>,
        permissions: &HashSet<String>,
    ) -> CoreResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role,
            scope: agent_scope,
            perms: permissions.iter().cloned().collect(),
            iat: now,
            exp: now + self.token_ttl.as_secs() as i64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| CoreError::internal(format!("signing token: {e}")))
    }

    /// Verify signature and expiry, producing the caller's principal.
    /// Expiry is strict: no leeway.
    pub fn verify(&self, token: &str) -> CoreResult<AuthPrincipal> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| CoreError::Auth(format!("invalid token: {e}")))?;

        let claims = data.claims;
        Ok(AuthPrincipal {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
            agent_scope: claims.scope,
            permissions: claims.perms.into_iter().collect(),
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }
}

/// Role check: passes iff the principal's role is at least `min`.
pub fn require(principal: &AuthPrincipal, min: Role) -> CoreResult<()> {
    if principal.role >= min {
        Ok(())
    } else {
        Err(CoreError::Auth(format!(
            "role {} required, have {}",
            min.as_str(),
            principal.role.as_str()
        )))
    }
}

/// Scope check for operations targeting a specific agent: managers and
/// above see everything, everyone else only their own subtree root.
pub fn require_agent_scope(principal: &AuthPrincipal, target_agent: &str) -> CoreResult<()> {
    if principal.role >= Role::Manager {
        return Ok(());
    }
    match &principal.agent_scope {
        Some(scope) if scope == target_agent => Ok(()),
        _ => Err(CoreError::Auth(format!(
            "no access to agent '{target_agent}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new("unit-secret", Duration::from_secs(3600))
    }

    fn principal(role: Role, scope: Option<&str>) -> AuthPrincipal {
        AuthPrincipal {
            user_id: "u1".to_string(),
            username: "op".to_string(),
            role,
            agent_scope: scope.map(|s| s.to_string()),
            permissions: HashSet::new(),
            issued_at: 0,
            expires_at: i64::MAX,
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let gate = gate();
        let mut perms = HashSet::new();
        perms.insert("settle".to_string());
        let token = gate
            .mint("u1", "op", Role::Manager, Some("AG1".to_string()), &perms)
            .unwrap();

        let p = gate.verify(&token).unwrap();
        assert_eq!(p.user_id, "u1");
        assert_eq!(p.role, Role::Manager);
        assert_eq!(p.agent_scope.as_deref(), Some("AG1"));
        assert!(p.permissions.contains("settle"));
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = gate()
            .mint("u1", "op", Role::Viewer, None, &HashSet::new())
            .unwrap();
        let other = AuthGate::new("different", Duration::from_secs(3600));
        assert!(matches!(other.verify(&token), Err(CoreError::Auth(_))));
    }

    #[test]
    fn expired_token_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "u1".to_string(),
            username: "op".to_string(),
            role: Role::Admin,
            scope: None,
            perms: Vec::new(),
            iat: now - 120,
            exp: now - 60,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"unit-secret"),
        )
        .unwrap();
        assert!(matches!(gate().verify(&token), Err(CoreError::Auth(_))));
    }

    #[test]
    fn role_order_is_monotonic() {
        let ranks = [Role::Viewer, Role::Agent, Role::Manager, Role::Admin];
        for (i, &min) in ranks.iter().enumerate() {
            for (j, &have) in ranks.iter().enumerate() {
                let allowed = require(&principal(have, None), min).is_ok();
                assert_eq!(allowed, j >= i, "min={min:?} have={have:?}");
            }
        }
    }

    #[test]
    fn admin_is_allowed_everywhere() {
        let p = principal(Role::Admin, None);
        assert!(require(&p, Role::Admin).is_ok());
        assert!(require_agent_scope(&p, "ANY").is_ok());
    }

    #[test]
    fn agent_scope_limits_sub_manager_roles() {
        let p = principal(Role::Agent, Some("AG1"));
        assert!(require_agent_scope(&p, "AG1").is_ok());
        assert!(require_agent_scope(&p, "AG2").is_err());

        let m = principal(Role::Manager, Some("AG1"));
        assert!(require_agent_scope(&m, "AG2").is_ok());
    }
}
