//! Acting-user context and role gating.
//!
//! Authentication itself is delegated to the external identity provider;
//! this module only carries the already-authenticated identity through each
//! operation. Every domain function receives a [`RequestContext`] explicitly
//! instead of reading ambient session state, so the engines are testable
//! without any UI or provider wiring.

use serde::{Deserialize, Serialize};

use crate::error::{NexusError, Result};

/// Role set of the NEXUS back office. Treated as an opaque enum; no
/// permission strings or claims are modeled beyond what the core needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Diretoria,
    Financeiro,
    Loja,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Diretoria => "DIRETORIA",
            Role::Financeiro => "FINANCEIRO",
            Role::Loja => "LOJA",
        }
    }
}

/// Identity and tenant scope of the acting user, passed into every
/// operation. `loja_id` is set for LOJA users (their own store) and `None`
/// for company-wide roles.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
    pub empresa_id: String,
    pub loja_id: Option<String>,
}

impl RequestContext {
    /// May this user edit (save/close) the daily closing of `loja_id`?
    ///
    /// LOJA users are restricted to their own store; FINANCEIRO/ADMIN may
    /// act on any store of the tenant; DIRETORIA is read-only.
    pub fn require_closing_access(&self, loja_id: &str) -> Result<()> {
        match self.role {
            Role::Admin | Role::Financeiro => Ok(()),
            Role::Loja => match self.loja_id.as_deref() {
                Some(own) if own == loja_id => Ok(()),
                _ => Err(NexusError::Forbidden(format!(
                    "usuário da loja não pode editar fechamento da loja {loja_id}"
                ))),
            },
            Role::Diretoria => Err(NexusError::Forbidden(
                "perfil DIRETORIA é somente leitura".into(),
            )),
        }
    }

    /// Reconciliation, financial review, reopening and spreadsheet imports
    /// are restricted to FINANCEIRO and ADMIN.
    pub fn require_financeiro(&self) -> Result<()> {
        match self.role {
            Role::Admin | Role::Financeiro => Ok(()),
            _ => Err(NexusError::Forbidden(format!(
                "operação exige perfil FINANCEIRO ou ADMIN (atual: {})",
                self.role.as_str()
            ))),
        }
    }

    /// Soft deletes are an administrative action.
    pub fn require_admin(&self) -> Result<()> {
        match self.role {
            Role::Admin => Ok(()),
            _ => Err(NexusError::Forbidden(format!(
                "operação exige perfil ADMIN (atual: {})",
                self.role.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role, loja_id: Option<&str>) -> RequestContext {
        RequestContext {
            user_id: "user-1".into(),
            user_name: "Maria".into(),
            role,
            empresa_id: "emp-1".into(),
            loja_id: loja_id.map(String::from),
        }
    }

    #[test]
    fn test_loja_user_limited_to_own_store() {
        let c = ctx(Role::Loja, Some("loja-1"));
        assert!(c.require_closing_access("loja-1").is_ok());
        assert!(matches!(
            c.require_closing_access("loja-2"),
            Err(NexusError::Forbidden(_))
        ));
    }

    #[test]
    fn test_diretoria_is_read_only() {
        let c = ctx(Role::Diretoria, None);
        assert!(c.require_closing_access("loja-1").is_err());
        assert!(c.require_financeiro().is_err());
    }

    #[test]
    fn test_financeiro_and_admin_cross_store() {
        for role in [Role::Financeiro, Role::Admin] {
            let c = ctx(role, None);
            assert!(c.require_closing_access("loja-9").is_ok());
            assert!(c.require_financeiro().is_ok());
        }
        assert!(ctx(Role::Financeiro, None).require_admin().is_err());
        assert!(ctx(Role::Admin, None).require_admin().is_ok());
    }
}
