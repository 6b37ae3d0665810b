//! Rotating credentials used to authorize the privileged operation.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};

/// Characters of secret material shown in admin listings.
const PREVIEW_LEN: usize = 8;

/// One set of externally issued secret material.
///
/// The secret fields are opaque to this system; they are handed unchanged to
/// the privileged-operation collaborator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Unique name; the handle used to ban or delete this credential.
    pub name: String,
    pub token: String,
    pub transaction: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub params_digest: Option<String>,
    #[serde(default)]
    pub headers_digest: Option<String>,
    /// Cleared when the credential is proven dead; never set again by the pool.
    #[serde(default = "alive_by_default")]
    pub alive: bool,
}

fn alive_by_default() -> bool {
    true
}

impl Credential {
    /// Display-safe projection with secrets truncated.
    pub fn view(&self) -> CredentialView {
        CredentialView {
            name: self.name.clone(),
            token_preview: preview(&self.token),
            transaction_preview: preview(&self.transaction),
            sandbox: self.sandbox,
            has_params_digest: self.params_digest.is_some(),
            has_headers_digest: self.headers_digest.is_some(),
            alive: self.alive,
        }
    }
}

// Secrets must never reach logs through `{:?}`.
impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("sandbox", &self.sandbox)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}

impl Entity for Credential {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.name
    }
}

/// Admin-supplied credential, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCredential {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub transaction: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub params_digest: Option<String>,
    #[serde(default)]
    pub headers_digest: Option<String>,
}

impl NewCredential {
    /// Validate required identification fields and build a live credential.
    ///
    /// `template` is the first configured credential; an absent
    /// `headers_digest` is inherited from it.
    pub fn validate(self, template: Option<&Credential>) -> DomainResult<Credential> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("credential name is required"));
        }
        if self.token.trim().is_empty() {
            return Err(DomainError::validation(format!("credential {name}: token is required")));
        }
        if self.transaction.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "credential {name}: transaction is required"
            )));
        }

        let headers_digest = non_blank(self.headers_digest)
            .or_else(|| template.and_then(|t| t.headers_digest.clone()));

        Ok(Credential {
            name,
            token: self.token.trim().to_string(),
            transaction: self.transaction.trim().to_string(),
            sandbox: self.sandbox,
            params_digest: non_blank(self.params_digest),
            headers_digest,
            alive: true,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn preview(secret: &str) -> String {
    if secret.chars().count() <= PREVIEW_LEN {
        return "*".repeat(secret.chars().count());
    }
    let head: String = secret.chars().take(PREVIEW_LEN).collect();
    format!("{head}...")
}

/// Credential as shown on the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialView {
    pub name: String,
    pub token_preview: String,
    pub transaction_preview: String,
    pub sandbox: bool,
    pub has_params_digest: bool,
    pub has_headers_digest: bool,
    pub alive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str) -> NewCredential {
        NewCredential {
            name: name.to_string(),
            token: "tok-0123456789".to_string(),
            transaction: "txn-abcdefghij".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn validate_requires_identification_fields() {
        assert!(input("").validate(None).is_err());

        let mut missing_token = input("k1");
        missing_token.token = "  ".to_string();
        assert!(missing_token.validate(None).is_err());

        let mut missing_txn = input("k1");
        missing_txn.transaction.clear();
        assert!(missing_txn.validate(None).is_err());

        let ok = input(" k1 ").validate(None).unwrap();
        assert_eq!(ok.name, "k1");
        assert!(ok.alive);
    }

    #[test]
    fn headers_digest_defaults_from_template() {
        let mut template = input("first").validate(None).unwrap();
        template.headers_digest = Some("hdr".to_string());

        let inherited = input("k2").validate(Some(&template)).unwrap();
        assert_eq!(inherited.headers_digest.as_deref(), Some("hdr"));

        let mut own = input("k3");
        own.headers_digest = Some("mine".to_string());
        let own = own.validate(Some(&template)).unwrap();
        assert_eq!(own.headers_digest.as_deref(), Some("mine"));
    }

    #[test]
    fn view_redacts_secrets() {
        let cred = input("k1").validate(None).unwrap();
        let view = cred.view();
        assert_eq!(view.token_preview, "tok-0123...");
        assert!(!view.transaction_preview.contains("abcdefghij"));

        let debug = format!("{cred:?}");
        assert!(!debug.contains("tok-0123456789"));
    }

    #[test]
    fn alive_defaults_to_true_when_absent() {
        let cred: Credential =
            serde_json::from_str(r#"{"name":"k","token":"t","transaction":"x"}"#).unwrap();
        assert!(cred.alive);
    }
}
