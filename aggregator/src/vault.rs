use crate::browser::StoredCookie;
use crate::model::{CredentialRow, NewCredential, SessionRow};
use crate::store::CredentialStore;
use auction_core::crypto::Cipher;
use auction_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Sites credentials may be stored for.
pub const SUPPORTED_SITES: &[&str] = &["goldin", "fanatics", "heritage", "pristine", "rea"];

/// Decrypted login secrets. `Debug` never prints them.
pub struct Secrets {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secrets(..)")
    }
}

/// What an operator may see about a credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub site: String,
    pub username_hint: String,
    pub is_valid: bool,
    pub last_verified: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub has_active_session: bool,
}

/// Serialized browser state persisted after a successful login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub cookies: Vec<StoredCookie>,
    #[serde(rename = "localStorage", default)]
    pub local_storage: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

pub fn normalize_site(site: &str) -> Result<String> {
    let site = site.trim().to_ascii_lowercase();
    if SUPPORTED_SITES.contains(&site.as_str()) {
        Ok(site)
    } else {
        Err(Error::Validation(format!(
            "unsupported site {site}; expected one of {}",
            SUPPORTED_SITES.join(", ")
        )))
    }
}

/// First three characters and a mask. Short usernames are masked entirely.
fn username_hint(username: &str) -> String {
    if username.chars().count() <= 3 {
        return "***".to_string();
    }
    let prefix: String = username.chars().take(3).collect();
    format!("{prefix}***")
}

/// Encrypts credentials and session blobs on their way into the store.
pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    cipher: Cipher,
    session_ttl: chrono::Duration,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn CredentialStore>, cipher: Cipher, session_ttl_hours: i64) -> Self {
        Self {
            store,
            cipher,
            session_ttl: chrono::Duration::hours(session_ttl_hours),
        }
    }

    /// Stores or rotates the secrets for (user, site). Each secret gets its
    /// own IV; the pair is stored as `"<username iv>:<password iv>"`.
    /// Validity resets to true until the next login says otherwise.
    #[instrument(skip(self, username, password))]
    pub async fn store(&self, user_id: i64, site: &str, username: &str, password: &str) -> Result<CredentialStatus> {
        let site = normalize_site(site)?;
        if username.trim().is_empty() || password.is_empty() {
            return Err(Error::Validation("username and password are required".to_string()));
        }
        let user = self.cipher.encrypt(username.trim())?;
        let pass = self.cipher.encrypt(password)?;

        let row = self
            .store
            .upsert_credential(NewCredential {
                user_id,
                site,
                encrypted_username: user.ciphertext,
                encrypted_password: pass.ciphertext,
                iv: format!("{}:{}", user.iv, pass.iv),
            })
            .await?;
        info!(credential_id = %row.id, "Stored credential");
        self.describe(&row).await
    }

    pub async fn credential(&self, user_id: i64, site: &str) -> Result<CredentialRow> {
        let site = normalize_site(site)?;
        self.store
            .get_credential(user_id, &site)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no {site} credentials stored for user {user_id}")))
    }

    pub fn decrypt(&self, credential: &CredentialRow) -> Result<Secrets> {
        let (user_iv, pass_iv) = credential
            .iv
            .split_once(':')
            .ok_or_else(|| Error::Crypto("credential iv pair is malformed".to_string()))?;
        Ok(Secrets {
            username: self.cipher.decrypt(&credential.encrypted_username, user_iv)?,
            password: self.cipher.decrypt(&credential.encrypted_password, pass_iv)?,
        })
    }

    /// Per-site status for a user, secrets withheld.
    pub async fn status(&self, user_id: i64) -> Result<Vec<CredentialStatus>> {
        let rows = self.store.list_credentials(user_id).await?;
        let mut statuses = Vec::with_capacity(rows.len());
        for row in &rows {
            statuses.push(self.describe(row).await?);
        }
        Ok(statuses)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: i64, site: &str) -> Result<bool> {
        let site = normalize_site(site)?;
        let deleted = self.store.delete_credential(user_id, &site).await?;
        info!(deleted, "Deleted credential");
        Ok(deleted)
    }

    pub async fn mark_invalid(&self, credential_id: Uuid, reason: &str) -> Result<()> {
        self.store.mark_invalid(credential_id, reason).await
    }

    pub async fn mark_verified(&self, credential_id: Uuid) -> Result<()> {
        self.store.mark_verified(credential_id, Utc::now()).await
    }

    /// Encrypts `state` as one blob and makes it the credential's only
    /// active session.
    pub async fn save_session(&self, credential_id: Uuid, state: &SessionState) -> Result<SessionRow> {
        let sealed = self.cipher.encrypt(&serde_json::to_string(state)?)?;
        let expires_at = Utc::now() + self.session_ttl;
        self.store
            .insert_session(credential_id, &sealed.ciphertext, &sealed.iv, expires_at)
            .await
    }

    /// The unexpired active session and its decrypted state, if any.
    pub async fn active_session(&self, credential_id: Uuid) -> Result<Option<(SessionRow, SessionState)>> {
        let Some(row) = self.store.active_session(credential_id, Utc::now()).await? else {
            return Ok(None);
        };
        let state = serde_json::from_str(&self.cipher.decrypt(&row.encrypted_state, &row.iv)?)?;
        Ok(Some((row, state)))
    }

    pub async fn deactivate_sessions(&self, credential_id: Uuid) -> Result<u64> {
        self.store.deactivate_sessions(credential_id).await
    }

    async fn describe(&self, row: &CredentialRow) -> Result<CredentialStatus> {
        let hint = self
            .decrypt(row)
            .map(|secrets| username_hint(&secrets.username))
            .unwrap_or_else(|_| "***".to_string());
        let has_active_session = self.store.active_session(row.id, Utc::now()).await?.is_some();
        Ok(CredentialStatus {
            site: row.site.clone(),
            username_hint: hint,
            is_valid: row.is_valid,
            last_verified: row.last_verified,
            last_error: row.last_error.clone(),
            has_active_session,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    pub(crate) fn vault(store: Arc<MemoryStore>) -> CredentialVault {
        CredentialVault::new(store, Cipher::from_secret("vault-test").unwrap(), 12)
    }

    pub(crate) fn state() -> SessionState {
        SessionState {
            cookies: vec![StoredCookie {
                name: "sid".into(),
                value: "abc".into(),
                domain: ".goldin.co".into(),
                path: "/".into(),
                expires: None,
                http_only: true,
                secure: true,
                same_site: None,
            }],
            local_storage: BTreeMap::from([("token".to_string(), "t-1".to_string())]),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn secrets_round_trip_with_independent_ivs() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault(Arc::clone(&store));

        vault.store(7, "Goldin", "collector@example.com", "hunter2").await.unwrap();
        let row = vault.credential(7, "goldin").await.unwrap();

        let (user_iv, pass_iv) = row.iv.split_once(':').unwrap();
        assert_ne!(user_iv, pass_iv);
        assert!(!row.encrypted_password.contains("hunter2"));
        let secrets = vault.decrypt(&row).unwrap();
        assert_eq!(secrets.username, "collector@example.com");
        assert_eq!(secrets.password, "hunter2");
        assert_eq!(format!("{secrets:?}"), "Secrets(..)");
    }

    #[tokio::test]
    async fn unsupported_sites_are_rejected() {
        let vault = vault(Arc::new(MemoryStore::new()));
        let err = vault.store(1, "ebay", "a", "b").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn status_hides_secrets_and_rotation_resets_validity() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault(Arc::clone(&store));
        let row = {
            vault.store(7, "fanatics", "collector@example.com", "pw").await.unwrap();
            vault.credential(7, "fanatics").await.unwrap()
        };
        vault.mark_invalid(row.id, &"x".repeat(800)).await.unwrap();

        let status = vault.status(7).await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].username_hint, "col***");
        assert!(!status[0].is_valid);
        assert_eq!(status[0].last_error.as_ref().map(|e| e.len()), Some(500));

        let rotated = vault.store(7, "fanatics", "collector@example.com", "pw2").await.unwrap();
        assert!(rotated.is_valid);
        assert_eq!(rotated.last_error, None);
    }

    #[tokio::test]
    async fn only_the_newest_session_is_active() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault(Arc::clone(&store));
        vault.store(7, "goldin", "collector@example.com", "pw").await.unwrap();
        let credential = vault.credential(7, "goldin").await.unwrap();

        let first = vault.save_session(credential.id, &state()).await.unwrap();
        let second = vault.save_session(credential.id, &state()).await.unwrap();

        let sessions = store.list_sessions(credential.id).await.unwrap();
        let active: Vec<_> = sessions.iter().filter(|s| s.is_active).map(|s| s.id).collect();
        assert_eq!(active, vec![second.id]);
        assert_ne!(first.id, second.id);

        let (row, restored) = vault.active_session(credential.id).await.unwrap().unwrap();
        assert_eq!(row.id, second.id);
        assert_eq!(restored.local_storage.get("token").map(String::as_str), Some("t-1"));
        assert!(vault.status(7).await.unwrap()[0].has_active_session);

        assert!(vault.delete(7, "goldin").await.unwrap());
        assert!(vault.active_session(credential.id).await.unwrap().is_none());
    }

    #[test]
    fn short_usernames_are_fully_masked() {
        assert_eq!(username_hint("collector"), "col***");
        assert_eq!(username_hint("abcd"), "abc***");
        assert_eq!(username_hint("abc"), "***");
        assert_eq!(username_hint("ab"), "***");
        assert_eq!(username_hint(""), "***");
    }

    #[test]
    fn session_state_uses_local_storage_key() {
        let json = serde_json::to_value(state()).unwrap();
        assert_eq!(json["localStorage"]["token"], serde_json::json!("t-1"));
    }
}
