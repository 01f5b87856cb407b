use crate::db::models::CredentialRow;
use crate::error::GatewayError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::RngCore;
use sqlx::SqlitePool;
use std::path::Path;

const NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;

/// Generates, stores and rotates per-API bearer secrets.
///
/// Secrets are encrypted at rest with AES-256-GCM under a per-install key
/// kept in `credentials.key` inside the app data directory. Plaintext only
/// ever crosses the command boundary and is never written to logs.
pub struct CredentialManager {
    cipher: Aes256Gcm,
}

impl CredentialManager {
    /// Load the install key from `data_dir`, creating it on first run.
    pub fn init(data_dir: &Path) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| GatewayError::Internal(format!("Failed to create data dir: {}", e)))?;

        let key_path = data_dir.join("credentials.key");
        let key_bytes = if key_path.exists() {
            let encoded = std::fs::read_to_string(&key_path)
                .map_err(|e| GatewayError::Internal(format!("Failed to read key file: {}", e)))?;
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| GatewayError::Internal(format!("Corrupt key file: {}", e)))?
        } else {
            let mut bytes = vec![0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            std::fs::write(&key_path, STANDARD.encode(&bytes))
                .map_err(|e| GatewayError::Internal(format!("Failed to write key file: {}", e)))?;
            bytes
        };

        if key_bytes.len() != 32 {
            return Err(GatewayError::Internal("Invalid credential key length".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|_| GatewayError::Internal("Failed to initialize cipher".into()))?;
        Ok(Self { cipher })
    }

    /// 32 bytes of CSPRNG output, base64-encoded (43 chars).
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; SECRET_LEN];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, GatewayError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| GatewayError::Internal("Secret encryption failed".into()))?;
        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.append(&mut ciphertext);
        Ok(STANDARD.encode(payload))
    }

    fn decrypt(&self, encoded: &str) -> Result<String, GatewayError> {
        let payload = STANDARD
            .decode(encoded)
            .map_err(|_| GatewayError::Internal("Corrupt credential payload".into()))?;
        if payload.len() <= NONCE_LEN {
            return Err(GatewayError::Internal("Corrupt credential payload".into()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| GatewayError::Internal("Secret decryption failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| GatewayError::Internal("Corrupt credential payload".into()))
    }

    /// Create and persist a fresh secret for `api_id`, replacing any
    /// existing one. Returns the plaintext exactly once.
    pub async fn create(&self, pool: &SqlitePool, api_id: &str) -> Result<String, GatewayError> {
        let secret = Self::generate_secret();
        let enc = self.encrypt(&secret)?;
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO credentials (api_id, secret_enc, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(api_id) DO UPDATE SET secret_enc = ?2, created_at = ?3",
        )
        .bind(api_id)
        .bind(&enc)
        .bind(&now)
        .execute(pool)
        .await?;

        Ok(secret)
    }

    /// Current plaintext secret for `api_id`, or None if no credential exists.
    pub async fn fetch(
        &self,
        pool: &SqlitePool,
        api_id: &str,
    ) -> Result<Option<String>, GatewayError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM credentials WHERE api_id = ?",
        )
        .bind(api_id)
        .fetch_optional(pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.decrypt(&row.secret_enc)?)),
            None => Ok(None),
        }
    }

    /// Atomically replace the secret. The old value is invalid as soon as
    /// the row updates because the proxy checks the store on every request.
    pub async fn rotate(&self, pool: &SqlitePool, api_id: &str) -> Result<String, GatewayError> {
        self.create(pool, api_id).await
    }

    pub async fn remove(&self, pool: &SqlitePool, api_id: &str) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM credentials WHERE api_id = ?")
            .bind(api_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
