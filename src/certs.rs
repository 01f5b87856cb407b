use crate::error::GatewayError;
use rcgen::{CertificateParams, KeyPair};
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// PEM certificate/private-key pair terminating TLS for one API instance.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub certificate: String,
    pub private_key: String,
}

/// Generates and reuses self-signed TLS material, one bundle per API
/// instance, stored at `certificates/<api_id>.pem` / `<api_id>.key`.
///
/// Reuse-first: an existing bundle that parses as PEM is returned as-is,
/// so repeated starts never churn certificate files. Deleting the files
/// forces regeneration on the next start.
pub struct CertificateManager {
    dir: PathBuf,
}

const VALIDITY_DAYS: i64 = 730;

impl CertificateManager {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("certificates"),
        }
    }

    pub fn cert_path(&self, api_id: &str) -> PathBuf {
        self.dir.join(format!("{}.pem", api_id))
    }

    pub fn key_path(&self, api_id: &str) -> PathBuf {
        self.dir.join(format!("{}.key", api_id))
    }

    /// Return the bundle for `api_id`, generating it if absent or unreadable.
    pub fn ensure(&self, api_id: &str) -> Result<CertificateBundle, GatewayError> {
        if let Some(bundle) = self.load_valid(api_id) {
            log::debug!("Reusing certificate bundle for api {}", api_id);
            return Ok(bundle);
        }
        self.generate(api_id)
    }

    /// Load the on-disk bundle if both files exist and parse as a PEM
    /// certificate plus PKCS#8 key.
    fn load_valid(&self, api_id: &str) -> Option<CertificateBundle> {
        let cert_path = self.cert_path(api_id);
        let key_path = self.key_path(api_id);
        if !cert_path.exists() || !key_path.exists() {
            return None;
        }

        let cert_file = File::open(&cert_path).ok()?;
        let parsed: Result<Vec<_>, _> = certs(&mut BufReader::new(cert_file)).collect();
        if parsed.ok()?.is_empty() {
            return None;
        }

        let key_file = File::open(&key_path).ok()?;
        let keys: Result<Vec<_>, _> =
            pkcs8_private_keys(&mut BufReader::new(key_file)).collect();
        if keys.ok()?.is_empty() {
            return None;
        }

        let certificate = std::fs::read_to_string(&cert_path).ok()?;
        let private_key = std::fs::read_to_string(&key_path).ok()?;
        Some(CertificateBundle {
            certificate,
            private_key,
        })
    }

    fn generate(&self, api_id: &str) -> Result<CertificateBundle, GatewayError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| GatewayError::Certificate(format!("Failed to create cert dir: {}", e)))?;

        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
                .map_err(|e| GatewayError::Certificate(format!("Invalid cert params: {}", e)))?;
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(VALIDITY_DAYS);

        let key_pair = KeyPair::generate()
            .map_err(|e| GatewayError::Certificate(format!("Key generation failed: {}", e)))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| GatewayError::Certificate(format!("Self-signing failed: {}", e)))?;

        let certificate = cert.pem();
        let private_key = key_pair.serialize_pem();

        std::fs::write(self.cert_path(api_id), &certificate)
            .map_err(|e| GatewayError::Certificate(format!("Failed to write cert: {}", e)))?;
        std::fs::write(self.key_path(api_id), &private_key)
            .map_err(|e| GatewayError::Certificate(format!("Failed to write key: {}", e)))?;

        log::info!("Generated certificate bundle for api {}", api_id);
        Ok(CertificateBundle {
            certificate,
            private_key,
        })
    }

    /// Delete the bundle. Missing files are a no-op, not an error.
    pub fn remove(&self, api_id: &str) -> Result<(), GatewayError> {
        for path in [self.cert_path(api_id), self.key_path(api_id)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(GatewayError::Certificate(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_valid_pem_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CertificateManager::new(dir.path());
        let bundle = mgr.ensure("api-1").unwrap();

        assert!(bundle.certificate.contains("BEGIN CERTIFICATE"));
        assert!(bundle.private_key.contains("BEGIN PRIVATE KEY"));
        assert!(mgr.cert_path("api-1").exists());
        assert!(mgr.key_path("api-1").exists());
    }

    #[test]
    fn reuses_existing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CertificateManager::new(dir.path());
        let first = mgr.ensure("api-1").unwrap();
        let second = mgr.ensure("api-1").unwrap();
        assert_eq!(first.certificate, second.certificate);
        assert_eq!(first.private_key, second.private_key);
    }

    #[test]
    fn regenerates_when_cert_is_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CertificateManager::new(dir.path());
        mgr.ensure("api-1").unwrap();
        std::fs::write(mgr.cert_path("api-1"), "not a certificate").unwrap();

        let bundle = mgr.ensure("api-1").unwrap();
        assert!(bundle.certificate.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CertificateManager::new(dir.path());
        mgr.ensure("api-1").unwrap();
        mgr.remove("api-1").unwrap();
        assert!(!mgr.cert_path("api-1").exists());
        mgr.remove("api-1").unwrap();
    }
}
