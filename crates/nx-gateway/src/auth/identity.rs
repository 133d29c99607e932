//! Gateway SSH identity
//!
//! The gateway authenticates every outbound SSH connection that does not
//! carry its own credential with one Ed25519 key pair. Operators install the
//! public half in `~/.ssh/authorized_keys` on each node.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rand::rngs::OsRng;
use russh_keys::key::KeyPair;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey};

use nx_core::IdentityError;

/// File name of the private key inside the identity directory
pub const PRIVATE_KEY_FILE: &str = "id_ed25519";

/// File name of the public key inside the identity directory
pub const PUBLIC_KEY_FILE: &str = "id_ed25519.pub";

/// One loaded key pair
pub struct GatewayIdentity {
    keypair: Arc<KeyPair>,
    public_key: String,
    fingerprint: String,
}

impl GatewayIdentity {
    /// Key pair for `authenticate_publickey`
    pub fn keypair(&self) -> Arc<KeyPair> {
        Arc::clone(&self.keypair)
    }

    /// OpenSSH `authorized_keys` line
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// SHA256 fingerprint
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Owns the identity directory and the currently loaded key pair
pub struct IdentityStore {
    dir: PathBuf,
    comment: String,
    current: RwLock<Arc<GatewayIdentity>>,
}

impl IdentityStore {
    /// Load the key pair from `dir`, generating one on first use
    pub fn load_or_generate(
        dir: impl Into<PathBuf>,
        comment: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let dir = dir.into();
        let comment = comment.into();
        let key_path = dir.join(PRIVATE_KEY_FILE);

        let identity = if key_path.exists() {
            tracing::info!("Loading gateway SSH key from {:?}", key_path);
            load_identity(&key_path, &comment)?
        } else {
            tracing::info!("Generating gateway SSH key at {:?}", key_path);
            generate_identity(&dir, &comment)?
        };

        tracing::info!("Gateway SSH key fingerprint: {}", identity.fingerprint);

        Ok(Self {
            dir,
            comment,
            current: RwLock::new(Arc::new(identity)),
        })
    }

    /// Currently active key pair
    pub fn current(&self) -> Arc<GatewayIdentity> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Path of the private key file
    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    /// Delete the key pair and create a fresh one.
    ///
    /// Every node that trusted the old public key must be given the new one.
    pub fn regenerate(&self) -> Result<Arc<GatewayIdentity>, IdentityError> {
        for file in [PRIVATE_KEY_FILE, PUBLIC_KEY_FILE] {
            let path = self.dir.join(file);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        let identity = Arc::new(generate_identity(&self.dir, &self.comment)?);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&identity);

        tracing::warn!(
            "Gateway SSH key regenerated, new fingerprint {}. Nodes trusting the old key must be updated.",
            identity.fingerprint
        );
        Ok(identity)
    }
}

fn key_error(e: impl std::fmt::Display) -> IdentityError {
    IdentityError::Key(e.to_string())
}

fn generate_identity(dir: &Path, comment: &str) -> Result<GatewayIdentity, IdentityError> {
    std::fs::create_dir_all(dir)?;

    let private = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(key_error)?;
    let key_path = dir.join(PRIVATE_KEY_FILE);
    private
        .write_openssh_file(&key_path, LineEnding::LF)
        .map_err(key_error)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let identity = identity_from_private(&private, comment)?;
    std::fs::write(dir.join(PUBLIC_KEY_FILE), format!("{}\n", identity.public_key))?;
    Ok(identity)
}

fn load_identity(key_path: &Path, comment: &str) -> Result<GatewayIdentity, IdentityError> {
    let pem = std::fs::read_to_string(key_path)?;
    let private = PrivateKey::from_openssh(&pem).map_err(key_error)?;
    identity_from_private(&private, comment)
}

fn identity_from_private(
    private: &PrivateKey,
    comment: &str,
) -> Result<GatewayIdentity, IdentityError> {
    let pem = private.to_openssh(LineEnding::LF).map_err(key_error)?;
    let keypair = russh_keys::decode_secret_key(&pem, None).map_err(key_error)?;

    let public = private.public_key();
    let line = public.to_openssh().map_err(key_error)?;
    let public_key = if comment.is_empty() {
        line
    } else {
        format!("{} {}", line, comment)
    };

    Ok(GatewayIdentity {
        keypair: Arc::new(keypair),
        public_key,
        fingerprint: public.fingerprint(HashAlg::Sha256).to_string(),
    })
}
