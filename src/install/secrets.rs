//! Fresh credentials for authentication and obfuscation

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Raw entropy per secret
pub const SECRET_BYTES: usize = 16;

/// The two shared secrets of one provisioning run
#[derive(Clone, PartialEq, Eq)]
pub struct Secrets {
    pub auth: String,
    pub obfs: String,
}

// Secrets must not end up in logs via `{:?}`.
impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("auth", &"<redacted>")
            .field("obfs", &"<redacted>")
            .finish()
    }
}

/// [`SECRET_BYTES`] from the OS CSPRNG, base64url without padding
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Two independent secrets, guaranteed distinct
pub fn generate_pair() -> Secrets {
    let auth = generate_secret();
    let mut obfs = generate_secret();
    while obfs == auth {
        obfs = generate_secret();
    }
    Secrets { auth, obfs }
}

pub fn decode_secret(secret: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(secret)
}
