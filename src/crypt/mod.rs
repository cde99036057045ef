//! Secret-at-rest encryption and outbound redaction for credential fields.

pub mod cipher;
pub mod redact;

pub use cipher::{CipherError, SecretCipher, CIPHERTEXT_PREFIX};
pub use redact::{is_sentinel, redact, SENTINEL};
