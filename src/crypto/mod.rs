//! Cryptographic functions for dvom
//!
//! Streaming AES-256-GCM with PBKDF2-HMAC-SHA256 key derivation for optional
//! encryption of snapshot archives. See [`header`] for the on-disk framing.

pub mod header;
pub mod key_derivation;
pub mod secure_memory;
pub mod stream;

pub use header::{is_encrypted, peek, EncryptionHeader, Peeked, HEADER_LEN, MAGIC};
pub use key_derivation::{derive_key, DerivedKey};
pub use secure_memory::SecureString;
pub use stream::{decrypt, encrypt, encrypted_size, DecryptReader, EncryptReader, CHUNK_SIZE};
