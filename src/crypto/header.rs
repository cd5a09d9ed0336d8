//! Encryption header framing
//!
//! Every encrypted stream starts with a fixed 53-byte header:
//!
//! | bytes  | field                      |
//! |--------|----------------------------|
//! | 0..8   | magic `DVOM-ENC`           |
//! | 8      | format version (`1`)       |
//! | 9..41  | PBKDF2 salt                |
//! | 41..53 | AES-GCM base nonce         |
//!
//! A stream that does not begin with the magic tag is plaintext.

use std::io::{self, Cursor, Read, Write};

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;

use crate::error::{DvomError, DvomResult};

/// Magic tag identifying an encrypted stream
pub const MAGIC: &[u8; 8] = b"DVOM-ENC";

/// Current (and only) format version
pub const FORMAT_VERSION: u8 = 1;

pub const SALT_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Total header length
pub const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_SIZE + NONCE_SIZE;

/// Salt and base nonce of one encryption operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
}

impl EncryptionHeader {
    /// Generate a header with a fresh random salt and base nonce
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);
        Self { salt, nonce }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..MAGIC.len()].copy_from_slice(MAGIC);
        out[MAGIC.len()] = FORMAT_VERSION;
        let salt_start = MAGIC.len() + 1;
        out[salt_start..salt_start + SALT_SIZE].copy_from_slice(&self.salt);
        out[salt_start + SALT_SIZE..].copy_from_slice(&self.nonce);
        out
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Parse a header; fails with `Corrupted` on short input, bad magic or an
    /// unsupported version
    pub fn from_bytes(bytes: &[u8]) -> DvomResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(DvomError::Corrupted(format!(
                "encryption header truncated ({} of {} bytes)",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if !is_encrypted(bytes) {
            return Err(DvomError::Corrupted(
                "encryption header missing (unknown magic)".into(),
            ));
        }
        let version = bytes[MAGIC.len()];
        if version != FORMAT_VERSION {
            return Err(DvomError::Corrupted(format!(
                "unsupported encryption format version {}",
                version
            )));
        }

        let salt_start = MAGIC.len() + 1;
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        salt.copy_from_slice(&bytes[salt_start..salt_start + SALT_SIZE]);
        nonce.copy_from_slice(&bytes[salt_start + SALT_SIZE..HEADER_LEN]);
        Ok(Self { salt, nonce })
    }

    /// Read and parse a header from the front of a stream
    pub fn read_from<R: Read>(reader: R) -> DvomResult<Self> {
        let buf = read_prefix(reader, HEADER_LEN)?;
        Self::from_bytes(&buf)
    }
}

/// Whether a byte prefix carries the encryption magic tag
pub fn is_encrypted(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// A stream after its leading bytes have been inspected
pub enum Peeked<R> {
    /// The header has been consumed; the reader is positioned at the ciphertext
    Encrypted(EncryptionHeader, R),
    /// No magic tag; the already-read bytes are replayed in front of the rest
    Plain(io::Chain<Cursor<Vec<u8>>, R>),
}

/// Look at the front of a stream and split off the header if there is one
pub fn peek<R: Read>(mut reader: R) -> DvomResult<Peeked<R>> {
    let buf = read_prefix(&mut reader, HEADER_LEN)?;
    if is_encrypted(&buf) {
        let header = EncryptionHeader::from_bytes(&buf)?;
        Ok(Peeked::Encrypted(header, reader))
    } else {
        Ok(Peeked::Plain(Cursor::new(buf).chain(reader)))
    }
}

/// Read up to `len` bytes, stopping early only at end of stream
fn read_prefix<R: Read>(mut reader: R, len: usize) -> DvomResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}
