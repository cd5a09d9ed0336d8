//! Chunked AES-256-GCM stream transforms
//!
//! Plaintext is sealed in 64 KiB chunks. Chunk `i` uses the header's base
//! nonce with its low 8 bytes XORed with `i` (big-endian), so one random base
//! nonce yields 2^64 distinct per-chunk nonces. Each sealed chunk is the
//! ciphertext followed by its 16-byte tag; only the last chunk may be short.
//!
//! Both transforms are `Read` adapters, so memory use is bounded by one chunk
//! no matter how large the stream is.

use std::io::{self, Read};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use super::header::{EncryptionHeader, HEADER_LEN, NONCE_SIZE};
use super::key_derivation::{derive_key, DerivedKey};
use crate::error::{DvomError, DvomResult};

/// Plaintext bytes per chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// AES-GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// Derive the nonce for chunk `counter`
pub fn chunk_nonce(base: &[u8; NONCE_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (byte, c) in nonce[NONCE_SIZE - 8..]
        .iter_mut()
        .zip(counter.to_be_bytes())
    {
        *byte ^= c;
    }
    nonce
}

/// Exact size of the stored stream (header included) for a plaintext length
pub fn encrypted_size(plain_len: u64) -> u64 {
    let chunks = plain_len.div_ceil(CHUNK_SIZE as u64);
    HEADER_LEN as u64 + plain_len + chunks * TAG_SIZE as u64
}

fn new_cipher(key: &DerivedKey) -> DvomResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| DvomError::Encryption(format!("Failed to create cipher: {}", e)))
}

/// Fill `buf` from `reader`, coalescing short reads; returns bytes read
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypting reader: yields sealed chunks of the wrapped plaintext
///
/// The header is not part of this stream; callers write it first.
pub struct EncryptReader<R> {
    inner: R,
    cipher: Aes256Gcm,
    base_nonce: [u8; NONCE_SIZE],
    counter: u64,
    plain: Zeroizing<Vec<u8>>,
    sealed: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> EncryptReader<R> {
    pub fn new(inner: R, key: &DerivedKey, base_nonce: [u8; NONCE_SIZE]) -> DvomResult<Self> {
        Ok(Self {
            inner,
            cipher: new_cipher(key)?,
            base_nonce,
            counter: 0,
            plain: Zeroizing::new(vec![0u8; CHUNK_SIZE]),
            sealed: Vec::with_capacity(CHUNK_SIZE + TAG_SIZE),
            pos: 0,
            eof: false,
        })
    }

    /// Seal the next chunk; returns false at end of stream
    fn next_chunk(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let n = fill(&mut self.inner, &mut self.plain)?;
        if n < CHUNK_SIZE {
            self.eof = true;
        }
        if n == 0 {
            return Ok(false);
        }

        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        self.counter = self.counter.checked_add(1).ok_or_else(|| {
            DvomError::Encryption("chunk counter exhausted".into()).into_io()
        })?;
        self.sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), &self.plain[..n])
            .map_err(|e| DvomError::Encryption(format!("Encryption failed: {}", e)).into_io())?;
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for EncryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.sealed.len() && !self.next_chunk()? {
            return Ok(0);
        }
        let n = buf.len().min(self.sealed.len() - self.pos);
        buf[..n].copy_from_slice(&self.sealed[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Decrypting reader: verifies and opens each sealed chunk
///
/// After the first failed chunk the reader is poisoned and every further
/// read returns the same authentication error. Plaintext of a chunk is only
/// released once its tag has verified.
pub struct DecryptReader<R> {
    inner: R,
    cipher: Aes256Gcm,
    base_nonce: [u8; NONCE_SIZE],
    counter: u64,
    sealed: Vec<u8>,
    plain: Zeroizing<Vec<u8>>,
    pos: usize,
    eof: bool,
    failure: Option<String>,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, key: &DerivedKey, base_nonce: [u8; NONCE_SIZE]) -> DvomResult<Self> {
        Ok(Self {
            inner,
            cipher: new_cipher(key)?,
            base_nonce,
            counter: 0,
            sealed: vec![0u8; CHUNK_SIZE + TAG_SIZE],
            plain: Zeroizing::new(Vec::new()),
            pos: 0,
            eof: false,
            failure: None,
        })
    }

    fn fail(&mut self, message: String) -> io::Error {
        self.failure = Some(message.clone());
        DvomError::Authentication(message).into_io()
    }

    fn next_chunk(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let n = fill(&mut self.inner, &mut self.sealed)?;
        if n < self.sealed.len() {
            self.eof = true;
        }
        if n == 0 {
            return Ok(false);
        }
        if n <= TAG_SIZE {
            return Err(self.fail(format!(
                "Decryption failed: chunk {} is truncated",
                self.counter
            )));
        }

        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        match self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), &self.sealed[..n])
        {
            Ok(plain) => {
                self.plain = Zeroizing::new(plain);
                self.pos = 0;
            }
            Err(_) => {
                return Err(self.fail(format!(
                    "Decryption failed: invalid password or corrupted data (chunk {})",
                    self.counter
                )));
            }
        }
        self.counter = self.counter.checked_add(1).ok_or_else(|| {
            DvomError::Encryption("chunk counter exhausted".into()).into_io()
        })?;
        Ok(true)
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(message) = &self.failure {
            return Err(DvomError::Authentication(message.clone()).into_io());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.plain.len() && !self.next_chunk()? {
            return Ok(0);
        }
        let n = buf.len().min(self.plain.len() - self.pos);
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Start encrypting `reader` under a fresh header derived from `password`
///
/// Returns the ciphertext stream (without the header) and the header the
/// caller must write in front of it.
pub fn encrypt<R: Read>(
    reader: R,
    password: &str,
) -> DvomResult<(EncryptReader<R>, EncryptionHeader)> {
    let header = EncryptionHeader::generate();
    let key = derive_key(password, &header.salt);
    let stream = EncryptReader::new(reader, &key, header.nonce)?;
    Ok((stream, header))
}

/// Decrypt a ciphertext stream positioned just after its header
pub fn decrypt<R: Read>(
    reader: R,
    password: &str,
    header: &EncryptionHeader,
) -> DvomResult<DecryptReader<R>> {
    let key = derive_key(password, &header.salt);
    DecryptReader::new(reader, &key, header.nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::header::{self, Peeked};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::OnceLock;

    /// PBKDF2 is slow by design; derive one key for the key-level tests
    fn test_key() -> &'static DerivedKey {
        static KEY: OnceLock<DerivedKey> = OnceLock::new();
        KEY.get_or_init(|| derive_key("correct horse", &[7u8; 32]))
    }

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    fn seal(data: &[u8], key: &DerivedKey, nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
        let mut out = Vec::new();
        EncryptReader::new(data, key, nonce)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn open(sealed: &[u8], key: &DerivedKey, nonce: [u8; NONCE_SIZE]) -> DvomResult<Vec<u8>> {
        let mut reader = DecryptReader::new(sealed, key, nonce)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Reader that hands out at most `step` bytes per call
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_round_trip_with_password() {
        let data = pseudo_random(3 * CHUNK_SIZE + 1234, 42);

        let (cipher, header) = encrypt(&data[..], "pw1").unwrap();
        let mut stored = header.to_bytes().to_vec();
        let mut cipher = cipher;
        cipher.read_to_end(&mut stored).unwrap();
        assert_eq!(stored.len() as u64, encrypted_size(data.len() as u64));

        let mut input = &stored[..];
        let parsed = EncryptionHeader::read_from(&mut input).unwrap();
        let mut plain = Vec::new();
        decrypt(input, "pw1", &parsed)
            .unwrap()
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn test_wrong_password_is_authentication_error() {
        let data = pseudo_random(1000, 1);
        let (mut cipher, header) = encrypt(&data[..], "right").unwrap();
        let mut body = Vec::new();
        cipher.read_to_end(&mut body).unwrap();

        let mut reader = decrypt(&body[..], "wrong", &header).unwrap();
        let err: DvomError = reader.read_to_end(&mut Vec::new()).unwrap_err().into();
        assert!(err.is_authentication());
    }

    #[test]
    fn test_flipped_salt_is_authentication_error() {
        let data = pseudo_random(500, 5);
        let (mut cipher, header) = encrypt(&data[..], "pw").unwrap();
        let mut stored = header.to_bytes().to_vec();
        cipher.read_to_end(&mut stored).unwrap();
        stored[20] ^= 0x01;

        let mut input = &stored[..];
        let parsed = EncryptionHeader::read_from(&mut input).unwrap();
        let err: DvomError = decrypt(input, "pw", &parsed)
            .unwrap()
            .read_to_end(&mut Vec::new())
            .unwrap_err()
            .into();
        assert!(err.is_authentication());
    }

    #[test]
    fn test_flipped_byte_anywhere_in_body_fails() {
        let key = test_key();
        let nonce = [3u8; NONCE_SIZE];
        let data = pseudo_random(2 * CHUNK_SIZE + 77, 9);
        let sealed = seal(&data, key, nonce);

        let positions = (0..sealed.len()).step_by(4099).chain([sealed.len() - 1]);
        for pos in positions {
            let mut tampered = sealed.clone();
            tampered[pos] ^= 0x80;
            let err = open(&tampered, key, nonce).unwrap_err();
            assert!(err.is_authentication(), "byte {} not detected", pos);
        }
    }

    #[test]
    fn test_flipped_nonce_fails() {
        let key = test_key();
        let data = pseudo_random(100, 2);
        let sealed = seal(&data, key, [1u8; NONCE_SIZE]);
        let mut other = [1u8; NONCE_SIZE];
        other[0] ^= 0x01;
        assert!(open(&sealed, key, other).unwrap_err().is_authentication());
    }

    #[test]
    fn test_failed_reader_stays_poisoned() {
        let key = test_key();
        let nonce = [4u8; NONCE_SIZE];
        let mut sealed = seal(&pseudo_random(CHUNK_SIZE * 2, 3), key, nonce);
        sealed[10] ^= 0x01;

        let mut reader = DecryptReader::new(&sealed[..], key, nonce).unwrap();
        let mut buf = [0u8; 1024];
        assert!(reader.read(&mut buf).is_err());
        let second: DvomError = reader.read(&mut buf).unwrap_err().into();
        assert!(second.is_authentication());
    }

    #[test]
    fn test_tampered_second_chunk_releases_only_first() {
        let key = test_key();
        let nonce = [5u8; NONCE_SIZE];
        let data = pseudo_random(CHUNK_SIZE + 100, 11);
        let mut sealed = seal(&data, key, nonce);
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        let mut reader = DecryptReader::new(&sealed[..], key, nonce).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
        assert_eq!(out, &data[..CHUNK_SIZE]);
    }

    #[test]
    fn test_truncated_tail_is_detected() {
        let key = test_key();
        let nonce = [6u8; NONCE_SIZE];
        let sealed = seal(&pseudo_random(CHUNK_SIZE + 500, 12), key, nonce);

        let cut = &sealed[..sealed.len() - 10];
        assert!(open(cut, key, nonce).unwrap_err().is_authentication());
    }

    #[test]
    fn test_empty_plaintext_is_header_only() {
        let (mut cipher, header) = encrypt(&b""[..], "pw").unwrap();
        let mut body = Vec::new();
        cipher.read_to_end(&mut body).unwrap();
        assert!(body.is_empty());
        assert_eq!(encrypted_size(0), HEADER_LEN as u64);

        let mut plain = Vec::new();
        decrypt(&body[..], "pw", &header)
            .unwrap()
            .read_to_end(&mut plain)
            .unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn test_short_reads_produce_full_chunks() {
        let key = test_key();
        let nonce = [8u8; NONCE_SIZE];
        let data = pseudo_random(2 * CHUNK_SIZE + 5, 13);

        let mut sealed = Vec::new();
        EncryptReader::new(Trickle { data: &data, step: 1000 }, key, nonce)
            .unwrap()
            .read_to_end(&mut sealed)
            .unwrap();

        assert_eq!(sealed, seal(&data, key, nonce));
        assert_eq!(sealed.len(), data.len() + 3 * TAG_SIZE);
        assert_eq!(open(&sealed, key, nonce).unwrap(), data);
    }

    #[test]
    fn test_exact_chunk_multiple_has_no_empty_trailer() {
        let key = test_key();
        let nonce = [2u8; NONCE_SIZE];
        let data = pseudo_random(2 * CHUNK_SIZE, 14);
        let sealed = seal(&data, key, nonce);
        assert_eq!(sealed.len(), 2 * (CHUNK_SIZE + TAG_SIZE));
        assert_eq!(open(&sealed, key, nonce).unwrap(), data);
    }

    #[test]
    fn test_chunk_nonce_layout() {
        let base = [0u8; NONCE_SIZE];
        assert_eq!(chunk_nonce(&base, 0), base);
        let n = chunk_nonce(&base, 0x0102);
        assert_eq!(&n[..4], &[0, 0, 0, 0]);
        assert_eq!(&n[10..], &[0x01, 0x02]);
    }

    #[test]
    fn test_first_chunk_nonces_are_distinct() {
        let base = [0xA5u8; NONCE_SIZE];
        let nonces: HashSet<[u8; NONCE_SIZE]> =
            (0..100_000u64).map(|i| chunk_nonce(&base, i)).collect();
        assert_eq!(nonces.len(), 100_000);
    }

    #[test]
    fn test_is_encrypted_after_header_write() {
        let header = EncryptionHeader::generate();
        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        assert!(header::is_encrypted(&out));
        assert!(matches!(header::peek(&out[..]).unwrap(), Peeked::Encrypted(..)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip(len in 0usize..(3 * CHUNK_SIZE), seed: u64, nonce: [u8; NONCE_SIZE]) {
            let key = test_key();
            let data = pseudo_random(len, seed);
            let sealed = seal(&data, key, nonce);
            prop_assert_eq!(sealed.len() as u64 + HEADER_LEN as u64, encrypted_size(len as u64));
            prop_assert_eq!(open(&sealed, key, nonce).unwrap(), data);
        }

        #[test]
        fn prop_distinct_counters_distinct_nonces(base: [u8; NONCE_SIZE], a: u64, b: u64) {
            prop_assume!(a != b);
            prop_assert_ne!(chunk_nonce(&base, a), chunk_nonce(&base, b));
        }
    }
}
