//! Encrypted at-rest blob storage.
//!
//! Each blob is a file encrypted with AES-256-CTR under a zero IV. The key
//! is `HMAC-SHA256(attachment_secret, random)`, with `random` chosen per blob
//! and stored next to the file path in the owning row, so no two blobs share
//! a keystream.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::traits::{BlobStore, NewBlob};
use crate::crypto::stream::Aes256Ctr;
use crate::error::{BackupError, Result};

/// Length of the attachment secret and of each blob's random value.
pub const SECRET_LENGTH: usize = 32;

const CREATE_ATTEMPTS: usize = 8;

/// Blob store that encrypts every file under a per-blob key.
pub struct EncryptedBlobStore {
    dir: PathBuf,
    secret: Zeroizing<[u8; SECRET_LENGTH]>,
}

impl EncryptedBlobStore {
    pub fn new(dir: impl Into<PathBuf>, secret: [u8; SECRET_LENGTH]) -> Self {
        Self {
            dir: dir.into(),
            secret: Zeroizing::new(secret),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cipher_for(&self, random: &[u8]) -> Result<Aes256Ctr> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.secret.as_slice())
            .map_err(|e| BackupError::Crypto(format!("HMAC init failed: {}", e)))?;
        mac.update(random);
        let mut key = Zeroizing::new([0u8; SECRET_LENGTH]);
        key.copy_from_slice(&mac.finalize().into_bytes());
        let iv = [0u8; 16];
        Ok(Aes256Ctr::new((&*key).into(), (&iv).into()))
    }
}

impl BlobStore for EncryptedBlobStore {
    fn open(&self, path: &Path, random: &[u8]) -> Result<Box<dyn Read>> {
        let file = File::open(path)?;
        Ok(Box::new(DecryptingReader {
            inner: BufReader::new(file),
            cipher: self.cipher_for(random)?,
        }))
    }

    fn stored_length(&self, path: &Path) -> Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self) -> Result<NewBlob> {
        fs::create_dir_all(&self.dir)?;

        for _ in 0..CREATE_ATTEMPTS {
            let path = self.dir.join(format!("part{:016x}.mms", OsRng.next_u64()));
            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            let mut random = vec![0u8; SECRET_LENGTH];
            OsRng.fill_bytes(&mut random);
            let cipher = self.cipher_for(&random)?;

            return Ok(NewBlob {
                path,
                random,
                writer: Box::new(EncryptingWriter {
                    inner: BufWriter::new(file),
                    cipher,
                    buf: Vec::new(),
                }),
            });
        }

        Err(BackupError::Storage(format!(
            "Could not create a unique blob file in {}",
            self.dir.display()
        )))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn keystream_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(format!("Blob keystream failed: {}", e))
}

struct DecryptingReader<R: Read> {
    inner: R,
    cipher: Aes256Ctr,
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.cipher
            .try_apply_keystream(&mut buf[..read])
            .map_err(keystream_error)?;
        Ok(read)
    }
}

struct EncryptingWriter<W: Write> {
    inner: W,
    cipher: Aes256Ctr,
    buf: Vec<u8>,
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.buf.extend_from_slice(data);
        self.cipher
            .try_apply_keystream(&mut self.buf)
            .map_err(keystream_error)?;
        // The keystream has advanced past `data`, so all of it must be written.
        self.inner.write_all(&self.buf)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
