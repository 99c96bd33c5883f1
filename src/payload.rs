use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use getrandom::fill;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{ContainerError, Result};

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const DATA_KEY_SIZE: usize = 32;

/// `[salt(16)][wrap_nonce(12)][wrapped_data_key(32)][wrap_tag(16)]`, the blob
/// handed to the Metadata Store Adapter as `Sets.storage_data` (§4.2/§6).
const SETTINGS_LEN: usize = SALT_SIZE + NONCE_SIZE + DATA_KEY_SIZE + TAG_SIZE;

/// Encrypted, random-access byte storage addressed by absolute offset (C2).
///
/// Plaintext is divided into `frame_size`-byte frames (one per cluster, since
/// clusters are the allocator's unit of physical range); each frame is
/// stored on disk as `[nonce(12)][ciphertext(frame_size)][tag(16)]`, with the
/// frame index bound in as AEAD associated data so frames can't be silently
/// reordered. Reads/writes that don't land on a frame boundary decrypt or
/// re-encrypt the whole covering frame — the tag only verifies over the
/// complete frame, not a sub-range of it.
pub(crate) struct PayloadStore {
    file: File,
    frame_size: u32,
    salt: [u8; SALT_SIZE],
    wrap_nonce: [u8; NONCE_SIZE],
    wrapped_data_key: [u8; DATA_KEY_SIZE],
    wrap_tag: [u8; TAG_SIZE],
    data_key: Zeroizing<[u8; DATA_KEY_SIZE]>,
}

impl PayloadStore {
    pub(crate) fn create(path: &Path, password: &str, frame_size: u32) -> Result<Self> {
        if path.exists() {
            return Err(ContainerError::AlreadyExists);
        }
        let file = OpenOptions::new().read(true).write(true).create_new(true).open(path)?;

        let mut salt = [0u8; SALT_SIZE];
        fill(&mut salt).map_err(|_| ContainerError::CantAllocMemory)?;
        let mut data_key = Zeroizing::new([0u8; DATA_KEY_SIZE]);
        fill(&mut *data_key).map_err(|_| ContainerError::CantAllocMemory)?;

        let (wrap_nonce, wrapped_data_key, wrap_tag) = Self::wrap_key(password, &salt, &data_key)?;

        Ok(Self { file, frame_size, salt, wrap_nonce, wrapped_data_key, wrap_tag, data_key })
    }

    pub(crate) fn open(
        path: &Path,
        password: &str,
        settings_blob: &[u8],
        frame_size: u32,
    ) -> Result<Self> {
        if !path.exists() {
            return Err(ContainerError::NotFound);
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        if settings_blob.len() != SETTINGS_LEN {
            return Err(ContainerError::IsDamaged);
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&settings_blob[0..SALT_SIZE]);
        let mut wrap_nonce = [0u8; NONCE_SIZE];
        wrap_nonce.copy_from_slice(&settings_blob[SALT_SIZE..SALT_SIZE + NONCE_SIZE]);
        let mut wrapped_data_key = [0u8; DATA_KEY_SIZE];
        wrapped_data_key.copy_from_slice(
            &settings_blob[SALT_SIZE + NONCE_SIZE..SALT_SIZE + NONCE_SIZE + DATA_KEY_SIZE],
        );
        let mut wrap_tag = [0u8; TAG_SIZE];
        wrap_tag.copy_from_slice(&settings_blob[SALT_SIZE + NONCE_SIZE + DATA_KEY_SIZE..]);

        let data_key = Self::unwrap_key(password, &salt, &wrap_nonce, &wrapped_data_key, &wrap_tag)?;

        Ok(Self { file, frame_size, salt, wrap_nonce, wrapped_data_key, wrap_tag, data_key })
    }

    /// Derives the password-bound key-encryption-key via HKDF-SHA256.
    fn derive_kek(password: &str, salt: &[u8; SALT_SIZE]) -> Zeroizing<[u8; DATA_KEY_SIZE]> {
        let (_, hk) = Hkdf::<Sha256>::extract(Some(salt.as_slice()), password.as_bytes());
        let mut kek = Zeroizing::new([0u8; DATA_KEY_SIZE]);
        hk.expand(b"vaultfs-kek-v1", &mut *kek).expect("32 bytes is a valid HKDF output length");
        kek
    }

    fn wrap_key(
        password: &str,
        salt: &[u8; SALT_SIZE],
        data_key: &[u8; DATA_KEY_SIZE],
    ) -> Result<([u8; NONCE_SIZE], [u8; DATA_KEY_SIZE], [u8; TAG_SIZE])> {
        let kek = Self::derive_kek(password, salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*kek));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        fill(&mut nonce_bytes).map_err(|_| ContainerError::CantAllocMemory)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, data_key.as_slice())
            .map_err(|_| ContainerError::Internal("key wrap failed".into()))?;
        let (ciphertext, tag) = sealed.split_at(DATA_KEY_SIZE);

        let mut wrapped = [0u8; DATA_KEY_SIZE];
        wrapped.copy_from_slice(ciphertext);
        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag);
        Ok((nonce_bytes, wrapped, tag_bytes))
    }

    fn unwrap_key(
        password: &str,
        salt: &[u8; SALT_SIZE],
        wrap_nonce: &[u8; NONCE_SIZE],
        wrapped_data_key: &[u8; DATA_KEY_SIZE],
        wrap_tag: &[u8; TAG_SIZE],
    ) -> Result<Zeroizing<[u8; DATA_KEY_SIZE]>> {
        let kek = Self::derive_kek(password, salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*kek));
        let nonce = Nonce::from_slice(wrap_nonce);

        let mut sealed = Vec::with_capacity(DATA_KEY_SIZE + TAG_SIZE);
        sealed.extend_from_slice(wrapped_data_key);
        sealed.extend_from_slice(wrap_tag);

        let plain = cipher.decrypt(nonce, sealed.as_slice()).map_err(|_| ContainerError::NoAccess)?;
        let mut data_key = Zeroizing::new([0u8; DATA_KEY_SIZE]);
        data_key.copy_from_slice(&plain);
        Ok(data_key)
    }

    /// Serialized settings blob for `Sets.storage_data`.
    pub(crate) fn get_data_to_save(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(SETTINGS_LEN);
        blob.extend_from_slice(&self.salt);
        blob.extend_from_slice(&self.wrap_nonce);
        blob.extend_from_slice(&self.wrapped_data_key);
        blob.extend_from_slice(&self.wrap_tag);
        blob
    }

    pub(crate) fn reset_password(&mut self, new_password: &str) -> Result<()> {
        let (wrap_nonce, wrapped_data_key, wrap_tag) =
            Self::wrap_key(new_password, &self.salt, &self.data_key)?;
        self.wrap_nonce = wrap_nonce;
        self.wrapped_data_key = wrapped_data_key;
        self.wrap_tag = wrap_tag;
        Ok(())
    }

    pub(crate) fn clear_data(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        Ok(())
    }

    fn frame_disk_size(&self) -> u64 {
        NONCE_SIZE as u64 + self.frame_size as u64 + TAG_SIZE as u64
    }

    pub(crate) fn size(&self) -> Result<u64> {
        let raw_len = self.file.metadata()?.len();
        Ok((raw_len / self.frame_disk_size()) * self.frame_size as u64)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.data_key))
    }

    fn read_frame(&self, frame_index: u64) -> Result<Vec<u8>> {
        let disk_offset = frame_index * self.frame_disk_size();
        let mut raw = vec![0u8; self.frame_disk_size() as usize];
        self.file.read_exact_at(&mut raw, disk_offset)?;

        let (nonce_bytes, rest) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let aad = frame_index.to_le_bytes();

        self.cipher()
            .decrypt(nonce, Payload { msg: rest, aad: &aad })
            .map_err(|_| ContainerError::IsDamaged)
    }

    fn write_frame(&mut self, frame_index: u64, plaintext: &[u8]) -> Result<()> {
        debug_assert_eq!(plaintext.len(), self.frame_size as usize);

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        fill(&mut nonce_bytes).map_err(|_| ContainerError::CantAllocMemory)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = frame_index.to_le_bytes();

        let ciphertext = self
            .cipher()
            .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
            .map_err(|_| ContainerError::Internal("frame encryption failed".into()))?;

        let disk_offset = frame_index * self.frame_disk_size();
        let mut raw = Vec::with_capacity(self.frame_disk_size() as usize);
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);
        self.file.write_all_at(&raw, disk_offset)?;
        Ok(())
    }

    pub(crate) fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let size = self.size()?;
        if offset + len > size {
            return Err(ContainerError::WrongParameters(format!(
                "read range [{offset}, {}) exceeds payload size {size}",
                offset + len
            )));
        }

        let frame_size = self.frame_size as u64;
        let mut out = Vec::with_capacity(len as usize);
        let mut remaining = len;
        let mut cursor = offset;

        while remaining > 0 {
            let frame_index = cursor / frame_size;
            let frame_offset = (cursor % frame_size) as usize;
            let frame = self.read_frame(frame_index)?;
            let take = ((frame_size as usize - frame_offset) as u64).min(remaining) as usize;
            out.extend_from_slice(&frame[frame_offset..frame_offset + take]);
            cursor += take as u64;
            remaining -= take as u64;
        }

        Ok(out)
    }

    pub(crate) fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let size = self.size()?;
        if offset + bytes.len() as u64 > size {
            return Err(ContainerError::WrongParameters(format!(
                "write range [{offset}, {}) exceeds payload size {size}; use append",
                offset + bytes.len() as u64
            )));
        }

        let frame_size = self.frame_size as u64;
        let mut remaining = bytes;
        let mut cursor = offset;

        while !remaining.is_empty() {
            let frame_index = cursor / frame_size;
            let frame_offset = (cursor % frame_size) as usize;
            let take = ((frame_size as usize - frame_offset)).min(remaining.len());

            let mut frame = if frame_offset == 0 && take == frame_size as usize {
                vec![0u8; frame_size as usize]
            } else {
                self.read_frame(frame_index)?
            };
            frame[frame_offset..frame_offset + take].copy_from_slice(&remaining[..take]);
            self.write_frame(frame_index, &frame)?;

            cursor += take as u64;
            remaining = &remaining[take..];
        }

        Ok(())
    }

    /// Appends `bytes` at the current end of the payload, returning the
    /// offset it was written at. `bytes.len()` must be a multiple of the
    /// frame size — the only caller is the Stream Allocator, which always
    /// reserves whole clusters.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let frame_size = self.frame_size as usize;
        if bytes.len() % frame_size != 0 {
            return Err(ContainerError::Internal(
                "payload append length must be a multiple of the frame size".into(),
            ));
        }

        let start = self.size()?;
        for (i, chunk) in bytes.chunks(frame_size).enumerate() {
            let frame_index = start / self.frame_size as u64 + i as u64;
            self.write_frame(frame_index, chunk)?;
        }
        Ok(start)
    }
}
