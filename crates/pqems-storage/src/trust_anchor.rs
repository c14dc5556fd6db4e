//! Hardware trust anchor access.
//!
//! The TPM is driven through the `tpm2-tools` command line suite: random bytes
//! come from `tpm2_getrandom`, and the key-encryption key lives in an
//! owner-protected NV index (`tpm2_nvdefine` / `tpm2_nvwrite` / `tpm2_nvread`).

use std::{
    io::Write,
    process::{Command, Stdio},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::key_provider::{run_blocking, KeyError, KeyMaterial, KeyProvider, KEY_LEN};

/// NV index used when none is configured.
pub const DEFAULT_NV_INDEX: u32 = 0x0150_0016;

/// A hardware root of protection able to produce randomness and hold one
/// small sealed secret.
pub trait TrustAnchor: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Draw `len` random bytes from the device.
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, KeyError>;

    /// Read the sealed secret, `None` when it was never written.
    fn read_sealed(&self, len: usize) -> Result<Option<Vec<u8>>, KeyError>;

    /// Seal a secret into the device.
    fn write_sealed(&self, data: &[u8]) -> Result<(), KeyError>;
}

/// TPM 2.0 reached through `tpm2-tools`.
#[derive(Debug, Clone)]
pub struct Tpm2Tools {
    nv_index: u32,
}

impl Tpm2Tools {
    pub fn new(nv_index: u32) -> Self {
        Self { nv_index }
    }

    fn index_arg(&self) -> String {
        format!("{:#x}", self.nv_index)
    }

    fn run(&self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>, KeyError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KeyError::Unavailable(format!("{program}: {e}")))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .map_err(|e| KeyError::Unavailable(format!("{program}: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| KeyError::Unavailable(format!("{program}: {e}")))?;
        if !output.status.success() {
            return Err(KeyError::Unavailable(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    fn index_defined(&self) -> Result<bool, KeyError> {
        let listing = self.run("tpm2_nvreadpublic", &[], None)?;
        let marker = format!("{}:", self.index_arg());
        Ok(String::from_utf8_lossy(&listing)
            .lines()
            .any(|line| line.trim_start().starts_with(&marker)))
    }
}

impl Default for Tpm2Tools {
    fn default() -> Self {
        Self::new(DEFAULT_NV_INDEX)
    }
}

impl TrustAnchor for Tpm2Tools {
    fn name(&self) -> &'static str {
        "tpm2"
    }

    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, KeyError> {
        let bytes = self.run("tpm2_getrandom", &[&len.to_string()], None)?;
        if bytes.len() != len {
            return Err(KeyError::Unavailable(format!(
                "tpm2_getrandom returned {} bytes, expected {len}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    fn read_sealed(&self, len: usize) -> Result<Option<Vec<u8>>, KeyError> {
        if !self.index_defined()? {
            return Ok(None);
        }
        let index = self.index_arg();
        let size = len.to_string();
        let bytes = self.run("tpm2_nvread", &[&index, "-C", "o", "-s", &size], None)?;
        Ok(Some(bytes))
    }

    fn write_sealed(&self, data: &[u8]) -> Result<(), KeyError> {
        let index = self.index_arg();
        let size = data.len().to_string();
        if !self.index_defined()? {
            self.run(
                "tpm2_nvdefine",
                &[&index, "-C", "o", "-s", &size, "-a", "ownerread|ownerwrite"],
                None,
            )?;
        }
        self.run("tpm2_nvwrite", &[&index, "-C", "o", "-i", "-"], Some(data))?;
        Ok(())
    }
}

/// Key provider sealing the key-encryption key inside a trust anchor. The key
/// is drawn from the anchor's own RNG on first use and cached afterwards.
/// Device calls run on the blocking pool.
pub struct TpmKeyProvider<A: TrustAnchor> {
    anchor: Arc<A>,
    cached: Mutex<Option<KeyMaterial>>,
}

impl<A: TrustAnchor> TpmKeyProvider<A> {
    pub fn new(anchor: A) -> Self {
        Self {
            anchor: Arc::new(anchor),
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<A: TrustAnchor + 'static> KeyProvider for TpmKeyProvider<A> {
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError> {
        let mut cached = self.cached.lock().await;
        if let Some(existing) = cached.as_ref() {
            return Ok(Some(existing.clone()));
        }

        let anchor = Arc::clone(&self.anchor);
        let Some(bytes) = run_blocking(move || anchor.read_sealed(KEY_LEN)).await? else {
            return Ok(None);
        };
        let material = KeyMaterial::from_slice(self.anchor.name(), &bytes)?;
        *cached = Some(material.clone());
        Ok(Some(material))
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut cached = self.cached.lock().await;
        if let Some(existing) = cached.as_ref() {
            return Ok(existing.clone());
        }

        let anchor = Arc::clone(&self.anchor);
        let material = run_blocking(move || {
            let id = anchor.name();
            match anchor.read_sealed(KEY_LEN)? {
                Some(bytes) => KeyMaterial::from_slice(id, &bytes),
                None => {
                    info!(anchor = id, "sealing new key-encryption key");
                    let bytes = anchor.random_bytes(KEY_LEN)?;
                    let material = KeyMaterial::from_slice(id, &bytes)?;
                    anchor.write_sealed(&material.bytes)?;
                    Ok(material)
                }
            }
        })
        .await?;
        debug!(anchor = self.anchor.name(), "key-encryption key ready");
        *cached = Some(material.clone());
        Ok(material)
    }
}
