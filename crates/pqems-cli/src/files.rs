use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use color_eyre::{eyre::eyre, Result};
use tempfile::NamedTempFile;
use tracing::info;

use crate::context::AppContext;

/// Encrypt `input` into `output`, generating a key pair on first use.
pub async fn encrypt(ctx: &AppContext, input: &Path, output: &Path) -> Result<()> {
    ctx.keys().ensure_keypair().await.map_err(|e| eyre!(e))?;
    let data = fs::read(input).map_err(|e| eyre!("reading {}: {e}", input.display()))?;
    ctx.pipeline()
        .write(output, &data)
        .await
        .map_err(|e| eyre!(e))?;
    info!(input = %input.display(), output = %output.display(), "file encrypted");
    Ok(())
}

/// Decrypt `input` and write the plaintext to `output` atomically.
pub async fn decrypt(ctx: &AppContext, input: &Path, output: &Path) -> Result<()> {
    let data = ctx.pipeline().read(input).await.map_err(|e| eyre!(e))?;
    write_atomic(output, &data)?;
    info!(input = %input.display(), output = %output.display(), "file decrypted");
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| eyre!(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, storage};

    #[tokio::test]
    async fn encrypt_then_decrypt_restores_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = AppContext::with_backend(
            &Config::default(),
            storage::test_backend(dir.path().join("keys")),
        );
        let plain = dir.path().join("notes.txt");
        let sealed = dir.path().join("notes.pqem");
        let restored = dir.path().join("out").join("notes.txt");
        fs::write(&plain, b"meeting at noon").expect("write input");

        encrypt(&ctx, &plain, &sealed).await.expect("encrypt");
        assert_ne!(fs::read(&sealed).expect("sealed"), b"meeting at noon");

        decrypt(&ctx, &sealed, &restored).await.expect("decrypt");
        assert_eq!(fs::read(&restored).expect("restored"), b"meeting at noon");
    }

    #[tokio::test]
    async fn decrypt_after_key_deletion_fails_without_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = AppContext::with_backend(
            &Config::default(),
            storage::test_backend(dir.path().join("keys")),
        );
        let plain = dir.path().join("a.txt");
        let sealed = dir.path().join("a.pqem");
        let restored = dir.path().join("a.out");
        fs::write(&plain, b"gone").expect("write input");

        encrypt(&ctx, &plain, &sealed).await.expect("encrypt");
        ctx.keys().delete_keys().await.expect("delete");

        assert!(decrypt(&ctx, &sealed, &restored).await.is_err());
        assert!(!restored.exists());
    }

    #[tokio::test]
    async fn missing_input_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = AppContext::with_backend(
            &Config::default(),
            storage::test_backend(dir.path().join("keys")),
        );
        let err = encrypt(&ctx, &dir.path().join("nope"), &dir.path().join("out"))
            .await
            .expect_err("missing input");
        assert!(err.to_string().contains("nope"));
    }
}
