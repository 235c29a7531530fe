//! Shared fixtures for integration tests: in-memory release archives,
//! checksum manifests, deterministic signing keys and a mock release
//! server.

#![allow(dead_code)]

use std::ffi::OsString;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use ed25519_dalek::pkcs8::EncodePublicKey;
use pkcs8::LineEnding;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use updraft::process::ProcessHost;

pub const OWNER: &str = "acme";
pub const REPO: &str = "app";

/// Deterministic release signing key; tests that want an unrelated key
/// pick a different seed.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn release_signing_key() -> SigningKey {
    signing_key(42)
}

pub fn public_key_pem(key: &SigningKey) -> String {
    key.verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap()
}

/// Builds a zip archive in memory.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        if name.ends_with('/') {
            writer.add_directory(name.to_string(), options).unwrap();
        } else {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(content).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Builds a gzip-compressed tarball in memory.
pub fn build_tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// A release hosted on a local mock server, with checksum manifest and
/// detached signature.
pub struct MockRelease {
    pub server: mockito::ServerGuard,
    pub version: String,
    pub archive_name: String,
}

impl MockRelease {
    /// Serves `archive` as the given version: the release index under
    /// `/index`, the archive and its signed `SHA256SUMS` under the
    /// expected download path.
    pub fn serve(version: &str, archive_name: &str, archive: &[u8]) -> Self {
        Self::serve_with(version, archive_name, archive, &release_signing_key(), None)
    }

    /// Like [`MockRelease::serve`], but with a custom signing key and an
    /// optional override for the manifest contents (to simulate
    /// tampering).
    pub fn serve_with(
        version: &str,
        archive_name: &str,
        archive: &[u8],
        key: &SigningKey,
        manifest_override: Option<&str>,
    ) -> Self {
        let mut server = mockito::Server::new();

        let download_path = format!("/{OWNER}/{REPO}/releases/download/v{version}");
        let manifest = manifest_override
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} *{archive_name}\n", sha256_hex(archive)));
        let signature = key.sign(manifest.as_bytes()).to_bytes().to_vec();

        server
            .mock("GET", format!("{download_path}/{archive_name}").as_str())
            .with_status(200)
            .with_body(archive)
            .create();
        server
            .mock("GET", format!("{download_path}/SHA256SUMS").as_str())
            .with_status(200)
            .with_body(manifest)
            .create();
        server
            .mock("GET", format!("{download_path}/SHA256SUMS.sig").as_str())
            .with_status(200)
            .with_body(signature)
            .create();

        let index = format!(
            r#"{{
                "tag_name": "v{version}",
                "assets": [
                    {{"name": "{archive_name}",
                      "browser_download_url": "{url}{download_path}/{archive_name}"}}
                ]
            }}"#,
            url = server.url()
        );
        server
            .mock("GET", "/index")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(index)
            .create();

        Self {
            server,
            version: version.to_string(),
            archive_name: archive_name.to_string(),
        }
    }

    pub fn index_url(&self) -> String {
        format!("{}/index", self.server.url())
    }
}

/// Process collaborator that records calls instead of touching real
/// processes.
#[derive(Default)]
pub struct RecordingProcessHost {
    pub started: Mutex<Vec<(PathBuf, Vec<OsString>)>>,
    pub terminated: Mutex<Vec<PathBuf>>,
}

impl ProcessHost for RecordingProcessHost {
    fn start_detached(&self, executable: &Path, args: &[OsString]) -> anyhow::Result<()> {
        self.started
            .lock()
            .unwrap()
            .push((executable.to_path_buf(), args.to_vec()));
        Ok(())
    }

    fn terminate_under(&self, dir: &Path, _timeout: Duration) -> anyhow::Result<()> {
        self.terminated.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }
}
