//! Screenshot object storage: local filesystem with HMAC-presigned URLs, and an
//! in-memory store for development.

use crate::config::StorageConfig;
use crate::error::{CollaboratorError, Result};
use crate::services::collaborators::{CollaboratorResult, ScreenshotStorage};
use crate::signing::HmacSigner;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const SERVICE: &str = "object-store";

/// File extension for a declared content type, `jpg` when unknown
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

/// Content type served back for a stored object
pub fn content_type_for(object_name: &str) -> &'static str {
    match Path::new(object_name).extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Path segments must be plain names: no separators, no dot-prefixed names
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn rejected(reason: impl Into<String>) -> CollaboratorError {
    CollaboratorError::Rejected {
        service: SERVICE,
        reason: reason.into(),
    }
}

/// Directory segment for a catalog. Hex keeps any catalog id a plain name.
pub fn catalog_dir(catalog_id: &str) -> String {
    hex::encode(catalog_id.as_bytes())
}

/// Catalog id an object was stored under, if the name is well formed
pub fn catalog_id_of(object_name: &str) -> Option<String> {
    let (dir, _) = object_name.split_once('/')?;
    let bytes = hex::decode(dir).ok()?;
    String::from_utf8(bytes).ok()
}

fn new_object_name(catalog_id: &str, data: &[u8], content_type: &str) -> CollaboratorResult<String> {
    if catalog_id.is_empty() {
        return Err(rejected("empty catalog id"));
    }
    if data.is_empty() {
        return Err(rejected("empty object"));
    }
    Ok(format!(
        "{}/{}.{}",
        catalog_dir(catalog_id),
        Uuid::new_v4(),
        extension_for(content_type)
    ))
}

/// Objects written under a root directory, served through signed URLs
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
    signer: HmacSigner,
    url_expiry_secs: i64,
}

impl LocalObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: &str,
        signer: HmacSigner,
        url_expiry_secs: u64,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signer,
            url_expiry_secs: i64::try_from(url_expiry_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(
            &config.root_dir,
            &config.public_base_url,
            HmacSigner::new(&config.url_signing_secret)?,
            config.url_expiry_secs,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn signing_message(object_name: &str, expires: i64) -> String {
        format!("{object_name}:{expires}")
    }

    /// Signed URL for `object_name` expiring at `expires` (unix seconds)
    pub fn signed_url(&self, object_name: &str, expires: i64) -> Result<String> {
        let signature = self
            .signer
            .sign_hex(&Self::signing_message(object_name, expires))?;
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.public_base_url, object_name, expires, signature
        ))
    }

    /// Check a URL signature and its expiry
    pub fn verify(&self, object_name: &str, expires: i64, signature: &str) -> bool {
        expires > Utc::now().timestamp()
            && self
                .signer
                .verify_hex(&Self::signing_message(object_name, expires), signature)
    }

    fn object_path(&self, object_name: &str) -> CollaboratorResult<PathBuf> {
        let mut path = self.root.clone();
        let mut segments = 0;
        for segment in object_name.split('/') {
            if !is_safe_segment(segment) {
                return Err(rejected(format!("unsafe object name {object_name:?}")));
            }
            path.push(segment);
            segments += 1;
        }
        if segments != 2 {
            return Err(rejected(format!("unexpected object name {object_name:?}")));
        }
        Ok(path)
    }

    /// Read an object back, provided the URL signature checks out
    pub async fn read_signed(
        &self,
        object_name: &str,
        expires: i64,
        signature: &str,
    ) -> CollaboratorResult<Vec<u8>> {
        if !self.verify(object_name, expires, signature) {
            return Err(rejected("signature invalid or expired"));
        }
        let path = self.object_path(object_name)?;
        tokio::fs::read(&path).await.map_err(|e| io_failure(&path, e))
    }
}

fn io_failure(path: &Path, err: std::io::Error) -> CollaboratorError {
    CollaboratorError::Unreachable {
        service: SERVICE,
        reason: format!("{}: {}", path.display(), err),
    }
}

#[async_trait]
impl ScreenshotStorage for LocalObjectStore {
    async fn upload(
        &self,
        catalog_id: &str,
        data: &[u8],
        content_type: &str,
    ) -> CollaboratorResult<String> {
        let object_name = new_object_name(catalog_id, data, content_type)?;
        let path = self.object_path(&object_name)?;

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_failure(dir, e))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| io_failure(&path, e))?;

        debug!(%object_name, bytes = data.len(), "Stored screenshot");
        Ok(object_name)
    }

    async fn presigned_url(&self, object_name: &str) -> CollaboratorResult<String> {
        let expires = Utc::now().timestamp().saturating_add(self.url_expiry_secs);
        self.signed_url(object_name, expires)
            .map_err(|e| rejected(e.to_string()))
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Objects kept in memory; URLs are plain `{base}/{object}`
pub struct MemoryObjectStore {
    base_url: String,
    objects: DashMap<String, StoredObject>,
}

impl MemoryObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: DashMap::new(),
        }
    }

    pub fn get(&self, object_name: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .get(object_name)
            .map(|o| (o.data.clone(), o.content_type.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ScreenshotStorage for MemoryObjectStore {
    async fn upload(
        &self,
        catalog_id: &str,
        data: &[u8],
        content_type: &str,
    ) -> CollaboratorResult<String> {
        let object_name = new_object_name(catalog_id, data, content_type)?;
        self.objects.insert(
            object_name.clone(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(object_name)
    }

    async fn presigned_url(&self, object_name: &str) -> CollaboratorResult<String> {
        if !self.objects.contains_key(object_name) {
            return Err(rejected(format!("no such object {object_name}")));
        }
        Ok(format!("{}/{}", self.base_url, object_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(dir: &Path) -> LocalObjectStore {
        LocalObjectStore::new(
            dir,
            "http://localhost:8000/objects/",
            HmacSigner::new("url-secret-url-secret-url-secret!").unwrap(),
            3600,
        )
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("IMAGE/PNG; q=1"), "png");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/octet-stream"), "jpg");
        assert_eq!(content_type_for("cat/abc.webp"), "image/webp");
        assert_eq!(content_type_for("cat/abc"), "image/jpeg");
    }

    #[tokio::test]
    async fn test_local_upload_and_signed_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = local(dir.path());

        let name = store.upload("cat-1", b"pixels", "image/png").await.unwrap();
        assert!(name.starts_with(&format!("{}/", catalog_dir("cat-1"))) && name.ends_with(".png"));
        assert_eq!(catalog_id_of(&name).as_deref(), Some("cat-1"));
        assert!(dir.path().join(&name).exists());

        let url = store.presigned_url(&name).await.unwrap();
        assert!(url.starts_with(&format!("http://localhost:8000/objects/{name}?expires=")));

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0;
        let mut signature = "";
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v,
                _ => {}
            }
        }
        assert_eq!(store.read_signed(&name, expires, signature).await.unwrap(), b"pixels");
        assert!(store.read_signed(&name, expires + 1, signature).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_url_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = local(dir.path());
        let name = store.upload("cat-1", b"x", "image/jpeg").await.unwrap();
        let past = Utc::now().timestamp() - 1;
        let url = store.signed_url(&name, past).unwrap();
        let signature = url.rsplit_once("signature=").unwrap().1;
        assert!(!store.verify(&name, past, signature));
    }

    #[tokio::test]
    async fn test_any_catalog_id_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = local(dir.path());
        for catalog_id in ["imdb:tt0111161", "movie 42", "cat/1", "../etc", ".hidden", "ü?#"] {
            let name = store.upload(catalog_id, b"x", "image/png").await.unwrap();
            assert_eq!(name.split('/').count(), 2, "{catalog_id:?}");
            assert_eq!(catalog_id_of(&name).as_deref(), Some(catalog_id));
            assert!(dir.path().join(&name).starts_with(dir.path()));
            assert!(dir.path().join(&name).exists());
        }
    }

    #[tokio::test]
    async fn test_unsafe_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = local(dir.path());
        assert!(store.upload("", b"x", "image/png").await.is_err());
        assert!(store.upload("cat-1", b"", "image/png").await.is_err());

        let expires = Utc::now().timestamp() + 60;
        for bad in ["../etc/passwd", "a/b/c", ".hidden/x.png", "plain"] {
            let url = store.signed_url(bad, expires).unwrap();
            let signature = url.rsplit_once("signature=").unwrap().1;
            assert!(store.read_signed(bad, expires, signature).await.is_err(), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryObjectStore::new("memory://shots/");
        let name = store.upload("cat-1", b"abc", "image/gif").await.unwrap();
        assert_eq!(
            store.presigned_url(&name).await.unwrap(),
            format!("memory://shots/{name}")
        );
        assert_eq!(store.get(&name).unwrap().0, b"abc".to_vec());
        assert!(store.presigned_url("cat-1/missing.jpg").await.is_err());

        let name = store.upload("imdb:tt0111161", b"abc", "image/png").await.unwrap();
        assert_eq!(catalog_id_of(&name).as_deref(), Some("imdb:tt0111161"));
    }
}
