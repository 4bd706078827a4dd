// Test support: an in-memory homeserver driven through the same trait as the
// live gateway, plus minimal valid image fixtures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::api::{MediaDownload, StickerGateway};
use crate::error::{Error, Result};

pub const TEST_AUTHORITY: &str = "sticker.test";
pub const TEST_USER: &str = "@tester:sticker.test";

#[derive(Clone)]
struct StoredMedia {
    bytes: Vec<u8>,
    content_type: String,
    content_disposition: Option<String>,
}

struct Inner {
    admin: AtomicBool,
    upload_limit: AtomicU64,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    fail_protection: AtomicBool,
    next_media_id: AtomicU64,
    state: Mutex<HashMap<(String, String), Value>>,
    media: Mutex<HashMap<String, StoredMedia>>,
    protected: Mutex<HashSet<String>>,
}

/// In-memory stand-in for the homeserver. Cloning shares the underlying
/// store, so a test can hand one handle to a manager and keep another for
/// assertions.
#[derive(Clone)]
pub struct MemoryGateway {
    inner: Arc<Inner>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                admin: AtomicBool::new(true),
                upload_limit: AtomicU64::new(1024 * 1024),
                fail_uploads: AtomicBool::new(false),
                fail_downloads: AtomicBool::new(false),
                fail_protection: AtomicBool::new(false),
                next_media_id: AtomicU64::new(1),
                state: Mutex::new(HashMap::new()),
                media: Mutex::new(HashMap::new()),
                protected: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn set_admin(&self, admin: bool) {
        self.inner.admin.store(admin, Ordering::SeqCst);
    }

    pub fn set_upload_limit(&self, bytes: u64) {
        self.inner.upload_limit.store(bytes, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.inner.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.inner.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_protection(&self, fail: bool) {
        self.inner.fail_protection.store(fail, Ordering::SeqCst);
    }

    /// Place media into the store without going through upload. Returns the
    /// content reference.
    pub fn seed_media(
        &self,
        media_id: &str,
        bytes: Vec<u8>,
        content_type: &str,
        content_disposition: Option<&str>,
    ) -> String {
        self.inner.media.lock().unwrap().insert(
            media_id.to_string(),
            StoredMedia {
                bytes,
                content_type: content_type.to_string(),
                content_disposition: content_disposition.map(str::to_string),
            },
        );
        format!("mxc://{TEST_AUTHORITY}/{media_id}")
    }

    pub fn mark_protected(&self, media_id: &str) {
        self.inner
            .protected
            .lock()
            .unwrap()
            .insert(media_id.to_string());
    }

    pub fn protected_ids(&self) -> HashSet<String> {
        self.inner.protected.lock().unwrap().clone()
    }

    pub fn raw_state(&self, room_id: &str, pack_name: &str) -> Option<Value> {
        self.inner
            .state
            .lock()
            .unwrap()
            .get(&(room_id.to_string(), pack_name.to_string()))
            .cloned()
    }

    pub fn uploaded_count(&self) -> usize {
        self.inner.media.lock().unwrap().len()
    }
}

impl StickerGateway for MemoryGateway {
    fn max_upload_size(&self) -> Result<u64> {
        Ok(self.inner.upload_limit.load(Ordering::SeqCst))
    }

    fn whoami(&self) -> Result<String> {
        Ok(TEST_USER.to_string())
    }

    fn is_server_admin(&self, _user_id: &str) -> Result<bool> {
        Ok(self.inner.admin.load(Ordering::SeqCst))
    }

    fn upload_media(&self, bytes: Vec<u8>, content_type: &str, filename: &str) -> Result<String> {
        if self.inner.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::Remote("503 - upload rejected".to_string()));
        }
        let media_id = format!("m{}", self.inner.next_media_id.fetch_add(1, Ordering::SeqCst));
        self.inner.media.lock().unwrap().insert(
            media_id.clone(),
            StoredMedia {
                bytes,
                content_type: content_type.to_string(),
                content_disposition: Some(format!("inline; filename={filename}")),
            },
        );
        Ok(format!("mxc://{TEST_AUTHORITY}/{media_id}"))
    }

    fn download_media(&self, _authority: &str, media_id: &str) -> Result<MediaDownload> {
        if self.inner.fail_downloads.load(Ordering::SeqCst) {
            return Err(Error::Remote("502 - media backend down".to_string()));
        }
        let media = self.inner.media.lock().unwrap();
        let stored = media
            .get(media_id)
            .ok_or_else(|| Error::Remote(format!("404 - no media {media_id}")))?;
        Ok(MediaDownload {
            bytes: stored.bytes.clone(),
            content_type: Some(stored.content_type.clone()),
            content_disposition: stored.content_disposition.clone(),
        })
    }

    fn get_pack_state(&self, room_id: &str, pack_name: &str) -> Result<Option<Value>> {
        Ok(self.raw_state(room_id, pack_name))
    }

    fn put_pack_state(&self, room_id: &str, pack_name: &str, state: &Value) -> Result<()> {
        self.inner
            .state
            .lock()
            .unwrap()
            .insert((room_id.to_string(), pack_name.to_string()), state.clone());
        Ok(())
    }

    fn protect_media(&self, media_id: &str) -> Result<()> {
        if self.inner.fail_protection.load(Ordering::SeqCst) {
            return Err(Error::Remote("500 - protection backend down".to_string()));
        }
        self.mark_protected(media_id);
        Ok(())
    }

    fn unprotect_media(&self, media_id: &str) -> Result<()> {
        if self.inner.fail_protection.load(Ordering::SeqCst) {
            return Err(Error::Remote("500 - protection backend down".to_string()));
        }
        self.inner.protected.lock().unwrap().remove(media_id);
        Ok(())
    }
}

/// Smallest byte strings the content sniffer accepts as each image type.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

pub fn jpeg_bytes() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

pub fn gif_bytes() -> Vec<u8> {
    let mut bytes = b"GIF89a".to_vec();
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

pub fn webp_bytes() -> Vec<u8> {
    let mut bytes = b"RIFF".to_vec();
    bytes.extend_from_slice(&[0x20, 0, 0, 0]);
    bytes.extend_from_slice(b"WEBP");
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}
