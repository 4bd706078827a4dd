// Media lifecycle: turns a local file into uploaded remote content and
// manages the retention-protection flag on content the packs reference.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::api::StickerGateway;
use crate::error::{Error, Result};
use crate::manager::SessionContext;
use crate::pack::parse_content_ref;

/// Image types accepted for pack entries, matched by sniffing.
pub const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Uploads assets and flips protection flags. Needs the cached session
/// context for the upload limit and the admin capability check.
pub struct MediaLifecycle<'a, G> {
    gateway: &'a G,
    session: &'a SessionContext,
}

impl<'a, G: StickerGateway> MediaLifecycle<'a, G> {
    pub fn new(gateway: &'a G, session: &'a SessionContext) -> Self {
        Self { gateway, session }
    }

    /// Upload a local file as remote media and return its content reference.
    ///
    /// Preconditions, checked in order: the path is a regular file, its size
    /// is within the server's advertised limit, its type is recognizable
    /// from the bytes themselves (the extension is never consulted), and,
    /// when an allow-list is given, the type is on it.
    pub fn upload_asset(&self, path: &Path, allowed: Option<&[&str]>) -> Result<String> {
        let metadata = fs::metadata(path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(err)
            }
        })?;
        if !metadata.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let size = metadata.len();
        let limit = self.session.max_upload_size;
        if size > limit {
            return Err(Error::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit,
            });
        }

        let bytes = fs::read(path)?;
        let mime = sniff_mime(&bytes).ok_or_else(|| Error::UnknownType(path.to_path_buf()))?;
        if let Some(allowed) = allowed {
            if !allowed.contains(&mime) {
                return Err(Error::DisallowedType {
                    path: path.to_path_buf(),
                    mime: mime.to_string(),
                });
            }
        }

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.bin");
        debug!(file = %path.display(), mime, size, "uploading media");
        self.gateway.upload_media(bytes, mime, filename)
    }

    /// Shield the referenced media from the server's retention sweep.
    /// Admin-only; the reference is parsed before anything goes on the wire.
    pub fn protect(&self, content_ref: &str) -> Result<()> {
        self.require_admin("protect media")?;
        let (_authority, media_id) = parse_content_ref(content_ref)?;
        self.gateway.protect_media(&media_id)
    }

    /// Remove the retention shield from the referenced media.
    pub fn unprotect(&self, content_ref: &str) -> Result<()> {
        self.require_admin("unprotect media")?;
        let (_authority, media_id) = parse_content_ref(content_ref)?;
        self.gateway.unprotect_media(&media_id)
    }

    /// Protect, but log and swallow any failure. Used during import where a
    /// protection hiccup must not fail the sticker.
    pub fn protect_best_effort(&self, content_ref: &str) {
        if let Err(err) = self.protect(content_ref) {
            warn!(content_ref, %err, "media protection failed, continuing");
        }
    }

    /// Unprotect, but log and swallow any failure. Used on deletion cleanup,
    /// which must never be blocked by the protection service.
    pub fn unprotect_best_effort(&self, content_ref: &str) {
        if let Err(err) = self.unprotect(content_ref) {
            warn!(content_ref, %err, "media unprotection failed, continuing");
        }
    }

    fn require_admin(&self, operation: &'static str) -> Result<()> {
        if self.session.is_admin {
            Ok(())
        } else {
            Err(Error::AdminRequired(operation))
        }
    }
}

/// Detect an image type from its magic bytes: png, jpeg, gif or webp.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 8 && bytes[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    if bytes.len() >= 6 && (&bytes[0..6] == b"GIF87a" || &bytes[0..6] == b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}
