// Session context and the manager facade tying the synchronizer, the media
// lifecycle and the folder transfer together.

use std::path::Path;

use tracing::info;

use crate::api::StickerGateway;
use crate::error::{Error, Result};
use crate::media::MediaLifecycle;
use crate::sync::PackSynchronizer;
use crate::transfer::{self, ExportReport, ImportOptions, ImportReport};

/// Values fetched from the gateway once, when the manager is built, and
/// cached for its whole lifetime. Nothing refreshes them mid-run: a token
/// whose admin status or server whose upload limit changes during a session
/// is not noticed until the next start.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// User the access token belongs to.
    pub user_id: String,
    /// Whether that user is a server admin (enables media protection).
    pub is_admin: bool,
    /// Server-wide media upload limit in bytes.
    pub max_upload_size: u64,
}

impl SessionContext {
    /// Query whoami, admin status and the upload limit from the gateway.
    pub fn establish<G: StickerGateway>(gateway: &G) -> Result<Self> {
        let user_id = gateway.whoami()?;
        let is_admin = gateway.is_server_admin(&user_id)?;
        let max_upload_size = gateway.max_upload_size()?;
        info!(%user_id, is_admin, max_upload_size, "session established");
        Ok(Self {
            user_id,
            is_admin,
            max_upload_size,
        })
    }
}

/// Facade over the whole pack workflow. Owns the gateway and the cached
/// session context; one instance serves any number of sequential operations.
pub struct StickersManager<G> {
    gateway: G,
    session: SessionContext,
}

impl<G: StickerGateway> StickersManager<G> {
    /// Build the manager, establishing the session eagerly.
    pub fn new(gateway: G) -> Result<Self> {
        let session = SessionContext::establish(&gateway)?;
        Ok(Self { gateway, session })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Bulk-import a folder of images into the pack, creating it if needed.
    /// See [`ImportOptions`] for the per-item policies.
    pub fn import_folder(
        &self,
        room_id: &str,
        pack_name: &str,
        folder: &Path,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        transfer::import_folder(
            &self.gateway,
            &self.session,
            room_id,
            pack_name,
            folder,
            options,
        )
    }

    /// Download every image of the pack into `dest`. With `original_name`
    /// the server-side filenames are recovered where possible.
    pub fn export_pack(
        &self,
        room_id: &str,
        pack_name: &str,
        dest: &Path,
        original_name: bool,
    ) -> Result<ExportReport> {
        transfer::export_pack(&self.gateway, room_id, pack_name, dest, original_name)
    }

    /// Delete the pack. Deleting an absent pack succeeds.
    ///
    /// With `unprotect_media` every entry's retention shield is released
    /// first, best-effort: a protection-service hiccup or a corrupted entry
    /// is logged and never blocks the delete itself.
    pub fn delete_pack(&self, room_id: &str, pack_name: &str, unprotect_media: bool) -> Result<()> {
        let sync = PackSynchronizer::new(&self.gateway);

        if unprotect_media {
            match sync.resolve(room_id, pack_name, false) {
                Ok(pack) => {
                    let media = MediaLifecycle::new(&self.gateway, &self.session);
                    for (_, entry) in pack.images() {
                        media.unprotect_best_effort(&entry.url);
                    }
                }
                Err(Error::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err),
            }
        }

        sync.delete(room_id, pack_name)
    }
}
