// Folder importer and pack exporter: drive the synchronizer and the media
// lifecycle over a directory listing (import) or a pack's entries (export),
// applying the per-item failure policy.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::api::{percent_decode, StickerGateway};
use crate::error::{Error, Result};
use crate::manager::SessionContext;
use crate::media::{MediaLifecycle, IMAGE_MIME_TYPES};
use crate::pack::{parse_content_ref, StickerUsage};
use crate::sync::PackSynchronizer;

/// Per-item policy switches for a folder import. All independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Usage tag applied to every imported entry.
    pub usage: Option<StickerUsage>,
    /// Use the 1-based folder position instead of the file stem as shortcode.
    pub number_as_shortcode: bool,
    /// Skip files whose shortcode is already taken instead of aborting.
    pub skip_duplicate_errors: bool,
    /// Skip files that fail to upload instead of aborting.
    pub skip_upload_errors: bool,
    /// Protect uploaded media from retention sweeps (server admins only).
    pub protect_media: bool,
}

/// What a finished import did per file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entries added to the pack and persisted.
    pub imported: usize,
    /// Files skipped because their shortcode was already taken.
    pub skipped: usize,
    /// Files skipped because their upload failed.
    pub failed: usize,
}

/// What a finished export wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub exported: usize,
}

/// Import every regular file of `folder` into the pack, creating the pack if
/// it does not exist yet.
///
/// Files are taken in directory-iteration order, which is platform-defined;
/// callers that need a deterministic numbering must pre-sort their folder.
/// The 1-based position counter advances for every regular file whether or
/// not it ends up as the shortcode. The pack is persisted after every
/// accepted entry, so an abort mid-way loses at most the file being
/// processed, never prior work.
pub(crate) fn import_folder<G: StickerGateway>(
    gateway: &G,
    session: &SessionContext,
    room_id: &str,
    pack_name: &str,
    folder: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let sync = PackSynchronizer::new(gateway);
    let media = MediaLifecycle::new(gateway, session);

    let mut pack = sync.resolve(room_id, pack_name, true)?;
    let mut report = ImportReport::default();
    let mut position = 0usize;

    for dir_entry in fs::read_dir(folder)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_file() {
            continue;
        }
        let path = dir_entry.path();
        position += 1;

        let shortcode = if options.number_as_shortcode {
            position.to_string()
        } else {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| position.to_string())
        };

        let content_ref = match media.upload_asset(&path, Some(IMAGE_MIME_TYPES)) {
            Ok(content_ref) => content_ref,
            Err(err) if options.skip_upload_errors => {
                warn!(file = %path.display(), %err, "upload failed, skipping file");
                report.failed += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        if options.protect_media && session.is_admin {
            media.protect_best_effort(&content_ref);
        }

        let usage: Vec<StickerUsage> = options.usage.into_iter().collect();
        match pack.add_entry(&shortcode, &content_ref, &usage) {
            Ok(()) => {}
            Err(Error::AlreadyExists(taken)) if options.skip_duplicate_errors => {
                warn!(shortcode = %taken, "shortcode already in pack, skipping file");
                report.skipped += 1;
                continue;
            }
            Err(err) => return Err(err),
        }

        // Flush every accepted sticker before touching the next file.
        sync.persist(room_id, pack_name, &pack)?;
        report.imported += 1;
        debug!(%shortcode, %content_ref, "sticker imported");
    }

    info!(
        room = room_id,
        pack = pack_name,
        imported = report.imported,
        skipped = report.skipped,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

/// Export every image of the pack into `dest`, created if needed.
///
/// Entries download in mapping order. With `original_name` the filename is
/// recovered from the content-disposition header; otherwise files are named
/// `<position>.<subtype>`. Any download or write failure aborts the whole
/// export: pack membership and stored media are expected to be consistent,
/// so there is no skip policy here.
pub(crate) fn export_pack<G: StickerGateway>(
    gateway: &G,
    room_id: &str,
    pack_name: &str,
    dest: &Path,
    original_name: bool,
) -> Result<ExportReport> {
    let sync = PackSynchronizer::new(gateway);
    let pack = sync.resolve(room_id, pack_name, false)?;
    fs::create_dir_all(dest)?;

    let mut report = ExportReport::default();
    let mut position = 0usize;

    for (shortcode, entry) in pack.images() {
        position += 1;
        let (authority, media_id) = parse_content_ref(&entry.url)?;
        let download = gateway.download_media(&authority, &media_id)?;

        let numbered = format!(
            "{position}.{}",
            subtype_extension(download.content_type.as_deref())
        );
        let filename = if original_name {
            download
                .content_disposition
                .as_deref()
                .and_then(disposition_filename)
                .unwrap_or(numbered)
        } else {
            numbered
        };

        let target = dest.join(&filename);
        fs::write(&target, &download.bytes)?;
        debug!(shortcode, file = %target.display(), "sticker exported");
        report.exported += 1;
    }

    info!(
        room = room_id,
        pack = pack_name,
        exported = report.exported,
        "export finished"
    );
    Ok(report)
}

/// File extension for a numbered export: the content type's subtype with any
/// parameters stripped, or `bin` when the header is missing or unreadable.
fn subtype_extension(content_type: Option<&str>) -> String {
    content_type
        .and_then(|value| value.split(';').next())
        .and_then(|value| value.trim().split('/').nth(1))
        .map(str::trim)
        .filter(|subtype| !subtype.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "bin".to_string())
}

/// Pull a filename out of a content-disposition header.
///
/// The plain `filename` field wins. When only the extended `filename*` field
/// is present, its `charset'language'` prefix is stripped and the remainder
/// percent-decoded. `None` when neither field yields a usable name.
fn disposition_filename(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("filename*=") {
            extended = Some(decode_extended_filename(value));
        } else if let Some(value) = part.strip_prefix("filename=") {
            plain = Some(value.trim_matches('"').to_string());
        }
    }

    plain
        .filter(|name| !name.is_empty())
        .or_else(|| extended.filter(|name| !name.is_empty()))
}

/// RFC 5987 value: `charset'language'percent-encoded`. A value without the
/// two quote separators is percent-decoded as-is.
fn decode_extended_filename(value: &str) -> String {
    let mut segments = value.splitn(3, '\'');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(_charset), Some(_language), Some(encoded)) => percent_decode(encoded),
        _ => percent_decode(value.trim_matches('"')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::Pack;
    use crate::testutil::{self, MemoryGateway};
    use std::collections::HashSet;

    const ROOM: &str = "!room:sticker.test";

    fn session(gateway: &MemoryGateway) -> SessionContext {
        SessionContext::establish(gateway).unwrap()
    }

    fn write_files(dir: &Path, files: &[(&str, Vec<u8>)]) {
        for (name, bytes) in files {
            fs::write(dir.join(name), bytes).unwrap();
        }
    }

    fn shortcodes<G: StickerGateway>(gateway: &G, pack_name: &str) -> HashSet<String> {
        let sync = PackSynchronizer::new(gateway);
        sync.resolve(ROOM, pack_name, false)
            .unwrap()
            .images()
            .map(|(code, _)| code.to_string())
            .collect()
    }

    #[test]
    fn import_skips_bad_files_when_asked() {
        let gateway = MemoryGateway::new();
        gateway.set_admin(false);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            &[
                ("a.png", testutil::png_bytes()),
                ("b.txt", b"not an image".to_vec()),
                ("c.png", testutil::png_bytes()),
            ],
        );

        let options = ImportOptions {
            skip_upload_errors: true,
            ..ImportOptions::default()
        };
        let report = import_folder(&gateway, &session, ROOM, "mixed", dir.path(), &options).unwrap();

        assert_eq!(
            report,
            ImportReport {
                imported: 2,
                skipped: 0,
                failed: 1,
            }
        );
        let codes = shortcodes(&gateway, "mixed");
        assert_eq!(codes, HashSet::from(["a".to_string(), "c".to_string()]));
    }

    #[test]
    fn import_aborts_on_bad_file_without_skip_policy() {
        let gateway = MemoryGateway::new();
        gateway.set_admin(false);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("b.txt", b"not an image".to_vec())]);

        let err = import_folder(
            &gateway,
            &session,
            ROOM,
            "strict",
            dir.path(),
            &ImportOptions::default(),
        )
        .expect_err("must abort");
        assert!(matches!(err, Error::UnknownType(_)));
    }

    #[test]
    fn reimport_without_duplicate_skip_aborts_and_leaves_first_run_intact() {
        let gateway = MemoryGateway::new();
        gateway.set_admin(false);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            &[
                ("a.png", testutil::png_bytes()),
                ("c.png", testutil::png_bytes()),
            ],
        );

        let options = ImportOptions::default();
        let first =
            import_folder(&gateway, &session, ROOM, "twice", dir.path(), &options).unwrap();
        assert_eq!(first.imported, 2);
        let after_first = gateway.raw_state(ROOM, "twice").unwrap();

        let err = import_folder(&gateway, &session, ROOM, "twice", dir.path(), &options)
            .expect_err("second run must abort on the first duplicate");
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(gateway.raw_state(ROOM, "twice").unwrap(), after_first);
    }

    #[test]
    fn reimport_with_duplicate_skip_reports_skips() {
        let gateway = MemoryGateway::new();
        gateway.set_admin(false);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("a.png", testutil::png_bytes())]);

        let options = ImportOptions {
            skip_duplicate_errors: true,
            ..ImportOptions::default()
        };
        import_folder(&gateway, &session, ROOM, "dups", dir.path(), &options).unwrap();
        let second =
            import_folder(&gateway, &session, ROOM, "dups", dir.path(), &options).unwrap();

        assert_eq!(
            second,
            ImportReport {
                imported: 0,
                skipped: 1,
                failed: 0,
            }
        );
        assert_eq!(shortcodes(&gateway, "dups").len(), 1);
    }

    #[test]
    fn numbered_shortcodes_cover_every_position() {
        let gateway = MemoryGateway::new();
        gateway.set_admin(false);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            &[
                ("x.png", testutil::png_bytes()),
                ("y.png", testutil::png_bytes()),
                ("z.png", testutil::png_bytes()),
            ],
        );

        let options = ImportOptions {
            number_as_shortcode: true,
            ..ImportOptions::default()
        };
        import_folder(&gateway, &session, ROOM, "numbered", dir.path(), &options).unwrap();

        let codes = shortcodes(&gateway, "numbered");
        assert_eq!(
            codes,
            HashSet::from(["1".to_string(), "2".to_string(), "3".to_string()])
        );
    }

    #[test]
    fn position_counter_advances_past_failed_files() {
        let gateway = MemoryGateway::new();
        gateway.set_admin(false);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            &[
                ("bad.txt", b"nope".to_vec()),
                ("good.png", testutil::png_bytes()),
            ],
        );

        let options = ImportOptions {
            number_as_shortcode: true,
            skip_upload_errors: true,
            ..ImportOptions::default()
        };
        let report =
            import_folder(&gateway, &session, ROOM, "gaps", dir.path(), &options).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed, 1);

        // Directory order is platform-defined, so the surviving shortcode is
        // the png's position among both files, never anything else.
        let codes = shortcodes(&gateway, "gaps");
        assert_eq!(codes.len(), 1);
        let code = codes.into_iter().next().unwrap();
        assert!(code == "1" || code == "2", "unexpected shortcode {code}");
    }

    #[test]
    fn remote_upload_failures_follow_the_skip_policy() {
        let gateway = MemoryGateway::new();
        gateway.set_fail_uploads(true);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("a.png", testutil::png_bytes())]);

        let err = import_folder(
            &gateway,
            &session,
            ROOM,
            "flaky",
            dir.path(),
            &ImportOptions::default(),
        )
        .expect_err("aborts without the skip policy");
        assert!(matches!(err, Error::Remote(_)));

        let options = ImportOptions {
            skip_upload_errors: true,
            ..ImportOptions::default()
        };
        let report =
            import_folder(&gateway, &session, ROOM, "flaky", dir.path(), &options).unwrap();
        assert_eq!(
            report,
            ImportReport {
                imported: 0,
                skipped: 0,
                failed: 1,
            }
        );
        // Nothing was ever persisted for this pack.
        assert!(gateway.raw_state(ROOM, "flaky").is_none());
    }

    #[test]
    fn import_tags_usage_and_protects_for_admins() {
        let gateway = MemoryGateway::new();
        let session = session(&gateway);
        assert!(session.is_admin);
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("wave.png", testutil::png_bytes())]);

        let options = ImportOptions {
            usage: Some(StickerUsage::Sticker),
            protect_media: true,
            ..ImportOptions::default()
        };
        import_folder(&gateway, &session, ROOM, "tagged", dir.path(), &options).unwrap();

        let sync = PackSynchronizer::new(&gateway);
        let pack = sync.resolve(ROOM, "tagged", false).unwrap();
        let (_, entry) = pack.images().next().unwrap();
        assert_eq!(entry.usage, vec![StickerUsage::Sticker]);

        let (_, media_id) = parse_content_ref(&entry.url).unwrap();
        assert!(gateway.protected_ids().contains(&media_id));
    }

    #[test]
    fn import_survives_protection_outage() {
        let gateway = MemoryGateway::new();
        gateway.set_fail_protection(true);
        let session = session(&gateway);
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("wave.png", testutil::png_bytes())]);

        let options = ImportOptions {
            protect_media: true,
            ..ImportOptions::default()
        };
        let report =
            import_folder(&gateway, &session, ROOM, "outage", dir.path(), &options).unwrap();
        assert_eq!(report.imported, 1);
        assert!(gateway.protected_ids().is_empty());
    }

    #[test]
    fn export_of_missing_pack_fails() {
        let gateway = MemoryGateway::new();
        let dir = tempfile::tempdir().unwrap();

        let err = export_pack(&gateway, ROOM, "ghost", dir.path(), false).expect_err("no pack");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn export_numbers_files_by_mapping_order() {
        let gateway = MemoryGateway::new();
        let first = gateway.seed_media("m1", testutil::png_bytes(), "image/png", None);
        let second = gateway.seed_media("m2", testutil::gif_bytes(), "image/gif", None);

        let mut pack = Pack::new("zoo");
        pack.add_entry("panda", &first, &[]).unwrap();
        pack.add_entry("snake", &second, &[]).unwrap();
        PackSynchronizer::new(&gateway)
            .persist(ROOM, "zoo", &pack)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let report = export_pack(&gateway, ROOM, "zoo", &dest, false).unwrap();

        assert_eq!(report.exported, 2);
        assert_eq!(fs::read(dest.join("1.png")).unwrap(), testutil::png_bytes());
        assert_eq!(fs::read(dest.join("2.gif")).unwrap(), testutil::gif_bytes());
    }

    #[test]
    fn export_recovers_original_filenames() {
        let gateway = MemoryGateway::new();
        let plain = gateway.seed_media(
            "m1",
            testutil::png_bytes(),
            "image/png",
            Some("inline; filename=grumpy cat.png"),
        );
        let extended = gateway.seed_media(
            "m2",
            testutil::gif_bytes(),
            "image/gif",
            Some("inline; filename*=UTF-8''%E2%82%AC%20party.gif"),
        );
        let bare = gateway.seed_media("m3", testutil::webp_bytes(), "image/webp", None);

        let mut pack = Pack::new("names");
        pack.add_entry("a", &plain, &[]).unwrap();
        pack.add_entry("b", &extended, &[]).unwrap();
        pack.add_entry("c", &bare, &[]).unwrap();
        PackSynchronizer::new(&gateway)
            .persist(ROOM, "names", &pack)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let report = export_pack(&gateway, ROOM, "names", dir.path(), true).unwrap();
        assert_eq!(report.exported, 3);

        assert!(dir.path().join("grumpy cat.png").exists());
        assert!(dir.path().join("\u{20ac} party.gif").exists());
        // No usable header falls back to the numbered name.
        assert!(dir.path().join("3.webp").exists());
    }

    #[test]
    fn export_aborts_on_download_failure() {
        let gateway = MemoryGateway::new();
        let good = gateway.seed_media("m1", testutil::png_bytes(), "image/png", None);

        let mut pack = Pack::new("broken");
        pack.add_entry("ok", &good, &[]).unwrap();
        pack.add_entry("gone", "mxc://sticker.test/missing", &[])
            .unwrap();
        PackSynchronizer::new(&gateway)
            .persist(ROOM, "broken", &pack)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = export_pack(&gateway, ROOM, "broken", dir.path(), false).expect_err("aborts");
        assert!(matches!(err, Error::Remote(_)));
    }

    #[test]
    fn export_aborts_when_the_media_backend_is_down() {
        let gateway = MemoryGateway::new();
        let only = gateway.seed_media("m1", testutil::png_bytes(), "image/png", None);
        let mut pack = Pack::new("dark");
        pack.add_entry("only", &only, &[]).unwrap();
        PackSynchronizer::new(&gateway)
            .persist(ROOM, "dark", &pack)
            .unwrap();
        gateway.set_fail_downloads(true);

        let dir = tempfile::tempdir().unwrap();
        let err = export_pack(&gateway, ROOM, "dark", dir.path(), false).expect_err("aborts");
        assert!(matches!(err, Error::Remote(_)));
    }

    #[test]
    fn disposition_filename_prefers_the_plain_field() {
        assert_eq!(
            disposition_filename("inline; filename=cat.png"),
            Some("cat.png".to_string())
        );
        assert_eq!(
            disposition_filename("attachment; filename=\"quoted name.png\""),
            Some("quoted name.png".to_string())
        );
        assert_eq!(
            disposition_filename(
                "inline; filename=plain.png; filename*=UTF-8''other%20name.png"
            ),
            Some("plain.png".to_string())
        );
        assert_eq!(
            disposition_filename("inline; filename*=UTF-8'en'cat%20pic.png"),
            Some("cat pic.png".to_string())
        );
        assert_eq!(disposition_filename("inline"), None);
        assert_eq!(disposition_filename("inline; filename="), None);
    }

    #[test]
    fn subtype_extension_strips_parameters() {
        assert_eq!(subtype_extension(Some("image/png")), "png");
        assert_eq!(subtype_extension(Some("image/jpeg; charset=binary")), "jpeg");
        assert_eq!(subtype_extension(Some("weird")), "bin");
        assert_eq!(subtype_extension(None), "bin");
    }
}
