// UI layer: a simple interactive menu over the stickers manager, using
// `dialoguer` prompts and an `indicatif` spinner while the network loops run.

use std::path::PathBuf;

use anyhow::Result;
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::StickerGateway;
use crate::manager::StickersManager;
use crate::pack::StickerUsage;
use crate::transfer::ImportOptions;

/// Main interactive menu. Runs a select loop until the user chooses "Exit".
pub fn main_menu<G: StickerGateway>(manager: StickersManager<G>) -> Result<()> {
    let session = manager.session();
    println!(
        "Logged in as {}{}",
        session.user_id,
        if session.is_admin { " (server admin)" } else { "" }
    );

    loop {
        let items = vec![
            "Import folder into pack",
            "Export pack to folder",
            "Delete pack",
            "Exit",
        ];
        let selection = Select::new().items(&items).default(0).interact()?;
        match selection {
            0 => handle_import(&manager)?,
            1 => handle_export(&manager)?,
            2 => handle_delete(&manager)?,
            3 => break,
            _ => {}
        }
    }
    Ok(())
}

fn handle_import<G: StickerGateway>(manager: &StickersManager<G>) -> Result<()> {
    let room_id: String = Input::new().with_prompt("Room id").interact_text()?;
    let pack_name: String = Input::new().with_prompt("Pack name").interact_text()?;
    let folder: String = Input::new().with_prompt("Folder path").interact_text()?;

    let usage_choices = vec!["none", "sticker", "emoticon"];
    let usage = match Select::new()
        .with_prompt("Usage tag for the imported images")
        .items(&usage_choices)
        .default(0)
        .interact()?
    {
        1 => Some(StickerUsage::Sticker),
        2 => Some(StickerUsage::Emoticon),
        _ => None,
    };

    let options = ImportOptions {
        usage,
        number_as_shortcode: Confirm::new()
            .with_prompt("Number the stickers instead of using file names?")
            .default(false)
            .interact()?,
        skip_duplicate_errors: Confirm::new()
            .with_prompt("Skip files whose shortcode is already taken?")
            .default(false)
            .interact()?,
        skip_upload_errors: Confirm::new()
            .with_prompt("Skip files that fail to upload?")
            .default(false)
            .interact()?,
        // Protection is admin-only; don't offer it to everyone else.
        protect_media: manager.session().is_admin
            && Confirm::new()
                .with_prompt("Protect uploaded media from retention sweeps?")
                .default(false)
                .interact()?,
    };

    let spinner = spinner("Importing...");
    let result = manager.import_folder(&room_id, &pack_name, &PathBuf::from(folder), &options);
    spinner.finish_and_clear();

    match result {
        Ok(report) => println!(
            "Imported {}, skipped {} duplicate(s), failed {}.",
            report.imported, report.skipped, report.failed
        ),
        Err(e) => println!("Import failed: {}", e),
    }
    Ok(())
}

fn handle_export<G: StickerGateway>(manager: &StickersManager<G>) -> Result<()> {
    let room_id: String = Input::new().with_prompt("Room id").interact_text()?;
    let pack_name: String = Input::new().with_prompt("Pack name").interact_text()?;
    let dest: String = Input::new().with_prompt("Export folder").interact_text()?;
    let original_name = Confirm::new()
        .with_prompt("Keep original filenames where the server has them?")
        .default(false)
        .interact()?;

    let spinner = spinner("Exporting...");
    let result = manager.export_pack(&room_id, &pack_name, &PathBuf::from(dest), original_name);
    spinner.finish_and_clear();

    match result {
        Ok(report) => println!("Exported {} sticker(s).", report.exported),
        Err(e) => println!("Export failed: {}", e),
    }
    Ok(())
}

fn handle_delete<G: StickerGateway>(manager: &StickersManager<G>) -> Result<()> {
    let room_id: String = Input::new().with_prompt("Room id").interact_text()?;
    let pack_name: String = Input::new().with_prompt("Pack name").interact_text()?;

    let unprotect = manager.session().is_admin
        && Confirm::new()
            .with_prompt("Also release retention protection on the pack's media?")
            .default(false)
            .interact()?;
    if !Confirm::new()
        .with_prompt(format!("Really delete pack '{pack_name}'?"))
        .default(false)
        .interact()?
    {
        return Ok(());
    }

    let spinner = spinner("Deleting...");
    let result = manager.delete_pack(&room_id, &pack_name, unprotect);
    spinner.finish_and_clear();

    match result {
        Ok(()) => println!("Pack deleted."),
        Err(e) => println!("Delete failed: {}", e),
    }
    Ok(())
}

fn spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    spinner
}
