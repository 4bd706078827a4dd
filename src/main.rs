// Entrypoint for the CLI application: set up logging, load the config,
// establish a session with the homeserver and hand off to the UI loop.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mxstickers_cli::{api::MatrixApi, config::Config, manager::StickersManager, ui::main_menu};

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    let config = Config::load().context("loading configuration")?;
    let api = MatrixApi::new(&config)?;
    let manager =
        StickersManager::new(api).context("establishing a session with the homeserver")?;

    // Blocks until the user exits the menu.
    main_menu(manager)?;
    Ok(())
}
