mod config;
mod control;
mod error;
mod log;
mod setup;

pub use config::{AppConfig, AppPaths, APP_CONFIG, DATA_DIR_ENV};
pub use error::Error;
pub use setup::{setup_app, App};

use ::log::info;

/// Start the app and block until the user quits.
pub fn run() -> Result<(), Error> {
    log::init();

    let paths = AppPaths::resolve()?;
    info!("Data directory: {}", paths.data_dir().display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let app = setup_app(&paths)?;
        control::run(&app).await;
        app.shutdown().await;
        Ok::<(), Error>(())
    })
}
