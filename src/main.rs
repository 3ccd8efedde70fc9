use std::sync::{Arc, Mutex};

use eframe::egui;
use tracing::info;

use bluescout::domain::settings::SettingsService;
use bluescout::infrastructure::bluetooth::BluetoothHandle;
use bluescout::infrastructure::logging;
use bluescout::presentation::app::BluescoutApp;

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)?;
    info!("Starting bluescout {}", env!("CARGO_PKG_VERSION"));

    let settings = Arc::new(Mutex::new(settings_service));
    // Fails fast when the machine has no usable Bluetooth adapter.
    let bluetooth = BluetoothHandle::spawn(settings.clone())?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([480.0, 640.0])
            .with_title("Bluescout"),
        ..Default::default()
    };

    eframe::run_native(
        "Bluescout",
        options,
        Box::new(move |cc| Ok(Box::new(BluescoutApp::new(cc, settings, bluetooth)))),
    )
    .map_err(|err| anyhow::anyhow!("failed to start UI: {err}"))
}
