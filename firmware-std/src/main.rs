//! ZoneTrac: ESP-IDF std firmware
//!
//! Thread-based build using FreeRTOS threads and std::sync::mpsc channels.
//! The `beacon` feature runs a BLE beacon gateway (NimBLE via
//! esp32-nimble); the `radar` feature runs an LD2450 radar node on UART2.
//! Both report to the mesh radio over UART1 and persist settings in NVS.
//!
//! The main thread owns the [`Engine`]: it reads mesh commands, feeds
//! sensor data in, runs the tracking pass and writes the output lines.

#[cfg(all(feature = "beacon", feature = "radar"))]
compile_error!("features `beacon` and `radar` are mutually exclusive");
#[cfg(not(any(feature = "beacon", feature = "radar")))]
compile_error!("enable one of the `beacon` or `radar` features");

#[cfg(feature = "beacon")]
mod beacon;
#[cfg(feature = "m5stickc")]
mod display;
#[cfg(feature = "radar")]
mod radar;
mod store;

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_svc::hal::delay::NON_BLOCK;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use zonetrac::board;
use zonetrac::engine::{Engine, LineSink};
use zonetrac::protocol::VERSION;
use zonetrac::settings::Settings;

use store::NvsStore;

/// Pause between main loop iterations
const PASS_INTERVAL: Duration = Duration::from_millis(20);

/// Boot time, captured once in main, used for all timestamps.
static BOOT_INSTANT: OnceLock<Instant> = OnceLock::new();

pub(crate) fn uptime_ms() -> u64 {
    BOOT_INSTANT
        .get()
        .map(|boot| boot.elapsed().as_millis() as u64)
        .unwrap_or(0)
}

/// Writes engine output straight to the mesh UART.
struct MeshSink<'a, 'd> {
    uart: &'a UartDriver<'d>,
}

impl LineSink for MeshSink<'_, '_> {
    fn send_line(&mut self, line: &[u8]) {
        if let Ok(s) = std::str::from_utf8(line) {
            log::debug!("> {}", s.trim_end());
        }
        if let Err(e) = self.uart.write(line) {
            log::warn!("Mesh UART write error: {:?}", e);
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    let _ = BOOT_INSTANT.set(Instant::now());

    log::info!("ZoneTrac v{} starting on {} (std)", VERSION, board::BOARD_NAME);

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Hold power on (M5StickC Plus2)
    #[cfg(feature = "m5stickc")]
    let _power_hold = {
        use esp_idf_svc::hal::gpio::PinDriver;
        let mut p = PinDriver::output(peripherals.pins.gpio4)?;
        p.set_high()?;
        p
    };

    // ── Settings ─────────────────────────────────────────────────────

    #[cfg(feature = "beacon")]
    let mut settings = Settings::beacon();
    #[cfg(feature = "radar")]
    let mut settings = Settings::radar();

    let mut store = NvsStore::open(nvs)?;
    match settings.load(&mut store) {
        Ok(true) => log::info!("Settings loaded from NVS"),
        Ok(false) => log::info!("No stored settings, using defaults"),
        Err(e) => log::warn!("Settings load failed, using defaults: {:?}", e),
    }
    settings.log_summary();

    // ── Mesh radio UART ──────────────────────────────────────────────

    let uart_config = UartConfig::new().baudrate(Hertz(board::MESH_BAUD));
    #[cfg(feature = "xiao")]
    let (mesh_tx, mesh_rx) = (peripherals.pins.gpio43, peripherals.pins.gpio44);
    #[cfg(feature = "m5stickc")]
    let (mesh_tx, mesh_rx) = (peripherals.pins.gpio32, peripherals.pins.gpio33);
    let mesh = UartDriver::new(
        peripherals.uart1,
        mesh_tx,
        mesh_rx,
        None::<AnyIOPin>,
        None::<AnyIOPin>,
        &uart_config,
    )?;
    log::info!("Mesh UART at {} baud", board::MESH_BAUD);

    // ── Display thread (M5StickC) ────────────────────────────────────

    #[cfg(feature = "m5stickc")]
    let display_tx = {
        let (display_tx, display_rx) = std::sync::mpsc::sync_channel::<zonetrac::engine::DisplayFrame>(1);
        let spi2 = peripherals.spi2;
        let mosi = peripherals.pins.gpio15;
        let clk = peripherals.pins.gpio13;
        let cs_pin = peripherals.pins.gpio5;
        let dc_pin = peripherals.pins.gpio14;
        let rst_pin = peripherals.pins.gpio12;
        let bl_pin = peripherals.pins.gpio27;
        thread::Builder::new()
            .name("display".into())
            .stack_size(4096)
            .spawn(move || {
                display::display_thread(display_rx, spi2, mosi, clk, cs_pin, dc_pin, rst_pin, bl_pin);
            })?;
        log::info!("Display thread spawned");
        display_tx
    };

    // ── Sensor front end ─────────────────────────────────────────────

    #[cfg(feature = "beacon")]
    let (scan_params, scan_rx) = {
        use std::sync::{Arc, Mutex};
        use zonetrac::scanner::{BeaconReport, ScanParams};

        let params = Arc::new(Mutex::new(ScanParams::from_settings(&settings)));
        let (scan_tx, scan_rx) = std::sync::mpsc::sync_channel::<BeaconReport>(zonetrac::scanner::BEACON_QUEUE_LEN);
        let thread_params = Arc::clone(&params);
        thread::Builder::new()
            .name("blescan".into())
            .stack_size(4096)
            .spawn(move || beacon::ble_scan_thread(thread_params, scan_tx))?;
        log::info!("BLE scan thread spawned");
        (params, scan_rx)
    };
    #[cfg(feature = "beacon")]
    let mut source = zonetrac::scanner::BeaconSource::new();

    #[cfg(feature = "radar")]
    let radar_uart = {
        #[cfg(feature = "xiao")]
        let (tx, rx) = (peripherals.pins.gpio9, peripherals.pins.gpio8);
        #[cfg(feature = "m5stickc")]
        let (tx, rx) = (peripherals.pins.gpio0, peripherals.pins.gpio26);
        radar::open(peripherals.uart2, tx, rx)?
    };
    #[cfg(feature = "radar")]
    let mut source = zonetrac::radar::RadarSource::new();

    // ── Main loop ────────────────────────────────────────────────────

    let mut engine = Engine::new(settings);
    let mut sink = MeshSink { uart: &mesh };
    let mut buf = [0u8; 128];

    log::info!("Tracking loop started");

    loop {
        let now_ms = uptime_ms();

        // Mesh commands
        match mesh.read(&mut buf, NON_BLOCK) {
            Ok(0) => {}
            Ok(n) => {
                if engine.handle_inbound(&buf[..n], now_ms, &mut sink, &mut store) {
                    #[cfg(feature = "beacon")]
                    if let Ok(mut p) = scan_params.lock() {
                        *p = zonetrac::scanner::ScanParams::from_settings(engine.settings());
                    }
                }
            }
            Err(e) => log::warn!("Mesh UART read error: {:?}", e),
        }

        // Sensor data
        #[cfg(feature = "beacon")]
        while let Ok(report) = scan_rx.try_recv() {
            source.push(report);
        }
        #[cfg(feature = "radar")]
        match radar_uart.read(&mut buf, NON_BLOCK) {
            Ok(0) => {}
            Ok(n) => {
                source.feed(&buf[..n], now_ms);
            }
            Err(e) => log::warn!("Radar UART read error: {:?}", e),
        }

        engine.ingest(&mut source);
        engine.run_pass(now_ms, &mut sink);

        #[cfg(feature = "m5stickc")]
        if let Some(frame) = engine.display_frame(now_ms) {
            let _ = display_tx.try_send(frame);
        }

        thread::sleep(PASS_INTERVAL);
    }
}
