//! NimBLE scan thread for the beacon gateway.
//!
//! Runs scan rounds of `scan_time` seconds back to back. Scan parameters
//! are re-read before every round so a configuration command takes
//! effect on the next one.

use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use esp32_nimble::{BLEDevice, BLEScan};
use esp_idf_svc::hal::task::block_on;

use zonetrac::scanner::{BeaconReport, BleAdvParser, ScanParams};

pub fn ble_scan_thread(params: Arc<Mutex<ScanParams>>, scan_tx: SyncSender<BeaconReport>) {
    log::info!("BLE scan thread started");

    let ble_device = BLEDevice::take();
    let mut scan = BLEScan::new();
    let mut applied: Option<ScanParams> = None;

    loop {
        let current = match params.lock() {
            Ok(p) => *p,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if applied != Some(current) {
            scan.active_scan(current.active)
                .interval(current.interval)
                .window(current.window);
            log::info!(
                "BLE scan: active={} interval={} window={} round={}ms",
                current.active,
                current.interval,
                current.window,
                current.duration_ms,
            );
            applied = Some(current);
        }

        let result = block_on(scan.start(ble_device, current.duration_ms as i32, |device, data| {
            let addr_bytes = device.addr().as_be_bytes();
            let report =
                BleAdvParser::parse(&addr_bytes, device.rssi(), data.payload(), crate::uptime_ms());
            let _ = scan_tx.try_send(report);
            None::<()> // Continue scanning
        }));
        if let Err(e) = result {
            log::warn!("BLE scan round failed: {:?}", e);
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}
