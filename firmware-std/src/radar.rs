//! LD2450 radar UART.

use esp_idf_svc::hal::gpio::{AnyIOPin, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, Uart, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::EspError;

use zonetrac::board;

/// Open the radar UART at the sensor's fixed baud rate.
pub fn open<'d>(
    uart: impl Peripheral<P = impl Uart> + 'd,
    tx: impl Peripheral<P = impl OutputPin> + 'd,
    rx: impl Peripheral<P = impl InputPin> + 'd,
) -> Result<UartDriver<'d>, EspError> {
    let config = UartConfig::new().baudrate(Hertz(board::RADAR_BAUD));
    let driver = UartDriver::new(uart, tx, rx, None::<AnyIOPin>, None::<AnyIOPin>, &config)?;
    log::info!("Radar UART at {} baud", board::RADAR_BAUD);
    Ok(driver)
}
