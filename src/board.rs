//! Hardware abstraction for supported boards.
//!
//! Each board module defines pin assignments and capabilities
//! selected at compile time via feature flags.

/// Baud rate of the serial link to the mesh radio module
pub const MESH_BAUD: u32 = 115_200;

/// Baud rate of the LD2450 radar UART
pub const RADAR_BAUD: u32 = 256_000;

#[cfg(feature = "board-xiao")]
mod hw {
    // UART1 to the mesh radio (XIAO D6/D7)
    pub const MESH_TX_PIN: u8 = 43;
    pub const MESH_RX_PIN: u8 = 44;
    // UART2 to the LD2450 radar
    pub const RADAR_TX_PIN: u8 = 9;
    pub const RADAR_RX_PIN: u8 = 8;
    pub const HAS_DISPLAY: bool = false;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-m5stickc")]
mod hw {
    // Grove port
    pub const MESH_TX_PIN: u8 = 32;
    pub const MESH_RX_PIN: u8 = 33;
    // Hat header
    pub const RADAR_TX_PIN: u8 = 0;
    pub const RADAR_RX_PIN: u8 = 26;
    pub const HAS_DISPLAY: bool = true;
    pub const DISPLAY_WIDTH: u16 = 135;
    pub const DISPLAY_HEIGHT: u16 = 240;
    pub const DISPLAY_SPI_FREQ_MHZ: u32 = 40;
    pub const BOARD_NAME: &str = "m5stickc_plus2";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const HAS_DISPLAY: bool = false;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
