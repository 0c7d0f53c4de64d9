//! ZoneTrac library: portable presence and zone tracking core.
//!
//! Turns noisy proximity signals (BLE beacon RSSI or LD2450 radar target
//! coordinates) into a debounced "who is here / who is closest" decision
//! and speaks a small NDJSON command/event protocol with a mesh radio
//! module over a serial link.
//!
//! This crate contains all filtering, tracking, and protocol logic with no
//! platform dependencies, testable on any host with `cargo test`. The ESP32
//! firmware binaries (Embassy `no_std` in `src/main.rs`, ESP-IDF `std` in
//! `firmware-std/`) are thin consumers that provide radio/UART access,
//! settings storage, and a display.
//!
//! Data flows one way through the core:
//! `scanner`/`radar` → `filter` → `presence` ∥ `zone` → `protocol`/`comm`.
//! [`engine::Engine`] owns all mutable tracking state and is driven by the
//! firmware's main loop.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod engine;
pub mod entity;
pub mod filter;
pub mod presence;
pub mod presentation;
pub mod protocol;
pub mod radar;
pub mod scanner;
pub mod settings;
pub mod zone;
