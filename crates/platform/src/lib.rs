//! Hardware Abstraction Layer (HAL) for the VS1053b MP3 player
//!
//! This crate provides the narrow, trait-based interfaces the playback core
//! consumes from its external collaborators, so the decoder protocol and the
//! streaming pipeline can be developed and tested without physical hardware.
//!
//! # Architecture Layers
//!
//! ```text
//! Application (simulator / firmware)
//!         ↓
//! Playback core (playback crate: driver, pipeline, controller)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Hardware Layer (Embassy HAL + PAC, FAT driver)
//! ```
//!
//! # Interfaces
//!
//! - [`SpiPeripheral`] - byte-exchange SPI transport with clock configuration
//! - [`Storage`] / [`File`] - removable storage: directory match, open, seek, read, close
//!
//! GPIO (chip selects, reset, DREQ) and delays come straight from
//! `embedded-hal` 1.0 and `embedded-hal-async`.
//!
//! # Features
//!
//! - `std`: local filesystem storage and in-memory mocks (host builds)
//! - `defmt`: `defmt::Format` derives on platform types

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![allow(clippy::doc_markdown)] // register names and pin names in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

pub mod config;
pub mod peripheral;
pub mod storage;

#[cfg(any(test, feature = "std"))]
pub mod storage_local;

#[cfg(any(test, feature = "std"))]
pub mod mocks;

pub use peripheral::{SpiConfig, SpiPeripheral};
pub use storage::{matches_pattern, DirEntry, File, Storage, MAX_NAME_LEN};
