//! VS1053b MP3 playback core: decoder protocol driver, streaming pipeline and
//! playback controller.
//!
//! # Architecture
//!
//! ```text
//! PlaybackController ──▶ Pipeline ──▶ fetch stage  (Storage: open/seek/read/close)
//!        │                  │
//!        │                  └──────▶ decode stage ─┐
//!        │                                         ▼
//!        └──── pause / resume / volume ──▶ Mutex<Mp3Decoder> ──▶ Vs1053b (SCI + SDI)
//! ```
//!
//! - [`decoder::Vs1053b`]: SCI register and SDI streaming protocol, DREQ
//!   ready gate, clock bring-up
//! - [`pipeline::Pipeline`]: song queue, chunk buffer, fetch and decode stage
//!   bodies, cancellation by generation
//! - [`controller::PlaybackController`]: `Idle → Loaded → Playing ⇄ Paused`
//! - [`catalog::SongCatalog`]: bounded track list built from a directory scan
//!
//! All shared state is generic over an embassy `RawMutex`: firmware uses
//! `CriticalSectionRawMutex`, host tests use `NoopRawMutex`.
//!
//! # Features
//!
//! - `std`: register-level bus simulator ([`decoder::sim`]) and call-recording
//!   decoder ([`decoder::mock`]) for host builds
//! - `defmt`: log through defmt and derive `defmt::Format`
//! - `tracing`: log through the tracing facade (simulator)

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
#![allow(clippy::doc_markdown)] // register names and pin names in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::new_without_default)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

#[macro_use]
mod fmt;

pub mod catalog;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod track;
pub mod volume;

pub use catalog::SongCatalog;
pub use config::{PlayPolicy, PlayerConfig, ReadyGate};
pub use controller::{PlaybackController, PlayerState};
pub use decoder::{ControlPins, Mp3Decoder, Vs1053b};
pub use error::{DecoderError, PipelineError, PlayerError};
pub use pipeline::{Chunk, Pipeline, PipelineEvent, SongRequest};
pub use track::TrackDescriptor;
pub use volume::Volume;
