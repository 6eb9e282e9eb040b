//! Application configuration and constants
//!
//! Central naming and identification values shared by the firmware and the
//! desktop simulator. Tuning values for the decoder and pipeline live in
//! `playback::config`.

/// The application name
pub const APP_NAME: &str = "VS1053 Player";

/// Application version (synchronized with Cargo.toml)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the music directory for host builds.
pub const MUSIC_PATH_ENV: &str = "MUSIC_PATH";
