//! Volume control mapping for the VS1053b.
//!
//! SCI_VOL holds one 8-bit attenuation per channel (left in the high byte,
//! right in the low byte), in 0.5 dB steps:
//! - `0x00` = no attenuation (loudest)
//! - `0xFF` = maximum attenuation (effectively muted)
//!
//! | ratio | attenuation | SCI_VOL  |
//! |-------|-------------|----------|
//! | 1.0   | 0x00        | `0x0000` |
//! | 0.5   | 0x7F        | `0x7F7F` |
//! | 0.0   | 0xFF        | `0xFFFF` |

/// Playback volume as a ratio in `[0.0, 1.0]`.
///
/// Construction clamps out-of-range input and maps NaN to silence, so every
/// `Volume` converts to a valid register value.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Volume(f32);

impl Volume {
    /// Full volume.
    pub const MAX: Self = Self(1.0);

    /// Silence.
    pub const MUTE: Self = Self(0.0);

    /// Create a volume from a ratio, clamping to `[0.0, 1.0]`.
    pub fn new(ratio: f32) -> Self {
        if ratio.is_nan() {
            Self::MUTE
        } else {
            Self(ratio.clamp(0.0, 1.0))
        }
    }

    /// The clamped ratio.
    pub fn ratio(self) -> f32 {
        self.0
    }

    /// Per-channel attenuation: `255 − round(255 × ratio)`.
    pub fn attenuation(self) -> u8 {
        // ratio ∈ [0, 1] so the rounded value is in [0, 255].
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let loudness = libm::roundf(255.0 * self.0) as u8;
        u8::MAX.saturating_sub(loudness)
    }

    /// SCI_VOL value with the same attenuation on both channels.
    pub fn register_value(self) -> u16 {
        let attenuation = self.attenuation();
        u16::from_be_bytes([attenuation, attenuation])
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_VOLUME)
    }
}

impl From<f32> for Volume {
    fn from(ratio: f32) -> Self {
        Self::new(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::Volume;

    #[test]
    fn test_full_volume_is_zero_attenuation() {
        assert_eq!(Volume::new(1.0).attenuation(), 0x00);
        assert_eq!(Volume::new(1.0).register_value(), 0x0000);
    }

    #[test]
    fn test_zero_volume_is_full_attenuation() {
        assert_eq!(Volume::new(0.0).attenuation(), 0xFF);
        assert_eq!(Volume::new(0.0).register_value(), 0xFFFF);
    }

    #[test]
    fn test_half_volume_rounds_to_nearest() {
        // 255 × 0.5 = 127.5 → 128 → 255 − 128 = 127
        assert_eq!(Volume::new(0.5).attenuation(), 127);
        assert_eq!(Volume::new(0.5).register_value(), 0x7F7F);
    }

    #[test]
    fn test_just_below_half_step_rounds_down() {
        // 255 × p is 0.49999997 in f32; adding 0.5 first would round up to 1.
        let ratio = 0.001_960_784_2_f32;
        assert!(255.0 * ratio < 0.5);
        assert_eq!(Volume::new(ratio).attenuation(), 0xFF);
        assert_eq!(Volume::new(ratio).register_value(), 0xFFFF);
    }

    #[test]
    fn test_default_volume_is_eighty_percent() {
        // 255 × 0.8 = 204 → 51
        assert_eq!(Volume::default().attenuation(), 51);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(Volume::new(1.7), Volume::MAX);
        assert_eq!(Volume::new(-0.3), Volume::MUTE);
        assert_eq!(Volume::new(f32::NAN), Volume::MUTE);
    }
}
