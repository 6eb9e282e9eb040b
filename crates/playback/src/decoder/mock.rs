//! Call-recording [`Mp3Decoder`] for pipeline and controller tests.

use super::Mp3Decoder;
use crate::error::DecoderError;
use crate::volume::Volume;

/// One call observed by [`MockDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderCall {
    /// `initialize` with this attenuation
    Initialize(u8),
    /// `hardware_reset`
    HardwareReset,
    /// `software_reset`
    SoftwareReset,
    /// `enable_playback`
    Enable,
    /// `pause_playback`
    Pause,
    /// `resume_playback`
    Resume,
    /// `clear_decode_time`
    ClearDecodeTime,
    /// `send_data` with this many bytes
    SendData(usize),
    /// `set_volume` with this attenuation
    SetVolume(u8),
}

/// Decoder double that records calls and streamed bytes.
#[derive(Debug, Default)]
pub struct MockDecoder {
    calls: Vec<DecoderCall>,
    streamed: Vec<u8>,
    decode_time: u16,
    fail_next: Option<DecoderError>,
}

impl MockDecoder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls so far, in order.
    pub fn calls(&self) -> &[DecoderCall] {
        &self.calls
    }

    /// Every byte passed to `send_data`, concatenated.
    pub fn streamed(&self) -> &[u8] {
        &self.streamed
    }

    /// Lengths of every `send_data` call.
    pub fn send_lengths(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DecoderCall::SendData(len) => Some(*len),
                _ => None,
            })
            .collect()
    }

    /// Number of times `call` was recorded.
    pub fn count(&self, call: DecoderCall) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    /// Forget recorded calls and bytes.
    pub fn clear(&mut self) {
        self.calls.clear();
        self.streamed.clear();
    }

    /// The next operation fails with `error` instead of running.
    pub fn fail_next(&mut self, error: DecoderError) {
        self.fail_next = Some(error);
    }

    /// Value returned by `decode_time_secs`.
    pub fn set_decode_time(&mut self, secs: u16) {
        self.decode_time = secs;
    }

    fn record(&mut self, call: DecoderCall) -> Result<(), DecoderError> {
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        self.calls.push(call);
        Ok(())
    }
}

impl Mp3Decoder for MockDecoder {
    async fn initialize(&mut self, volume: Volume) -> Result<(), DecoderError> {
        self.decode_time = 0;
        self.record(DecoderCall::Initialize(volume.attenuation()))
    }

    async fn hardware_reset(&mut self) -> Result<(), DecoderError> {
        self.record(DecoderCall::HardwareReset)
    }

    async fn software_reset(&mut self) -> Result<(), DecoderError> {
        self.record(DecoderCall::SoftwareReset)
    }

    async fn enable_playback(&mut self) -> Result<(), DecoderError> {
        self.record(DecoderCall::Enable)?;
        self.decode_time = 0;
        Ok(())
    }

    async fn pause_playback(&mut self) -> Result<(), DecoderError> {
        self.record(DecoderCall::Pause)
    }

    async fn resume_playback(&mut self) -> Result<(), DecoderError> {
        self.record(DecoderCall::Resume)
    }

    async fn clear_decode_time(&mut self) -> Result<(), DecoderError> {
        self.record(DecoderCall::ClearDecodeTime)?;
        self.decode_time = 0;
        Ok(())
    }

    async fn decode_time_secs(&mut self) -> Result<u16, DecoderError> {
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        Ok(self.decode_time)
    }

    async fn set_volume(&mut self, volume: Volume) -> Result<(), DecoderError> {
        self.record(DecoderCall::SetVolume(volume.attenuation()))
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), DecoderError> {
        self.record(DecoderCall::SendData(data.len()))?;
        self.streamed.extend_from_slice(data);
        Ok(())
    }
}
