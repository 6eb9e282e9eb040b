//! ID3 tag parsing for MP3 files.
//!
//! Only the fixed-layout parts are read:
//!
//! - the 10-byte ID3v2 header at the start of the file, enough to find where
//!   the audio frames begin
//! - the 128-byte ID3v1 trailer at the end of the file, for title, artist,
//!   album, year, comment, track and genre
//!
//! ID3v2 frames are not decoded.

use heapless::String;

/// Size of the ID3v2 header and of the optional footer.
pub const ID3V2_HEADER_LEN: usize = 10;

/// Size of the ID3v1 trailer.
pub const ID3V1_TAG_LEN: usize = 128;

/// Latin-1 field of up to 30 bytes, stored as UTF-8.
pub type TagText = String<60>;

/// ID3v2 tag header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Id3v2Header {
    /// Major version (3 for ID3v2.3, 4 for ID3v2.4)
    pub major: u8,
    /// Revision number
    pub revision: u8,
    /// Header flags byte
    pub flags: u8,
    /// Tag size excluding header and footer, decoded from synchsafe form
    pub size: u32,
}

impl Id3v2Header {
    const FOOTER_PRESENT: u8 = 0x10;

    /// Parse the first 10 bytes of a file. `None` when there is no ID3v2 tag.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header: &[u8; ID3V2_HEADER_LEN] = bytes.get(..ID3V2_HEADER_LEN)?.try_into().ok()?;
        let [b'I', b'D', b'3', major, revision, flags, size @ ..] = *header else {
            return None;
        };
        if major == 0xFF || revision == 0xFF {
            return None;
        }
        Some(Self {
            major,
            revision,
            flags,
            size: synchsafe(size)?,
        })
    }

    /// `true` when a 10-byte footer follows the tag.
    pub fn has_footer(&self) -> bool {
        self.flags & Self::FOOTER_PRESENT != 0
    }

    /// Offset of the first byte after the tag.
    pub fn audio_offset(&self) -> u64 {
        let framing: u64 = if self.has_footer() { 20 } else { 10 };
        u64::from(self.size).saturating_add(framing)
    }
}

/// 28-bit integer stored as four 7-bit bytes. `None` if any high bit is set.
fn synchsafe(bytes: [u8; 4]) -> Option<u32> {
    bytes.iter().try_fold(0u32, |acc, byte| {
        (byte & 0x80 == 0).then(|| acc.wrapping_mul(0x80) | u32::from(*byte))
    })
}

/// ID3v1 / ID3v1.1 trailer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Id3v1Tag {
    /// Song title
    pub title: TagText,
    /// Artist
    pub artist: TagText,
    /// Album
    pub album: TagText,
    /// Release year, when the field holds four digits
    pub year: Option<u16>,
    /// Comment (28 bytes when a track number is present)
    pub comment: TagText,
    /// Track number (ID3v1.1 only)
    pub track: Option<u8>,
    /// Genre index; 255 means unset
    pub genre: u8,
}

impl Id3v1Tag {
    /// Parse the last 128 bytes of a file. `None` without the `TAG` marker.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let tag: &[u8; ID3V1_TAG_LEN] = bytes.get(..ID3V1_TAG_LEN)?.try_into().ok()?;
        if tag.get(..3)? != b"TAG" {
            return None;
        }
        let field = |start: usize, end: usize| tag.get(start..end).unwrap_or_default();

        let comment_raw = field(97, 127);
        let (comment, track) = match comment_raw {
            [text @ .., 0, track] if *track != 0 => (text, Some(*track)),
            _ => (comment_raw, None),
        };

        Some(Self {
            title: latin1(field(3, 33)),
            artist: latin1(field(33, 63)),
            album: latin1(field(63, 93)),
            year: parse_year(field(93, 97)),
            comment: latin1(comment),
            track,
            genre: tag.get(127).copied().unwrap_or(u8::MAX),
        })
    }
}

/// Decode a NUL/space padded Latin-1 field.
fn latin1(raw: &[u8]) -> TagText {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let mut text = TagText::new();
    for byte in raw.get(..end).unwrap_or_default() {
        // 30 Latin-1 bytes encode to at most 60 UTF-8 bytes
        let _ = text.push(char::from(*byte));
    }
    let trimmed = text.trim_end().len();
    text.truncate(trimmed);
    text
}

fn parse_year(raw: &[u8]) -> Option<u16> {
    if raw.len() != 4 || !raw.iter().all(u8::is_ascii_digit) {
        return None;
    }
    core::str::from_utf8(raw).ok()?.parse().ok()
}

/// Tags found in one file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackMetadata {
    /// Leading ID3v2 header, if any
    pub id3v2: Option<Id3v2Header>,
    /// Trailing ID3v1 tag, if any
    pub id3v1: Option<Id3v1Tag>,
}

impl TrackMetadata {
    /// First byte of audio data: after the ID3v2 tag, or 0.
    pub fn audio_offset(&self) -> u64 {
        self.id3v2.map_or(0, |header| header.audio_offset())
    }

    /// Title from the ID3v1 tag, if non-empty.
    pub fn title(&self) -> Option<&str> {
        self.id3v1
            .as_ref()
            .map(|tag| tag.title.as_str())
            .filter(|title| !title.is_empty())
    }

    /// Artist from the ID3v1 tag, if non-empty.
    pub fn artist(&self) -> Option<&str> {
        self.id3v1
            .as_ref()
            .map(|tag| tag.artist.as_str())
            .filter(|artist| !artist.is_empty())
    }
}
