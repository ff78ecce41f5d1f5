//! Content type detection from magic bytes.
//!
//! The stored media record carries the type found in the file header, not
//! the one implied by the file name.

use std::io;
use std::path::Path;

use tokio::io::AsyncReadExt;

/// Content type reported when no signature matches
pub const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

/// Leading bytes inspected (covers the second transport stream sync byte)
const HEADER_LEN: u64 = 189;

/// Detect the content type of a media file from its leading bytes.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    // ISO base media (MP4, M4A, MOV, 3GP): ....ftyp<brand>
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return match &data[8..12] {
            b"M4A " | b"M4B " | b"M4P " => "audio/mp4",
            b"qt  " => "video/quicktime",
            brand if brand.starts_with(b"3gp") => "video/3gpp",
            _ => "video/mp4",
        };
    }

    // EBML (Matroska, WebM): 1A 45 DF A3
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let is_webm = data.windows(4).any(|w| w == b"webm");
        return if is_webm { "video/webm" } else { "video/x-matroska" };
    }

    // RIFF containers: RIFF....WAVE / RIFF....AVI
    if data.len() >= 12 && &data[0..4] == b"RIFF" {
        match &data[8..12] {
            b"WAVE" => return "audio/x-wav",
            b"AVI " => return "video/x-msvideo",
            _ => {}
        }
    }

    // AIFF: FORM....AIFF
    if data.len() >= 12
        && &data[0..4] == b"FORM"
        && (&data[8..12] == b"AIFF" || &data[8..12] == b"AIFC")
    {
        return "audio/x-aiff";
    }

    if data.starts_with(b"OggS") {
        return "audio/ogg";
    }

    if data.starts_with(b"fLaC") {
        return "audio/flac";
    }

    if data.starts_with(b"#!AMR") {
        return "audio/amr";
    }

    // MP3 with ID3v2 tag
    if data.starts_with(b"ID3") {
        return "audio/mpeg";
    }

    // ASF (WMA, WMV)
    if data.starts_with(&[0x30, 0x26, 0xB2, 0x75]) {
        return "video/x-ms-asf";
    }

    // MPEG program stream pack header
    if data.starts_with(&[0x00, 0x00, 0x01, 0xBA]) {
        return "video/mpeg";
    }

    // MPEG transport stream: sync byte every 188 bytes
    if data.len() > 188 && data[0] == 0x47 && data[188] == 0x47 {
        return "video/mp2t";
    }

    if data.len() >= 2 && data[0] == 0xFF {
        // AAC ADTS: 12-bit sync, layer 00
        if data[1] & 0xF6 == 0xF0 {
            return "audio/aac";
        }
        // MPEG audio frame sync without tag
        if data[1] & 0xE0 == 0xE0 {
            return "audio/mpeg";
        }
    }

    tracing::debug!(
        "Unrecognized media signature, first 8 bytes: {:02X?}",
        &data[..8.min(data.len())]
    );
    UNKNOWN_CONTENT_TYPE
}

/// Read the header of a file and detect its content type
pub async fn sniff_file(path: &Path) -> io::Result<&'static str> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    file.take(HEADER_LEN).read_to_end(&mut header).await?;

    Ok(sniff_content_type(&header))
}
