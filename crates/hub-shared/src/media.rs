//! Content sniffing for chat attachments.
//!
//! The declared file name is never trusted: the real type is detected from
//! the leading signature bytes, then checked against the allow-list of the
//! channel the upload arrived on.

use serde::{Deserialize, Serialize};

use crate::error::MediaError;
use crate::types::MessageType;

/// Formats the sniffer can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Pdf,
    Xlsx,
    Zip,
    Csv,
    Mp3,
    Wav,
    Ogg,
    Webm,
    M4a,
    Executable,
}

impl FileFormat {
    /// Extension used for the stored file name.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Pdf => "pdf",
            Self::Xlsx => "xlsx",
            Self::Zip => "zip",
            Self::Csv => "csv",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Ogg => "ogg",
            Self::Webm => "webm",
            Self::M4a => "m4a",
            Self::Executable => "exe",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Pdf => "application/pdf",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Zip => "application/zip",
            Self::Csv => "text/csv",
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
            Self::Ogg => "audio/ogg",
            Self::Webm => "audio/webm",
            Self::M4a => "audio/mp4",
            Self::Executable => "application/octet-stream",
        }
    }
}

/// Detect the real format of `bytes` from its signature.
pub fn sniff(bytes: &[u8]) -> Option<FileFormat> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(FileFormat::Jpeg);
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(FileFormat::Png);
    }
    if bytes.starts_with(b"GIF8") {
        return Some(FileFormat::Gif);
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") {
        return match &bytes[8..12] {
            b"WEBP" => Some(FileFormat::Webp),
            b"WAVE" => Some(FileFormat::Wav),
            _ => None,
        };
    }
    if bytes.starts_with(b"%PDF-") {
        return Some(FileFormat::Pdf);
    }
    if bytes.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
        // OOXML workbooks are zip archives whose entries live under `xl/`.
        return if contains(bytes, b"xl/") {
            Some(FileFormat::Xlsx)
        } else {
            Some(FileFormat::Zip)
        };
    }
    if bytes.starts_with(b"MZ") || bytes.starts_with(&[0x7F, b'E', b'L', b'F']) {
        return Some(FileFormat::Executable);
    }
    if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
    {
        return Some(FileFormat::Mp3);
    }
    if bytes.starts_with(b"OggS") {
        return Some(FileFormat::Ogg);
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(FileFormat::Webm);
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && bytes[8..12].starts_with(b"M4A") {
        return Some(FileFormat::M4a);
    }
    if looks_like_csv(bytes) {
        return Some(FileFormat::Csv);
    }
    None
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// CSV has no signature: accept printable UTF-8 text with at least one
/// comma-separated line.
fn looks_like_csv(bytes: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return false;
    };
    let printable = text
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'));
    printable && text.lines().any(|line| line.contains(','))
}

/// Upload channel. Each channel has its own allow-list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Document,
    Audio,
}

impl MediaKind {
    pub fn allowed(&self) -> &'static [FileFormat] {
        match self {
            Self::Image => &[FileFormat::Jpeg, FileFormat::Png],
            Self::Document => &[FileFormat::Pdf, FileFormat::Xlsx, FileFormat::Csv],
            Self::Audio => &[
                FileFormat::Mp3,
                FileFormat::Wav,
                FileFormat::Ogg,
                FileFormat::Webm,
                FileFormat::M4a,
            ],
        }
    }

    fn allowed_label(&self) -> &'static str {
        match self {
            Self::Image => "jpeg, jpg, png",
            Self::Document => "pdf, xlsx, csv",
            Self::Audio => "mp3, wav, ogg, webm, m4a",
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Image => MessageType::Image,
            Self::Document => MessageType::Document,
            Self::Audio => MessageType::Audio,
        }
    }

    /// Validate an upload for this channel: size first, then sniffed type.
    pub fn validate(&self, bytes: &[u8], max_size: usize) -> Result<FileFormat, MediaError> {
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        if bytes.len() > max_size {
            return Err(MediaError::TooLarge {
                size: bytes.len(),
                max: max_size,
            });
        }
        match sniff(bytes) {
            Some(format) if self.allowed().contains(&format) => Ok(format),
            _ => Err(MediaError::InvalidFormat {
                allowed: self.allowed_label(),
            }),
        }
    }
}
