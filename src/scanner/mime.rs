//! Content-based type detection from leading magic bytes.
//!
//! File names and extensions are never consulted, so a `.jpg` holding PNG
//! data is classified as PNG and a renamed text file is not classified at all.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Number of leading bytes read for sniffing.
pub const SNIFF_LEN: usize = 16;

/// Optimizable content types the scanner knows how to recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeType {
    Jpeg,
    Png,
    Gif,
    Pdf,
}

impl MimeType {
    /// IANA media type string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Classify a buffer by its leading bytes.
#[must_use]
pub fn sniff(head: &[u8]) -> Option<MimeType> {
    if head.starts_with(JPEG_MAGIC) {
        Some(MimeType::Jpeg)
    } else if head.starts_with(PNG_MAGIC) {
        Some(MimeType::Png)
    } else if head.starts_with(GIF87_MAGIC) || head.starts_with(GIF89_MAGIC) {
        Some(MimeType::Gif)
    } else if head.starts_with(PDF_MAGIC) {
        Some(MimeType::Pdf)
    } else {
        None
    }
}

/// Read up to [`SNIFF_LEN`] bytes from `path` and classify them.
pub fn sniff_file(path: &Path) -> io::Result<Option<MimeType>> {
    let file = File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(sniff(&head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_each_magic() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), Some(MimeType::Jpeg));
        assert_eq!(
            sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(MimeType::Png)
        );
        assert_eq!(sniff(b"GIF89a\x01\x00"), Some(MimeType::Gif));
        assert_eq!(sniff(b"GIF87a"), Some(MimeType::Gif));
        assert_eq!(sniff(b"%PDF-1.7\n"), Some(MimeType::Pdf));
    }

    #[test]
    fn short_or_unknown_heads_are_unclassified() {
        assert_eq!(sniff(&[]), None);
        assert_eq!(sniff(&[0xFF, 0xD8]), None);
        assert_eq!(sniff(b"<html>"), None);
        assert_eq!(sniff(b"GIF88a"), None);
    }

    #[test]
    fn extension_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spoofed = dir.path().join("photo.jpg");
        std::fs::write(&spoofed, b"not an image at all").expect("write");
        assert_eq!(sniff_file(&spoofed).expect("readable"), None);

        let png_named_gif = dir.path().join("anim.gif");
        std::fs::write(&png_named_gif, PNG_MAGIC).expect("write");
        assert_eq!(
            sniff_file(&png_named_gif).expect("readable"),
            Some(MimeType::Png)
        );
    }

    #[test]
    fn media_type_strings() {
        assert_eq!(MimeType::Jpeg.to_string(), "image/jpeg");
        assert_eq!(MimeType::Pdf.as_str(), "application/pdf");
    }
}
