//! Store-only ZIP assembly for batch downloads.
//!
//! Emits the classic local-header / central-directory / end-of-central-
//! directory layout with no compression, so any standard ZIP reader can
//! open the result. All multi-byte integers are little-endian; per-entry
//! integrity comes from CRC-32 over the raw bytes.

use image::ImageFormat;

use crate::models::job::{JobOutcome, JobResult};
use crate::services::combine::sanitize_filename;

/// MIME type of the assembled blob.
pub const ZIP_MIME: &str = "application/zip";

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_RECORD_SIG: u32 = 0x0605_4b50;

/// "Version needed to extract" for store-only entries (2.0).
const ZIP_VERSION: u16 = 20;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const END_RECORD_LEN: usize = 22;

/// CRC-32 table for the polynomial 0xEDB88320 (the ZIP/gzip polynomial).
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// CRC-32 (IEEE) over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// A failure during archive assembly aborts the whole build; no partial
/// blob is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("too many archive entries: {0} (limit 65535)")]
    TooManyEntries(usize),

    #[error("entry name too long: {0}")]
    NameTooLong(String),

    #[error("entry {name} is too large for a 32-bit archive field ({size} bytes)")]
    EntryTooLarge { name: String, size: usize },

    #[error("archive exceeds the 32-bit offset limit")]
    ArchiveTooLarge,
}

/// Accumulates (name, bytes) entries and assembles the final blob.
#[derive(Debug, Default)]
pub struct ZipBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.entries.push((name.into(), data));
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Serialize every entry into one ZIP blob.
    pub fn build(self) -> Result<Vec<u8>, ArchiveError> {
        if self.entries.len() > u16::MAX as usize {
            return Err(ArchiveError::TooManyEntries(self.entries.len()));
        }

        let payload_size: usize = self
            .entries
            .iter()
            .map(|(name, data)| LOCAL_HEADER_LEN + name.len() + data.len())
            .sum();
        let mut blob = Vec::with_capacity(
            payload_size
                + self.entries.len() * CENTRAL_HEADER_LEN
                + self
                    .entries
                    .iter()
                    .map(|(name, _)| name.len())
                    .sum::<usize>()
                + END_RECORD_LEN,
        );

        // Local headers and data first, recording each entry's offset.
        let mut directory: Vec<(u32, u32, u32)> = Vec::with_capacity(self.entries.len());
        for (name, data) in &self.entries {
            if name.len() > u16::MAX as usize {
                return Err(ArchiveError::NameTooLong(sanitize_filename(name)));
            }
            let size = u32::try_from(data.len()).map_err(|_| ArchiveError::EntryTooLarge {
                name: name.clone(),
                size: data.len(),
            })?;
            let offset =
                u32::try_from(blob.len()).map_err(|_| ArchiveError::ArchiveTooLarge)?;
            let checksum = crc32(data);
            directory.push((checksum, size, offset));

            push_u32(&mut blob, LOCAL_HEADER_SIG);
            push_u16(&mut blob, ZIP_VERSION); // version needed
            push_u16(&mut blob, 0); // general purpose flags
            push_u16(&mut blob, 0); // compression: store
            push_u16(&mut blob, 0); // mod time
            push_u16(&mut blob, 0); // mod date
            push_u32(&mut blob, checksum);
            push_u32(&mut blob, size); // compressed size == uncompressed
            push_u32(&mut blob, size);
            push_u16(&mut blob, name.len() as u16);
            push_u16(&mut blob, 0); // extra field length
            blob.extend_from_slice(name.as_bytes());
            blob.extend_from_slice(data);
        }

        // Central directory mirrors the local headers plus offsets.
        let central_dir_offset =
            u32::try_from(blob.len()).map_err(|_| ArchiveError::ArchiveTooLarge)?;
        for ((name, _), (checksum, size, offset)) in self.entries.iter().zip(&directory) {
            push_u32(&mut blob, CENTRAL_HEADER_SIG);
            push_u16(&mut blob, ZIP_VERSION); // version made by
            push_u16(&mut blob, ZIP_VERSION); // version needed
            push_u16(&mut blob, 0); // general purpose flags
            push_u16(&mut blob, 0); // compression: store
            push_u16(&mut blob, 0); // mod time
            push_u16(&mut blob, 0); // mod date
            push_u32(&mut blob, *checksum);
            push_u32(&mut blob, *size);
            push_u32(&mut blob, *size);
            push_u16(&mut blob, name.len() as u16);
            push_u16(&mut blob, 0); // extra field length
            push_u16(&mut blob, 0); // comment length
            push_u16(&mut blob, 0); // disk number start
            push_u16(&mut blob, 0); // internal attributes
            push_u32(&mut blob, 0); // external attributes
            push_u32(&mut blob, *offset);
            blob.extend_from_slice(name.as_bytes());
        }

        let central_dir_end =
            u32::try_from(blob.len()).map_err(|_| ArchiveError::ArchiveTooLarge)?;
        let central_dir_size = central_dir_end - central_dir_offset;

        push_u32(&mut blob, END_RECORD_SIG);
        push_u16(&mut blob, 0); // disk number
        push_u16(&mut blob, 0); // central directory disk
        push_u16(&mut blob, self.entries.len() as u16); // entries on this disk
        push_u16(&mut blob, self.entries.len() as u16); // total entries
        push_u32(&mut blob, central_dir_size);
        push_u32(&mut blob, central_dir_offset);
        push_u16(&mut blob, 0); // comment length

        Ok(blob)
    }
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Package every successful result into one downloadable ZIP blob.
///
/// Entry names are the sanitized display names plus an extension sniffed
/// from the image bytes (`png` when the format is unrecognized). Failed and
/// cancelled results are skipped.
pub fn archive_results(results: &[JobResult]) -> Result<Vec<u8>, ArchiveError> {
    let mut zip = ZipBuilder::new();
    for result in results {
        if let JobOutcome::Image(data) = &result.outcome {
            let name = format!(
                "{}.{}",
                sanitize_filename(&result.display_name),
                entry_extension(data)
            );
            zip.add_file(name, data.clone());
        }
    }
    tracing::debug!(entries = zip.entry_count(), "assembling result archive");
    zip.build()
}

fn entry_extension(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::WebP) => "webp",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_vectors() {
        assert_eq!(crc32(b""), 0);
        // The standard CRC-32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_crc32_is_deterministic() {
        let data = b"pixsemble";
        assert_eq!(crc32(data), crc32(data));
    }

    #[test]
    fn test_empty_archive_is_just_the_end_record() {
        let blob = ZipBuilder::new().build().unwrap();
        assert_eq!(blob.len(), END_RECORD_LEN);
        assert_eq!(&blob[0..4], &END_RECORD_SIG.to_le_bytes());
        // Zero entries, zero-size directory at offset zero.
        assert_eq!(&blob[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_local_header_layout() {
        let mut zip = ZipBuilder::new();
        zip.add_file("a.png", vec![1, 2, 3]);
        let blob = zip.build().unwrap();

        assert_eq!(&blob[0..4], &LOCAL_HEADER_SIG.to_le_bytes());
        // Compression method must be store (0).
        assert_eq!(&blob[8..10], &[0, 0]);
        // CRC over [1, 2, 3].
        assert_eq!(&blob[14..18], &crc32(&[1, 2, 3]).to_le_bytes());
        // Both sizes equal the raw length.
        assert_eq!(&blob[18..22], &3u32.to_le_bytes());
        assert_eq!(&blob[22..26], &3u32.to_le_bytes());
        // Name follows the 30-byte header.
        assert_eq!(&blob[30..35], b"a.png");
        // Data follows the name.
        assert_eq!(&blob[35..38], &[1, 2, 3]);
    }

    #[test]
    fn test_archive_results_skips_failures() {
        use crate::models::job::{JobOutcome, JobResult};
        use uuid::Uuid;

        let results = vec![
            JobResult {
                id: Uuid::new_v4(),
                display_name: "ok one".to_string(),
                outcome: JobOutcome::Image(vec![5, 6]),
            },
            JobResult {
                id: Uuid::new_v4(),
                display_name: "bad".to_string(),
                outcome: JobOutcome::Failed {
                    message: "HTTP 500: oops".to_string(),
                    class: crate::models::job::ErrorClass::ServerError,
                },
            },
            JobResult {
                id: Uuid::new_v4(),
                display_name: "dropped".to_string(),
                outcome: JobOutcome::Cancelled,
            },
        ];

        let blob = archive_results(&results).unwrap();
        // End record reports exactly one entry.
        let eocd = blob.len() - END_RECORD_LEN;
        assert_eq!(&blob[eocd..eocd + 4], &END_RECORD_SIG.to_le_bytes());
        assert_eq!(&blob[eocd + 10..eocd + 12], &1u16.to_le_bytes());
        // Entry name was sanitized and given the png fallback extension.
        assert_eq!(&blob[30..40], b"ok_one.png");
    }

    #[test]
    fn test_entry_extension_sniffs_format() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(entry_extension(&png_magic), "png");
        let jpeg_magic = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert_eq!(entry_extension(&jpeg_magic), "jpg");
        assert_eq!(entry_extension(&[0, 1, 2]), "png");
    }
}
