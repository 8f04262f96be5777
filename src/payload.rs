use std::io::{self, Read, Seek};

use nom::{
    IResult,
    bytes::complete::{tag, take},
    combinator::map,
    sequence::tuple,
};
use prost::Message;
use tracing::debug;

use crate::chromeos_update_engine::DeltaArchiveManifest;
use crate::error::{Error, Result};

/// Magic bytes at the start of every update payload ("CrAU").
pub const PAYLOAD_MAGIC: &[u8; 4] = b"CrAU";

/// Chrome OS update payload header.
///
/// The binary format is:
/// - Magic bytes: "CrAU" (4 bytes)
/// - File format version (8 bytes, big-endian)
/// - Manifest size (8 bytes, big-endian)
/// - [Optional] Metadata signature size (4 bytes, big-endian, only if version >= 2)
/// - Manifest data (variable length, protobuf serialized)
/// - [Optional] Metadata signature (variable length, only if version >= 2)
/// - Payload data (remaining bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub magic: [u8; 4],

    /// Major version of the payload file format.
    pub file_format_version: u64,

    /// Size in bytes of the serialized manifest that follows the header.
    pub manifest_size: u64,

    /// Size of the metadata signature blob. Zero for version 1 payloads,
    /// which have no such field on disk.
    pub metadata_signature_size: u32,
}

/// Values every operation needs to address the source and destination streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionContext {
    /// Absolute offset in the payload where the data blobs start.
    pub data_offset: u64,
    /// Size in bytes of one destination block.
    pub block_size: u32,
}

/// A payload whose header and manifest have been read and validated.
#[derive(Debug, Clone)]
pub struct Payload {
    pub header: PayloadHeader,
    pub manifest: DeltaArchiveManifest,
    pub context: ExtractionContext,
}

/// Decode an unsigned big-endian integer of up to 8 bytes.
pub fn decode_be(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
}

fn magic(input: &[u8]) -> IResult<&[u8], &[u8]> {
    tag(&PAYLOAD_MAGIC[..])(input)
}

fn be_u64(input: &[u8]) -> IResult<&[u8], u64> {
    map(take(8usize), decode_be)(input)
}

fn be_u32(input: &[u8]) -> IResult<&[u8], u32> {
    // Four bytes never exceed u32::MAX.
    map(take(4usize), |bytes: &[u8]| decode_be(bytes) as u32)(input)
}

fn read_array<const N: usize>(reader: &mut impl Read, what: &'static str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::read(what, e))?;
    Ok(buf)
}

/// Read exactly `len` bytes. The buffer grows with the data actually read,
/// never to `len` up front.
fn read_vec_exact(reader: &mut impl Read, len: u64, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let read = reader
        .take(len)
        .read_to_end(&mut buf)
        .map_err(|e| Error::read(what, e))?;
    if (read as u64) < len {
        return Err(Error::TruncatedInput { what });
    }
    Ok(buf)
}

fn skip_exact(reader: &mut impl Read, len: u64, what: &'static str) -> Result<()> {
    let skipped =
        io::copy(&mut reader.take(len), &mut io::sink()).map_err(|e| Error::read(what, e))?;
    if skipped < len {
        return Err(Error::TruncatedInput { what });
    }
    Ok(())
}

impl PayloadHeader {
    /// Length of the header on disk.
    pub fn encoded_len(&self) -> u64 {
        if self.file_format_version > 1 { 24 } else { 20 }
    }

    /// Read the header fields from the start of `reader`.
    ///
    /// Nothing past the magic is read when the magic does not match.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let raw_magic: [u8; 4] = read_array(reader, "magic bytes")?;
        if magic(&raw_magic).is_err() {
            return Err(Error::UnsupportedFormat { magic: raw_magic });
        }

        let sizes: [u8; 16] = read_array(reader, "header")?;
        let (_, (file_format_version, manifest_size)) = tuple((be_u64, be_u64))(&sizes[..])
            .map_err(|_| Error::TruncatedInput { what: "header" })?;

        // The metadata signature size only exists in version 2+.
        let metadata_signature_size = if file_format_version > 1 {
            let raw: [u8; 4] = read_array(reader, "metadata signature size")?;
            let (_, size) = be_u32(&raw[..]).map_err(|_| Error::TruncatedInput {
                what: "metadata signature size",
            })?;
            size
        } else {
            0
        };

        Ok(Self {
            magic: raw_magic,
            file_format_version,
            manifest_size,
            metadata_signature_size,
        })
    }
}

impl Payload {
    /// Parse the header and manifest from a payload positioned at offset 0.
    ///
    /// On success the stream is positioned at the first data blob, whose
    /// absolute offset is recorded in [`ExtractionContext::data_offset`].
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let header = PayloadHeader::read_from(reader)?;
        debug!(
            version = header.file_format_version,
            manifest_size = header.manifest_size,
            metadata_signature_size = header.metadata_signature_size,
            "read payload header"
        );

        let manifest_raw = read_vec_exact(reader, header.manifest_size, "manifest")?;

        // Signature contents are not verified, only skipped.
        if header.metadata_signature_size > 0 {
            skip_exact(
                reader,
                header.metadata_signature_size.into(),
                "metadata signature",
            )?;
        }

        let data_offset = reader
            .stream_position()
            .map_err(Error::io("locating payload data"))?;
        debug!(data_offset, "payload data starts");

        let manifest =
            DeltaArchiveManifest::decode(manifest_raw.as_slice()).map_err(Error::ManifestDecode)?;

        let minor_version = manifest.minor_version();
        if minor_version != 0 {
            return Err(Error::IncrementalPayloadUnsupported { minor_version });
        }

        let context = ExtractionContext {
            data_offset,
            block_size: manifest.block_size(),
        };

        Ok(Self {
            header,
            manifest,
            context,
        })
    }
}
