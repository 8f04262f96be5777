use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufWriter, Seek, SeekFrom, Write};
use std::path::{self, Component, Path, PathBuf};

use indicatif::ProgressBar;
use tracing::{info, trace};

use crate::chromeos_update_engine::install_operation::Type;
use crate::chromeos_update_engine::{InstallOperation, PartitionUpdate};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::payload::{ExtractionContext, Payload};

const IMAGE_WRITE_BUFFER: usize = 256 * 1024;

/// How the bytes of an implemented operation reach the partition image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Copy `data_length` bytes verbatim.
    Replace,
    /// Decompress a self-terminating stream.
    Decompress(Codec),
}

/// Executor policy for an operation's wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Supported(Transfer),
    /// Known type that is switched off on purpose.
    Disabled(Type),
    /// Known type this extractor has no implementation for.
    Unsupported(Type),
    /// Not a type the manifest schema defines.
    Unrecognized(i32),
}

impl OperationKind {
    pub fn classify(raw: i32) -> Self {
        match Type::try_from(raw) {
            Ok(Type::Replace) => OperationKind::Supported(Transfer::Replace),
            Ok(Type::ReplaceXz) => OperationKind::Supported(Transfer::Decompress(Codec::Xz)),
            Ok(Type::ReplaceBz) => OperationKind::Supported(Transfer::Decompress(Codec::Bzip2)),
            // Off until checked against a real full payload that uses it.
            Ok(Type::Zero) => OperationKind::Disabled(Type::Zero),
            Ok(other) => OperationKind::Unsupported(other),
            Err(_) => OperationKind::Unrecognized(raw),
        }
    }

    pub fn transfer(self) -> Option<Transfer> {
        match self {
            OperationKind::Supported(transfer) => Some(transfer),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Supported(Transfer::Replace) => f.write_str("REPLACE"),
            OperationKind::Supported(Transfer::Decompress(Codec::Xz)) => f.write_str("REPLACE_XZ"),
            OperationKind::Supported(Transfer::Decompress(Codec::Bzip2)) => {
                f.write_str("REPLACE_BZ")
            }
            OperationKind::Disabled(t) => write!(f, "{} (disabled)", t.as_str_name()),
            OperationKind::Unsupported(t) => f.write_str(t.as_str_name()),
            OperationKind::Unrecognized(raw) => write!(f, "unknown ({raw})"),
        }
    }
}

/// A partition image written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub name: String,
    pub path: PathBuf,
    /// Final file length: the highest offset any operation wrote to.
    pub size: u64,
}

/// Create the output directory. Refuses to reuse an existing entry so an
/// earlier extraction is never overwritten.
pub fn create_output_dir(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(Error::OutputAlreadyExists(path.to_path_buf()))
        }
        Err(source) => Err(Error::Io {
            context: "creating the output directory",
            source,
        }),
    }
}

/// `<out_dir>/<name>.img`, provided the partition name is a plain file name.
fn image_path(out_dir: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !plain || name.contains(path::is_separator) {
        return Err(Error::InvalidPartitionName(name.to_string()));
    }
    Ok(out_dir.join(format!("{name}.img")))
}

/// Applies manifest operations from one payload stream to partition images.
///
/// Every operation seeks both the payload and the image before transferring,
/// since operations are neither contiguous nor sorted by destination.
pub struct Extractor<'a, R: ?Sized> {
    source: &'a mut R,
    context: ExtractionContext,
}

impl<'a, R> Extractor<'a, R>
where
    R: BufRead + Seek + ?Sized,
{
    pub fn new(source: &'a mut R, context: ExtractionContext) -> Self {
        Self { source, context }
    }

    /// Extract every partition in manifest order. Stops at the first failure;
    /// images already written are left on disk.
    pub fn extract_all(
        &mut self,
        partitions: &[PartitionUpdate],
        out_dir: &Path,
        mut new_progress: impl FnMut(&PartitionUpdate) -> ProgressBar,
    ) -> Result<Vec<ExtractedImage>> {
        let mut images = Vec::with_capacity(partitions.len());
        for update in partitions {
            let progress = new_progress(update);
            images.push(self.extract_partition(update, out_dir, &progress)?);
        }
        Ok(images)
    }

    pub fn extract_partition(
        &mut self,
        update: &PartitionUpdate,
        out_dir: &Path,
        progress: &ProgressBar,
    ) -> Result<ExtractedImage> {
        let name = &update.partition_name;
        let path = image_path(out_dir, name)?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::OutputAlreadyExists(path.clone()),
                _ => Error::Io {
                    context: "creating a partition image",
                    source: e,
                },
            })?;
        let mut target = BufWriter::with_capacity(IMAGE_WRITE_BUFFER, file);

        info!(partition = %name, operations = update.operations.len(), "extracting partition");

        for (index, op) in update.operations.iter().enumerate() {
            let kind = OperationKind::classify(op.r#type);
            let transfer = kind
                .transfer()
                .ok_or_else(|| Error::UnsupportedOperationType {
                    partition: name.clone(),
                    index,
                    kind: kind.to_string(),
                })?;

            let written = self.apply_operation(transfer, op, &mut target)?;
            trace!(partition = %name, index, %kind, written, "applied operation");
            progress.inc(1);
        }

        let file = target.into_inner().map_err(|e| Error::Io {
            context: "flushing a partition image",
            source: e.into_error(),
        })?;
        let size = file
            .metadata()
            .map_err(Error::io("reading partition image size"))?
            .len();
        progress.finish();

        Ok(ExtractedImage {
            name: name.clone(),
            path,
            size,
        })
    }

    /// Seek both streams to the operation's offsets and transfer its data.
    ///
    /// Only the first destination extent is used: the data is written
    /// contiguously from its start block. Returns the bytes written.
    pub fn apply_operation<W>(
        &mut self,
        transfer: Transfer,
        op: &InstallOperation,
        target: &mut W,
    ) -> Result<u64>
    where
        W: Write + Seek + ?Sized,
    {
        let data_offset = op.data_offset.ok_or(Error::MissingField("data_offset"))?;
        let extent = op
            .dst_extents
            .first()
            .ok_or(Error::MissingField("dst_extents"))?;
        let start_block = extent
            .start_block
            .ok_or(Error::MissingField("start_block"))?;

        let src_pos = self
            .context
            .data_offset
            .checked_add(data_offset)
            .ok_or(Error::OffsetOverflow {
                what: "source offset",
            })?;
        let dst_pos = start_block
            .checked_mul(u64::from(self.context.block_size))
            .ok_or(Error::OffsetOverflow {
                what: "destination offset",
            })?;

        self.source
            .seek(SeekFrom::Start(src_pos))
            .map_err(Error::io("seeking the payload"))?;
        target
            .seek(SeekFrom::Start(dst_pos))
            .map_err(Error::io("seeking a partition image"))?;

        match transfer {
            Transfer::Replace => {
                let len = op.data_length.ok_or(Error::MissingField("data_length"))?;
                self.copy_exact(len, target)?;
                Ok(len)
            }
            Transfer::Decompress(codec) => codec.decompress(&mut *self.source, target),
        }
    }

    /// Copy exactly `len` bytes from the payload's buffer into `target`.
    fn copy_exact<W>(&mut self, len: u64, target: &mut W) -> Result<()>
    where
        W: Write + ?Sized,
    {
        let mut remaining = len;
        while remaining > 0 {
            let chunk = self
                .source
                .fill_buf()
                .map_err(|e| Error::read("operation data", e))?;
            if chunk.is_empty() {
                return Err(Error::TruncatedInput {
                    what: "operation data",
                });
            }
            let n = usize::try_from(remaining).map_or(chunk.len(), |r| r.min(chunk.len()));
            target
                .write_all(&chunk[..n])
                .map_err(Error::io("writing a partition image"))?;
            self.source.consume(n);
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// Read a payload from `source` and extract all of its partitions into a
/// new directory `out_dir`.
///
/// The manifest is validated before `out_dir` is created.
pub fn extract<R>(source: &mut R, out_dir: &Path) -> Result<Vec<ExtractedImage>>
where
    R: BufRead + Seek,
{
    let payload = Payload::read_from(source)?;
    create_output_dir(out_dir)?;
    Extractor::new(source, payload.context).extract_all(
        &payload.manifest.partitions,
        out_dir,
        |_| ProgressBar::hidden(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chromeos_update_engine::Extent;
    use bzip2::write::BzEncoder;
    use std::io::Cursor;
    use xz2::write::XzEncoder;

    const BLOCK: u32 = 16;

    fn context(data_offset: u64) -> ExtractionContext {
        ExtractionContext {
            data_offset,
            block_size: BLOCK,
        }
    }

    fn op(kind: Type, data_offset: u64, data_length: u64, start_block: u64) -> InstallOperation {
        InstallOperation {
            r#type: kind as i32,
            data_offset: Some(data_offset),
            data_length: Some(data_length),
            dst_extents: vec![Extent {
                start_block: Some(start_block),
                num_blocks: Some(1),
            }],
            ..Default::default()
        }
    }

    fn apply(source: &[u8], data_offset: u64, op: &InstallOperation) -> Result<Vec<u8>> {
        let mut source = Cursor::new(source.to_vec());
        let mut image = Cursor::new(Vec::new());
        let transfer = OperationKind::classify(op.r#type)
            .transfer()
            .expect("test operations are supported");
        Extractor::new(&mut source, context(data_offset)).apply_operation(
            transfer,
            op,
            &mut image,
        )?;
        Ok(image.into_inner())
    }

    #[test]
    fn classify_separates_disabled_unsupported_and_unknown() {
        assert_eq!(
            OperationKind::classify(Type::Replace as i32),
            OperationKind::Supported(Transfer::Replace)
        );
        assert_eq!(
            OperationKind::classify(Type::ReplaceXz as i32),
            OperationKind::Supported(Transfer::Decompress(Codec::Xz))
        );
        assert_eq!(
            OperationKind::classify(Type::ReplaceBz as i32),
            OperationKind::Supported(Transfer::Decompress(Codec::Bzip2))
        );
        assert_eq!(
            OperationKind::classify(Type::Zero as i32),
            OperationKind::Disabled(Type::Zero)
        );
        assert_eq!(
            OperationKind::classify(Type::SourceCopy as i32),
            OperationKind::Unsupported(Type::SourceCopy)
        );
        assert_eq!(OperationKind::classify(99), OperationKind::Unrecognized(99));
        assert_eq!(OperationKind::classify(99).to_string(), "unknown (99)");
        assert_eq!(OperationKind::Disabled(Type::Zero).to_string(), "ZERO (disabled)");
    }

    #[test]
    fn replace_lands_at_start_block() {
        // 3 bytes of header noise, then the blob at data offset 2.
        let source = b"hdrxxABCDEFyy";
        let image = apply(source, 3, &op(Type::Replace, 2, 6, 2)).unwrap();

        assert_eq!(image.len(), 2 * BLOCK as usize + 6);
        assert!(image[..2 * BLOCK as usize].iter().all(|&b| b == 0));
        assert_eq!(&image[2 * BLOCK as usize..], b"ABCDEF");
    }

    #[test]
    fn replace_with_short_source_is_truncated() {
        let err = apply(b"0123", 0, &op(Type::Replace, 2, 10, 0)).unwrap_err();
        assert!(matches!(err, Error::TruncatedInput { what: "operation data" }));
    }

    /// An image target whose every write fails, as on a full disk.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("No space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FullDisk {
        fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn replace_write_failure_names_the_image() {
        let mut source = Cursor::new(b"ABCDEF".to_vec());
        let err = Extractor::new(&mut source, context(0))
            .apply_operation(Transfer::Replace, &op(Type::Replace, 0, 6, 0), &mut FullDisk)
            .unwrap_err();
        assert!(
            matches!(
                err,
                Error::Io {
                    context: "writing a partition image",
                    ..
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn replace_spanning_many_buffer_fills() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut source = io::BufReader::with_capacity(7, Cursor::new(data.clone()));
        let mut image = Cursor::new(Vec::new());
        let written = Extractor::new(&mut source, context(0))
            .apply_operation(Transfer::Replace, &op(Type::Replace, 0, 1000, 0), &mut image)
            .unwrap();
        assert_eq!(written, 1000);
        assert_eq!(image.into_inner(), data);
    }

    #[test]
    fn compressed_operations_ignore_data_length() {
        let data = b"partition contents ".repeat(50);

        let mut xz = XzEncoder::new(Vec::new(), 6);
        xz.write_all(&data).unwrap();
        let mut source = xz.finish().unwrap();
        source.extend_from_slice(b"garbage after the stream");
        // A zero length must not matter for self-terminating codecs.
        let image = apply(&source, 0, &op(Type::ReplaceXz, 0, 0, 1)).unwrap();
        assert_eq!(&image[BLOCK as usize..], &data[..]);

        let mut bz = BzEncoder::new(Vec::new(), bzip2::Compression::default());
        bz.write_all(&data).unwrap();
        let mut source = vec![0xEEu8; 5];
        source.extend(bz.finish().unwrap());
        source.extend_from_slice(b"garbage after the stream");
        let image = apply(&source, 5, &op(Type::ReplaceBz, 0, 0, 0)).unwrap();
        assert_eq!(image, data);
    }

    #[test]
    fn operations_reseek_both_streams() {
        // Blobs stored in reverse order of their destinations.
        let source = b"BBBBAAAA";
        let mut src = Cursor::new(source.to_vec());
        let mut image = Cursor::new(Vec::new());
        let mut extractor = Extractor::new(&mut src, context(0));

        extractor
            .apply_operation(Transfer::Replace, &op(Type::Replace, 4, 4, 0), &mut image)
            .unwrap();
        extractor
            .apply_operation(Transfer::Replace, &op(Type::Replace, 0, 4, 3), &mut image)
            .unwrap();
        extractor
            .apply_operation(Transfer::Replace, &op(Type::Replace, 4, 2, 1), &mut image)
            .unwrap();

        let image = image.into_inner();
        assert_eq!(&image[..4], b"AAAA");
        assert_eq!(&image[16..18], b"AA");
        assert_eq!(&image[48..52], b"BBBB");
        assert_eq!(image.len(), 52);
    }

    #[test]
    fn only_first_destination_extent_is_used() {
        let mut operation = op(Type::Replace, 0, 2 * BLOCK as u64, 1);
        operation.dst_extents.push(Extent {
            start_block: Some(10),
            num_blocks: Some(1),
        });
        let source = vec![0x11u8; 2 * BLOCK as usize];

        let image = apply(&source, 0, &operation).unwrap();
        // Both blocks are written contiguously from block 1; block 10 is never touched.
        assert_eq!(image.len(), 3 * BLOCK as usize);
        assert!(image[BLOCK as usize..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn missing_destination_is_reported() {
        let mut operation = op(Type::Replace, 0, 1, 0);
        operation.dst_extents.clear();
        let err = apply(b"x", 0, &operation).unwrap_err();
        assert!(matches!(err, Error::MissingField("dst_extents")));
    }

    #[test]
    fn offset_overflow_is_reported() {
        let err = apply(b"x", u64::MAX, &op(Type::Replace, 1, 1, 0)).unwrap_err();
        assert!(matches!(err, Error::OffsetOverflow { what: "source offset" }));

        let err = apply(b"x", 0, &op(Type::Replace, 0, 1, u64::MAX)).unwrap_err();
        assert!(matches!(err, Error::OffsetOverflow { what: "destination offset" }));
    }

    #[test]
    fn image_names_must_be_plain() {
        let dir = Path::new("out");
        assert_eq!(image_path(dir, "system_a").unwrap(), dir.join("system_a.img"));
        assert_eq!(image_path(dir, "vendor.a").unwrap(), dir.join("vendor.a.img"));
        for bad in ["", ".", "..", "../boot", "a/b", "/abs", "trailing/"] {
            assert!(
                matches!(image_path(dir, bad), Err(Error::InvalidPartitionName(_))),
                "{bad:?}"
            );
        }
    }
}
