//! Streaming decompression for the `REPLACE_XZ` and `REPLACE_BZ` operations.
//!
//! Decoding stops exactly at the stream's own end marker. The bytes that
//! follow a blob belong to other operations and are left unread. The raw
//! `Stream`/`Decompress` APIs are driven directly because `xz2`'s reader
//! adapters fail with "corrupt xz stream" when data follows the end marker.

use std::io::{BufRead, Write};

use bzip2::Decompress;
use xz2::stream::{Action, Status, Stream};

use crate::error::{Error, Result};

/// Decompressed bytes are staged through a buffer of this size.
const OUTPUT_CHUNK_SIZE: usize = 64 * 1024;

/// Self-terminating compression formats used by full payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Xz,
    Bzip2,
}

/// Outcome of one decoder call.
struct Step {
    consumed: usize,
    produced: usize,
    finished: bool,
}

/// A raw streaming decoder: consumes input, fills output, reports the end marker.
trait StreamDecoder {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> std::result::Result<Step, String>;
}

impl StreamDecoder for Stream {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> std::result::Result<Step, String> {
        let (in_before, out_before) = (self.total_in(), self.total_out());
        let status = self
            .process(input, output, Action::Run)
            .map_err(|e| e.to_string())?;
        Ok(Step {
            consumed: (self.total_in() - in_before) as usize,
            produced: (self.total_out() - out_before) as usize,
            finished: status == Status::StreamEnd,
        })
    }
}

impl StreamDecoder for Decompress {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> std::result::Result<Step, String> {
        let (in_before, out_before) = (self.total_in(), self.total_out());
        let status = self
            .decompress(input, output)
            .map_err(|e| e.to_string())?;
        Ok(Step {
            consumed: (self.total_in() - in_before) as usize,
            produced: (self.total_out() - out_before) as usize,
            finished: status == bzip2::Status::StreamEnd,
        })
    }
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Codec::Xz => "XZ",
            Codec::Bzip2 => "BZip2",
        }
    }

    /// Decompress one stream from the current position of `src` into `dst`.
    ///
    /// Returns the number of decompressed bytes written. On success `src` is
    /// left positioned right after the stream's end marker.
    pub fn decompress<R, W>(self, src: &mut R, dst: &mut W) -> Result<u64>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        match self {
            Codec::Xz => {
                let stream = Stream::new_stream_decoder(u64::MAX, 0).map_err(|e| {
                    Error::CodecError {
                        codec: self.name(),
                        message: e.to_string(),
                    }
                })?;
                self.pump(stream, src, dst)
            }
            Codec::Bzip2 => self.pump(Decompress::new(false), src, dst),
        }
    }

    fn pump<D, R, W>(self, mut decoder: D, src: &mut R, dst: &mut W) -> Result<u64>
    where
        D: StreamDecoder,
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        let mut out = vec![0u8; OUTPUT_CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let input = src
                .fill_buf()
                .map_err(|e| Error::read("compressed data", e))?;
            let eof = input.is_empty();

            let step = decoder
                .step(input, &mut out)
                .map_err(|message| Error::CodecError {
                    codec: self.name(),
                    message,
                })?;
            src.consume(step.consumed);

            dst.write_all(&out[..step.produced])
                .map_err(Error::io("writing decompressed data"))?;
            total += step.produced as u64;

            if step.finished {
                return Ok(total);
            }
            if step.consumed == 0 && step.produced == 0 {
                if eof {
                    return Err(Error::TruncatedInput {
                        what: "compressed data",
                    });
                }
                return Err(Error::CodecError {
                    codec: self.name(),
                    message: "decoder stopped making progress".to_string(),
                });
            }
        }
    }
}
