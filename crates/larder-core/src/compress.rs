//! Payload compression.

use std::io::{self, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

/// Writable wrapper that compresses into an owned sink.
///
/// Compressors buffer internally, so the compressed bytes are only complete
/// after [`CompressorSink::finish`]; dropping the wrapper without finishing
/// discards the tail.
pub trait CompressorSink: Write + Send {
    /// Flushes the stream deterministically and returns the sink.
    fn finish(self: Box<Self>) -> io::Result<Vec<u8>>;
}

/// Stream wrapper producing and consuming compressed bytes.
pub trait Compressor: Send + Sync {
    /// Wraps `sink`; bytes written to the wrapper are compressed into it.
    fn compress_stream(&self, sink: Vec<u8>) -> Box<dyn CompressorSink>;

    /// Wraps `source`, yielding decompressed bytes.
    fn decompress_stream<'a>(&self, source: Box<dyn Read + Send + 'a>)
        -> Box<dyn Read + Send + 'a>;
}

impl CompressorSink for DeflateEncoder<Vec<u8>> {
    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        (*self).finish()
    }
}

/// DEFLATE compression at a configurable level.
#[derive(Clone, Copy, Debug)]
pub struct DeflateCompressor {
    level: Compression,
}

impl DeflateCompressor {
    /// Compressor with an explicit level (0 = store, 9 = best).
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for DeflateCompressor {
    fn compress_stream(&self, sink: Vec<u8>) -> Box<dyn CompressorSink> {
        Box::new(DeflateEncoder::new(sink, self.level))
    }

    fn decompress_stream<'a>(
        &self,
        source: Box<dyn Read + Send + 'a>,
    ) -> Box<dyn Read + Send + 'a> {
        Box::new(DeflateDecoder::new(source))
    }
}
