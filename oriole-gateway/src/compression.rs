//! Zlib-stream decompression of gateway frames.
//!
//! Discord's `compress=zlib-stream` transport maintains one persistent
//! deflate context for the lifetime of a connection; every binary frame is
//! a chunk of that stream, not an independently-compressed message, and is
//! terminated by the 4-byte suffix `00 00 FF FF`.
//!
//! # Resizing buffers
//!
//! Buffers are resized on a couple of heuristics: if incoming data doesn't
//! fit, the buffer capacity grows; at most once a minute the buffers shrink
//! back down to the size of the most recently decompressed message, since
//! Discord tends to send its largest payloads right after connecting.

use crate::config::ShardId;
use flate2::{Decompress, DecompressError, FlushDecompress};
use std::{mem, time::Instant};

const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Initial capacity, in bytes, reserved for both the compressed-input and
/// decompressed-output buffers.
const INTERNAL_BUFFER_SIZE: usize = 32 * 1024;

/// Per-connection zlib-stream decompressor.
#[derive(Debug)]
pub struct Inflater {
    decompress: Decompress,
    compressed: Vec<u8>,
    internal_buffer: Vec<u8>,
    buffer: Vec<u8>,
    last_resize: Instant,
    shard_id: ShardId,
}

impl Inflater {
    /// Create a new inflater for a shard's connection.
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            compressed: Vec::new(),
            decompress: Decompress::new(true),
            internal_buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            last_resize: Instant::now(),
            shard_id,
        }
    }

    /// Append a chunk of compressed data received over the socket.
    pub fn extend(&mut self, slice: &[u8]) {
        self.compressed.extend_from_slice(slice);
    }

    /// Decompress the next complete message, if the 4-byte suffix has been
    /// seen in the accumulated input.
    ///
    /// Returns `None` if only a partial payload has been received so far.
    ///
    /// # Errors
    ///
    /// Returns [`DecompressError`] if the zlib stream is corrupt.
    pub fn msg(&mut self) -> Result<Option<&mut [u8]>, DecompressError> {
        let length = self.compressed.len();

        if length < 4 || self.compressed[(length - 4)..] != ZLIB_SUFFIX {
            return Ok(None);
        }

        let before = self.decompress.total_in();
        let mut offset = 0;

        loop {
            self.internal_buffer.clear();

            self.decompress.decompress_vec(
                &self.compressed[offset..],
                &mut self.internal_buffer,
                FlushDecompress::Sync,
            )?;

            offset = (self.decompress.total_in() - before)
                .try_into()
                .unwrap_or_default();
            self.buffer.extend_from_slice(&self.internal_buffer[..]);

            let not_at_capacity = self.internal_buffer.len() < self.internal_buffer.capacity();

            if not_at_capacity || offset > self.compressed.len() {
                break;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            bytes_in = self.compressed.len(),
            bytes_out = self.buffer.len(),
            shard_id = %self.shard_id,
            "payload lengths",
        );

        self.compressed.clear();

        Ok(Some(&mut self.buffer))
    }

    /// Clear buffered data, shrinking buffers if due.
    pub fn clear(&mut self) {
        self.shrink();

        self.compressed.clear();
        self.internal_buffer.clear();
        self.buffer.clear();
    }

    /// Reset back to a fresh state, as after a reconnect.
    pub fn reset(&mut self) {
        *self = Self::new(self.shard_id);
    }

    /// Take the decompressed buffer, replacing it with an empty one.
    pub fn take(&mut self) -> Vec<u8> {
        mem::take(&mut self.buffer)
    }

    /// Shrink the compressed and output buffers if at least 60 seconds have
    /// passed since the last shrink.
    fn shrink(&mut self) {
        if self.last_resize.elapsed().as_secs() < 60 {
            return;
        }

        self.compressed.shrink_to_fit();
        self.buffer.shrink_to_fit();

        self.last_resize = Instant::now();
    }
}

/// Append the query parameter Discord expects for zlib-stream transport
/// compression.
pub fn add_url_feature(url: &mut String) {
    url.push_str("&compress=zlib-stream");
}

#[cfg(test)]
mod tests {
    use super::Inflater;
    use crate::config::ShardId;
    use std::error::Error;

    const MESSAGE: &[u8] = &[
        120, 156, 52, 201, 65, 10, 131, 48, 16, 5, 208, 187, 252, 117, 82, 98, 169, 32, 115, 21,
        35, 50, 53, 67, 27, 136, 81, 226, 216, 82, 66, 238, 222, 110, 186, 123, 240, 42, 20, 148,
        207, 148, 12, 142, 63, 182, 29, 212, 57, 131, 0, 170, 120, 10, 23, 189, 11, 235, 28, 179,
        74, 121, 113, 2, 221, 186, 107, 255, 251, 89, 11, 47, 2, 26, 49, 122, 60, 88, 229, 205, 31,
        187, 151, 96, 87, 142, 217, 14, 253, 16, 60, 76, 245, 88, 227, 82, 182, 195, 131, 220, 197,
        181, 9, 83, 107, 95, 0, 0, 0, 255, 255,
    ];
    const OUTPUT: &[u8] = &[
        123, 34, 116, 34, 58, 110, 117, 108, 108, 44, 34, 115, 34, 58, 110, 117, 108, 108, 44, 34,
        111, 112, 34, 58, 49, 48, 44, 34, 100, 34, 58, 123, 34, 104, 101, 97, 114, 116, 98, 101,
        97, 116, 95, 105, 110, 116, 101, 114, 118, 97, 108, 34, 58, 52, 49, 50, 53, 48, 44, 34, 95,
        116, 114, 97, 99, 101, 34, 58, 91, 34, 91, 92, 34, 103, 97, 116, 101, 119, 97, 121, 45,
        112, 114, 100, 45, 109, 97, 105, 110, 45, 56, 53, 56, 100, 92, 34, 44, 123, 92, 34, 109,
        105, 99, 114, 111, 115, 92, 34, 58, 48, 46, 48, 125, 93, 34, 93, 125, 125,
    ];
    const SHARD: ShardId = ShardId::new(2, 5);

    #[test]
    fn partial_payload_returns_none() -> Result<(), Box<dyn Error>> {
        let mut inflater = Inflater::new(SHARD);
        inflater.extend(&MESSAGE[0..MESSAGE.len() - 2]);
        assert_eq!(None, inflater.msg()?);

        Ok(())
    }

    #[test]
    fn full_payload_decompresses_and_clears() -> Result<(), Box<dyn Error>> {
        let mut inflater = Inflater::new(SHARD);
        inflater.extend(MESSAGE);
        assert_eq!(Some(OUTPUT), inflater.msg()?.as_deref());
        assert!(inflater.compressed.is_empty());

        inflater.clear();
        assert!(inflater.buffer.is_empty());

        Ok(())
    }

    #[test]
    fn reset_returns_to_empty_state() {
        let mut inflater = Inflater::new(SHARD);
        inflater.extend(b"test");
        assert!(!inflater.compressed.is_empty());

        inflater.reset();
        assert!(inflater.compressed.is_empty());
    }

    #[test]
    fn url_feature_appends_query_param() {
        let mut url = String::from("wss://gateway.discord.gg/?v=10&encoding=json");
        super::add_url_feature(&mut url);

        assert_eq!(
            "wss://gateway.discord.gg/?v=10&encoding=json&compress=zlib-stream",
            url
        );
    }
}
