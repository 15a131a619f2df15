//! Streaming decompression for `compress=zlib-stream` connections.
//!
//! With transport compression the gateway sends one continuous zlib stream,
//! chopped into WebSocket binary messages. A frame boundary is marked by the
//! stream ending with the four-byte flush marker `00 00 FF FF`; only then is
//! the accumulated input a complete payload. The [`Decompress`] state lives
//! for the whole connection and must be reset when the connection is.

use flate2::{Decompress, FlushDecompress, Status};

use super::GatewayError;
use crate::internal::prelude::*;

/// The marker terminating every zlib-stream frame.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// How much output space to grow by per inflate round.
const OUTPUT_CHUNK: usize = 16 * 1024;

pub(super) struct Inflater {
    decompress: Decompress,
    compressed: Vec<u8>,
}

impl Inflater {
    pub(super) fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            compressed: Vec::new(),
        }
    }

    /// Feeds one binary WebSocket message. Returns the decompressed payload
    /// once the buffered input ends with the flush marker; `None` while the
    /// frame is still incomplete.
    pub(super) fn inflate(&mut self, data: &[u8]) -> Result<Option<String>> {
        self.compressed.extend_from_slice(data);

        if !self.compressed.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut output = Vec::with_capacity(OUTPUT_CHUNK);
        let mut offset = 0usize;

        loop {
            output.reserve(OUTPUT_CHUNK);

            let in_before = self.decompress.total_in();
            let status = self
                .decompress
                .decompress_vec(&self.compressed[offset..], &mut output, FlushDecompress::Sync)
                .map_err(|_| Error::Gateway(GatewayError::Compression))?;
            offset += (self.decompress.total_in() - in_before) as usize;

            match status {
                // The stream never ends mid-connection; a sync flush leaves
                // it open for the next frame.
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if offset >= self.compressed.len() && output.len() < output.capacity() {
                        break;
                    }
                },
            }
        }

        self.compressed.clear();

        match String::from_utf8(output) {
            Ok(text) => Ok(Some(text)),
            Err(_) => Err(Error::Gateway(GatewayError::Compression)),
        }
    }

    /// Drops all buffered input and stream state, for a fresh connection.
    pub(super) fn reset(&mut self) {
        self.decompress.reset(true);
        self.compressed.clear();
    }
}
