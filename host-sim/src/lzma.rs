// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Headerless LZMA1 payloads.
//!
//! The host strips the 13-byte `.lzma` header, the device knows the properties
//! in advance and never learns the unpacked size from the stream.

use std::io::{Read, Write};

use lzma_rs::{compress, decompress};
use manager::Decompressor;

use crate::Error;

/// Length of the `.lzma` header: properties, dictionary size, unpacked size.
const HEADER_LEN: usize = 13;

/// lc=3 lp=0 pb=2 and a 16 KiB dictionary.
pub const PROPERTIES: [u8; 5] = [0x5d, 0x00, 0x40, 0x00, 0x00];

/// Compresses `data` into a raw LZMA1 stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let options = compress::Options {
        unpacked_size: compress::UnpackedSize::WriteToHeader(None),
    };
    lzma_rs::lzma_compress_with_options(&mut &data[..], &mut out, &options)
        .map_err(Error::Compress)?;
    if out.len() < HEADER_LEN {
        return Err(Error::Compress(std::io::ErrorKind::UnexpectedEof.into()));
    }
    out.drain(..HEADER_LEN);
    Ok(out)
}

/// The device-side decoder.
#[derive(Debug, Default)]
pub struct LzmaInflater;

impl Decompressor for LzmaInflater {
    fn inflate(&mut self, dst: &mut [u8], src: &[u8]) -> usize {
        let mut input = (&PROPERTIES[..]).chain(src);
        let mut output = Bounded { buf: dst, len: 0 };
        let options = decompress::Options {
            unpacked_size: decompress::UnpackedSize::UseProvided(None),
            ..Default::default()
        };
        match lzma_rs::lzma_decompress_with_options(&mut input, &mut output, &options) {
            Ok(()) => output.len,
            Err(e) => {
                tracing::debug!("lzma: {e}");
                0
            }
        }
    }
}

/// A writer that fails instead of growing past its slice.
struct Bounded<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for Bounded<'_> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let room = &mut self.buf[self.len..];
        if data.len() > room.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "decompressed data overflows the buffer",
            ));
        }
        room[..data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i / 100) as u8).collect();
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len());

        let mut out = vec![0; 256 << 10];
        let n = LzmaInflater.inflate(&mut out, &packed);
        assert_eq!(n, data.len());
        assert_eq!(&out[..n], &data[..]);
    }

    #[test]
    fn overflow_is_a_failure() {
        let data = vec![0x42; 4096];
        let packed = compress(&data).unwrap();
        let mut out = vec![0; 1024];
        assert_eq!(LzmaInflater.inflate(&mut out, &packed), 0);
    }

    #[test]
    fn truncated_is_a_failure() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packed = compress(&data).unwrap();
        let mut out = vec![0; 8192];
        assert_eq!(LzmaInflater.inflate(&mut out, &packed[..packed.len() / 2]), 0);
        assert_eq!(LzmaInflater.inflate(&mut out, &[]), 0);
    }
}
