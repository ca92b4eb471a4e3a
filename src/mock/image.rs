use std::{io::Write, vec::Vec};

use liblzma::{
    stream::{LzmaOptions, Stream},
    write::XzEncoder,
};
use sha2::{Digest, Sha256};
use zerocopy::IntoBytes;

use crate::{
    BinInfo, UpgradeInfo,
    header::{Flag, UPGRADE_MAGIC},
};

/// Builds a staged container with valid checksums.
pub struct ImageBuilder {
    kind: u16,
    components: Vec<(Flag, u32, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new(kind: u16) -> Self {
        Self {
            kind,
            components: Vec::new(),
        }
    }

    pub fn component(mut self, flag: Flag, dst_addr: u32, payload: &[u8]) -> Self {
        self.components.push((flag, dst_addr, payload.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut body = Vec::new();
        for (flag, dst_addr, payload) in &self.components {
            let mut info = BinInfo::default();
            info.flag.set(flag.raw());
            info.dst_addr.set(*dst_addr);
            info.src_size.set(payload.len() as u32);
            info.hash = Sha256::digest(payload).into();
            info.seal();

            body.extend_from_slice(info.as_bytes());
            body.extend_from_slice(payload);
        }

        let mut header = UpgradeInfo::default();
        header.magic.set(UPGRADE_MAGIC);
        header.kind.set(self.kind);
        header.count.set(self.components.len() as u16);
        header.size.set(body.len() as u32);
        header.hash = Sha256::digest(&body).into();
        header.seal();

        let mut image = header.as_bytes().to_vec();
        image.extend_from_slice(&body);
        image
    }
}

/// Deterministic data which compresses reasonably, but not trivially.
pub fn sample(len: usize) -> Vec<u8> {
    const WORDS: [&[u8]; 6] = [
        b"boot",
        b"loader ",
        b"firmware",
        b"\x00\x00\x00\x00",
        b"upgrade ",
        b"\xde\xad\xbe\xef",
    ];

    let mut seed = 0x1234_5678u32;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let pick = (seed >> 16) as usize;
        if pick % 8 < 3 {
            out.push(pick as u8);
        } else {
            out.extend_from_slice(WORDS[pick % WORDS.len()]);
        }
    }
    out.truncate(len);
    out
}

/// `.lzma` stream with a 4 KiB dictionary, an unknown length and an end marker.
pub fn lzma_compress(data: &[u8], lc: u32, lp: u32) -> Vec<u8> {
    let mut options = LzmaOptions::new_preset(6).unwrap();
    options
        .dict_size(4096)
        .literal_context_bits(lc)
        .literal_position_bits(lp);
    let stream = Stream::new_lzma_encoder(&options).unwrap();

    let mut encoder = XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Declare the uncompressed length in the stream header.
pub fn with_known_size(mut stream: Vec<u8>, len: u64) -> Vec<u8> {
    stream[5..13].copy_from_slice(&len.to_le_bytes());
    stream
}
