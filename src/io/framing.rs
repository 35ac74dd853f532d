//! Frame assembly for the serial channels
//!
//! Serial reads arrive in arbitrary pieces. Each channel owns one assembler that
//! turns those pieces into frames:
//! - Bill acceptor: fixed 8-byte chunks, every chunk is a frame candidate
//! - Coin changer: fixed 24-byte chunks (the changer's reply unit, used as-is for
//!   tube status), then marker framing from 0x06 up to the 0x10 0x03 trailer
//!
//! Assemblers never block and silently drop bytes they cannot frame.

use bytes::{Buf, Bytes, BytesMut};

/// Coin event frames start at this byte
pub const FRAME_MARKER: u8 = 0x06;
/// Coin event frames end with these two bytes (inclusive)
pub const FRAME_TRAILER: [u8; 2] = [0x10, 0x03];

/// Bill acceptor chunk length
pub const BILL_CHUNK_LEN: usize = 8;
/// Coin changer chunk length
pub const COIN_CHUNK_LEN: usize = 24;
/// Coin buffer bound (100 hex characters)
pub const DEFAULT_BUFFER_LIMIT: usize = 50;
/// Bytes kept after the bound is exceeded (50 hex characters)
pub const DEFAULT_BUFFER_KEEP: usize = 25;

/// One complete protocol unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Frame(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Upper-case hex for logs
    pub fn hex(&self) -> String {
        hex::encode_upper(&self.0)
    }

    /// True if `needle` occurs anywhere in the frame
    pub fn contains(&self, needle: &[u8]) -> bool {
        !needle.is_empty() && self.0.windows(needle.len()).any(|w| w == needle)
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Frame(Bytes::copy_from_slice(bytes))
    }
}

/// Cuts a byte stream into fixed-length chunks
#[derive(Debug)]
pub struct ChunkAssembler {
    chunk_len: usize,
    buffer: BytesMut,
}

impl ChunkAssembler {
    pub fn new(chunk_len: usize) -> Self {
        let chunk_len = chunk_len.max(1);
        Self { chunk_len, buffer: BytesMut::with_capacity(chunk_len * 4) }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while self.buffer.len() >= self.chunk_len {
            frames.push(Frame(self.buffer.split_to(self.chunk_len).freeze()));
        }
        frames
    }

    /// Bytes waiting for the rest of their chunk
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Extracts marker/trailer delimited frames from a bounded buffer
#[derive(Debug)]
pub struct MarkerAssembler {
    buffer: BytesMut,
    limit: usize,
    keep: usize,
    dropped: u64,
}

impl MarkerAssembler {
    /// `limit` is the largest buffer tolerated between reads; past it, only the
    /// last `keep` bytes survive.
    pub fn new(limit: usize, keep: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(limit * 2),
            limit,
            keep: keep.min(limit),
            dropped: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some((start, end)) = self.next_bounds() {
            if start > 0 {
                self.buffer.advance(start);
                self.dropped += start as u64;
            }
            let frame = self.buffer.split_to(end - start).freeze();
            frames.push(Frame(frame));
        }

        if self.buffer.len() > self.limit {
            let excess = self.buffer.len() - self.keep;
            tracing::debug!(discarded = excess, "frame_buffer_truncated");
            self.buffer.advance(excess);
            self.dropped += excess as u64;
        }

        frames
    }

    /// (marker index, index one past the trailer)
    fn next_bounds(&self) -> Option<(usize, usize)> {
        let start = self.buffer.iter().position(|&b| b == FRAME_MARKER)?;
        let trailer = self.buffer[start + 1..]
            .windows(FRAME_TRAILER.len())
            .position(|w| w == FRAME_TRAILER)?;
        Some((start, start + 1 + trailer + FRAME_TRAILER.len()))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes discarded as unframeable
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Output of one `FrameAssembler::feed` call
#[derive(Debug, Default)]
pub struct Assembled {
    /// Raw fixed-length chunks (reply units)
    pub chunks: Vec<Frame>,
    /// Protocol frames to evaluate
    pub frames: Vec<Frame>,
}

/// Per-channel framing strategy
#[derive(Debug)]
pub enum FrameAssembler {
    /// Every chunk is a frame (bill acceptor)
    Fixed(ChunkAssembler),
    /// Chunks feed a marker assembler (coin changer)
    Delimited { chunks: ChunkAssembler, frames: MarkerAssembler },
}

impl FrameAssembler {
    pub fn fixed(chunk_len: usize) -> Self {
        FrameAssembler::Fixed(ChunkAssembler::new(chunk_len))
    }

    pub fn delimited(chunk_len: usize, limit: usize, keep: usize) -> Self {
        FrameAssembler::Delimited {
            chunks: ChunkAssembler::new(chunk_len),
            frames: MarkerAssembler::new(limit, keep),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Assembled {
        match self {
            FrameAssembler::Fixed(chunker) => {
                let chunks = chunker.feed(bytes);
                Assembled { frames: chunks.clone(), chunks }
            }
            FrameAssembler::Delimited { chunks: chunker, frames: marker } => {
                let chunks = chunker.feed(bytes);
                let mut frames = Vec::new();
                for chunk in &chunks {
                    frames.extend(marker.feed(chunk.as_bytes()));
                }
                Assembled { chunks, frames }
            }
        }
    }
}
