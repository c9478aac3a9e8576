//! Frame handed to stream callbacks.

use bytes::Bytes;

/// Image frame delivered by an acquisition stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Contiguous image payload containing pixel data.
    pub payload: Bytes,
    /// Sequence number assigned by the transport.
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    /// PFNC pixel format code.
    pub pixel_format: u32,
    /// Device timestamp reported by the camera when available.
    pub ts_dev: Option<u64>,
}

impl Frame {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
