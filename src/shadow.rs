//! Aligned shadow storage and the per-port format conversion layer.
//!
//! A shadow buffer decouples the client's view of a port from the server's
//! own buffer: the client always sees a contiguous, 32-byte-aligned block in
//! its requested sample format, while copies to and from the server apply the
//! format conversion in one pass. The storage is over-allocated and the
//! aligned interior start is computed once at construction, so the logical
//! base of the buffer differs from the storage base.

use std::ptr;
use std::slice;

use crate::host::ServerPort;
use crate::sample::{self, SampleFormat};

/// Alignment of every shadow buffer base pointer, in bytes.
pub const BUF_ALIGN_BYTES: usize = 32;
/// Upper bound on frames per server cycle the shadow storage can hold.
pub const BUFFER_SIZE_MAX: usize = 8192;

const SHADOW_BYTES: usize = BUFFER_SIZE_MAX * 4;

pub(crate) struct AlignedBuffer {
    storage: Vec<u8>,
    start: usize,
}

impl AlignedBuffer {
    fn new() -> Self {
        let storage = vec![0u8; SHADOW_BYTES + BUF_ALIGN_BYTES];
        let start = storage.as_ptr().align_offset(BUF_ALIGN_BYTES);
        Self { storage, start }
    }

    fn ptr_at(&mut self, byte_offset: usize) -> *mut u8 {
        unsafe { self.storage.as_mut_ptr().add(self.start + byte_offset) }
    }

    fn bytes_mut(&mut self, byte_offset: usize, len: usize) -> &mut [u8] {
        &mut self.storage[self.start + byte_offset..self.start + byte_offset + len]
    }

    fn move_to_base(&mut self, byte_offset: usize, len: usize) {
        let from = self.start + byte_offset;
        self.storage.copy_within(from..from + len, self.start);
    }
}

/// Pass-through converter for ports the client accesses in the server-native
/// format without period adaptation. Owns no storage.
pub struct ForwardPort {
    port: ServerPort,
    buffer: *mut f32,
}

impl ForwardPort {
    /// Wrap a server port without any shadow storage.
    pub fn new(port: ServerPort) -> Self {
        Self {
            port,
            buffer: ptr::null_mut(),
        }
    }

    /// Server buffer for `frames` frames. The pointer is cached so a
    /// following `set` with the same pointer elides the copy.
    pub fn get(&mut self, frames: u32) -> *mut f32 {
        self.buffer = self.port.buffer(frames);
        self.buffer
    }

    /// Copy `frames` floats from `src` into the server buffer, unless `src`
    /// is the pointer the last `get` returned.
    pub fn set(&mut self, src: *const f32, frames: u32) {
        if src == self.buffer as *const f32 {
            return;
        }
        let dst = self.port.buffer(frames);
        if dst.is_null() {
            return;
        }
        unsafe { ptr::copy_nonoverlapping(src, dst, frames as usize) };
    }
}

/// Format converter owning an aligned shadow buffer for one server port.
///
/// For `SampleFormat::Float` the copies are plain memcpys; for the integer
/// formats every copy applies the quantization bound at construction.
pub struct ShadowConverter {
    port: ServerPort,
    format: SampleFormat,
    sample_size: usize,
    buf: AlignedBuffer,
}

impl ShadowConverter {
    /// Allocate the shadow storage for `port` in the given client format.
    pub fn new(port: ServerPort, format: SampleFormat) -> Self {
        Self {
            port,
            format,
            sample_size: format.sample_size(),
            buf: AlignedBuffer::new(),
        }
    }

    /// Bytes per shadow sample.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Aligned shadow pointer `frame_offset` frames past the logical base.
    pub fn shadow_at(&mut self, frame_offset: u32) -> *mut u8 {
        self.buf.ptr_at(frame_offset as usize * self.sample_size)
    }

    /// Zero the first `frames` frames of the shadow buffer.
    pub fn silence_shadow(&mut self, frames: u32) {
        self.buf
            .bytes_mut(0, frames as usize * self.sample_size)
            .fill(0);
    }

    pub(crate) fn compact(&mut self, frame_offset: u32, frames: u32) {
        self.buf.move_to_base(
            frame_offset as usize * self.sample_size,
            frames as usize * self.sample_size,
        );
    }

    /// Convert `frames` server frames starting at `server_offset` into the
    /// shadow buffer starting at `shadow_offset`. Returns the shadow pointer
    /// of the copied region, or `None` when the server buffer is unavailable
    /// this cycle (the host has already reported the cause).
    pub fn copy_from_server(
        &mut self,
        shadow_offset: u32,
        server_offset: u32,
        frames: u32,
    ) -> Option<*mut u8> {
        let src = self.port.buffer(frames + server_offset);
        if src.is_null() {
            return None;
        }
        let n = frames as usize;
        let ss = self.sample_size;
        let format = self.format;
        let dst = self.buf.bytes_mut(shadow_offset as usize * ss, n * ss);
        unsafe {
            let src = src.add(server_offset as usize);
            match format {
                SampleFormat::Float => {
                    ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), n * ss)
                }
                SampleFormat::Int16 => {
                    sample::i16_from_float(dst, slice::from_raw_parts(src, n), n, ss)
                }
                SampleFormat::Int32 => {
                    sample::i32_from_float(dst, slice::from_raw_parts(src, n), n, ss)
                }
            }
        }
        Some(self.shadow_at(shadow_offset))
    }

    /// Convert `frames` shadow-format samples read from `src` (advanced by
    /// `src_offset` frames) into the server buffer starting at
    /// `server_offset`. An unavailable server buffer is silently skipped.
    ///
    /// # Safety
    ///
    /// `src` must reference at least `src_offset + frames` frames of samples
    /// in this converter's format.
    pub unsafe fn copy_to_server(
        &mut self,
        src: *const u8,
        src_offset: u32,
        server_offset: u32,
        frames: u32,
    ) {
        let dst = self.port.buffer(frames + server_offset);
        if dst.is_null() {
            return;
        }
        let n = frames as usize;
        let ss = self.sample_size;
        unsafe {
            let src = src.add(src_offset as usize * ss);
            let dst = dst.add(server_offset as usize);
            match self.format {
                SampleFormat::Float => {
                    ptr::copy_nonoverlapping(src, dst as *mut u8, n * ss)
                }
                SampleFormat::Int16 => sample::float_from_i16(
                    slice::from_raw_parts_mut(dst, n),
                    slice::from_raw_parts(src, n * ss),
                    n,
                    ss,
                ),
                SampleFormat::Int32 => sample::float_from_i32(
                    slice::from_raw_parts_mut(dst, n),
                    slice::from_raw_parts(src, n * ss),
                    n,
                    ss,
                ),
            }
        }
    }

    /// Fetch a full block of `frames` frames into the shadow base and return
    /// it, or `None` when the server buffer is unavailable.
    pub fn get(&mut self, frames: u32) -> Option<*mut u8> {
        self.copy_from_server(0, 0, frames)
    }

    /// Write a full block of `frames` client-format frames to the server.
    ///
    /// # Safety
    ///
    /// `src` must reference at least `frames` frames in this converter's
    /// format.
    pub unsafe fn set(&mut self, src: *const u8, frames: u32) {
        unsafe { self.copy_to_server(src, 0, 0, frames) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_int, c_void};
    use crate::host::ServerHost;

    unsafe extern "C" fn no_buffer_size(_client: *mut c_void) -> u32 {
        0
    }

    unsafe extern "C" fn no_set_callback(
        _client: *mut c_void,
        _callback: crate::host::ProcessCallback,
        _arg: *mut c_void,
    ) -> c_int {
        -1
    }

    unsafe extern "C" fn no_port_buffer(
        _client: *mut c_void,
        _port: *mut c_void,
        _frames: u32,
    ) -> *mut f32 {
        std::ptr::null_mut()
    }

    unsafe extern "C" fn no_port_flags(_client: *mut c_void, _port: *mut c_void) -> c_int {
        -1
    }

    fn detached_port() -> ServerPort {
        let host = ServerHost {
            client: std::ptr::null_mut(),
            buffer_size: no_buffer_size,
            set_process_callback: no_set_callback,
            port_buffer: no_port_buffer,
            port_flags: no_port_flags,
        };
        ServerPort::new(host, std::ptr::null_mut())
    }

    #[test]
    fn shadow_base_is_32_byte_aligned() {
        for format in [SampleFormat::Float, SampleFormat::Int16, SampleFormat::Int32] {
            let mut conv = ShadowConverter::new(detached_port(), format);
            assert_eq!(conv.shadow_at(0) as usize % BUF_ALIGN_BYTES, 0);
        }
    }

    #[test]
    fn shadow_offsets_step_by_sample_size() {
        let mut conv = ShadowConverter::new(detached_port(), SampleFormat::Int16);
        let base = conv.shadow_at(0) as usize;
        assert_eq!(conv.shadow_at(7) as usize - base, 7 * 2);
    }

    #[test]
    fn silence_zeroes_the_requested_prefix() {
        let mut conv = ShadowConverter::new(detached_port(), SampleFormat::Int32);
        let n = 16usize;
        unsafe {
            std::slice::from_raw_parts_mut(conv.shadow_at(0), n * 4).fill(0xAA);
        }
        conv.silence_shadow(8);
        let bytes = unsafe { std::slice::from_raw_parts(conv.shadow_at(0), n * 4) };
        assert!(bytes[..32].iter().all(|&b| b == 0));
        assert!(bytes[32..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn unavailable_server_buffer_yields_none() {
        let mut conv = ShadowConverter::new(detached_port(), SampleFormat::Float);
        assert!(conv.copy_from_server(0, 0, 64).is_none());
        assert!(conv.get(64).is_none());
    }

    #[test]
    fn compact_moves_the_tail_to_the_base() {
        let mut conv = ShadowConverter::new(detached_port(), SampleFormat::Int32);
        unsafe {
            let all = std::slice::from_raw_parts_mut(conv.shadow_at(0) as *mut i32, 8);
            for (i, v) in all.iter_mut().enumerate() {
                *v = i as i32;
            }
        }
        conv.compact(5, 3);
        let head = unsafe { std::slice::from_raw_parts(conv.shadow_at(0) as *const i32, 3) };
        assert_eq!(head, [5, 6, 7]);
    }
}
