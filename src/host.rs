//! Host-facing seam between the adaptation layer and the audio server.
//!
//! The server is reached exclusively through a caller-provided table of entry
//! points, so the crate never links against a concrete server library. All
//! pointers handed through this module stay owned by the host; the core only
//! borrows them for the duration of a single call.

use std::ffi::{c_int, c_void};

/// Processing callback signature shared by the server process callback and the
/// client callback driven by the adapter. Returns `0` on success; a negative
/// value aborts the current cycle and surfaces to the server.
pub type ProcessCallback = unsafe extern "C" fn(frames: u32, arg: *mut c_void) -> c_int;

/// Flag bit marking a port the client reads from.
pub const PORT_IS_INPUT: c_int = 0x1;
/// Flag bit marking a port the client writes to.
pub const PORT_IS_OUTPUT: c_int = 0x2;

/// Entry points the hosting server exposes to the adaptation layer.
///
/// `client` is an opaque pointer passed back verbatim on every call. The
/// function pointers must stay valid for the lifetime of every adapter and
/// port converter created against this host.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ServerHost {
    /// Opaque server client handle, owned by the host.
    pub client: *mut c_void,
    /// Returns the fixed per-cycle period of the server in frames.
    pub buffer_size: unsafe extern "C" fn(client: *mut c_void) -> u32,
    /// Registers the process callback driven on every server cycle.
    /// Returns `0` on success.
    pub set_process_callback:
        unsafe extern "C" fn(client: *mut c_void, callback: ProcessCallback, arg: *mut c_void) -> c_int,
    /// Returns the server-owned sample buffer of `port` for `frames` frames,
    /// or null when the buffer is unavailable this cycle.
    pub port_buffer:
        unsafe extern "C" fn(client: *mut c_void, port: *mut c_void, frames: u32) -> *mut f32,
    /// Returns the direction flag word of `port`, or a negative value on
    /// failure.
    pub port_flags: unsafe extern "C" fn(client: *mut c_void, port: *mut c_void) -> c_int,
}

/// One server-managed audio port paired with the host that owns it.
///
/// The port must outlive every converter wrapping it; the core never frees it.
#[derive(Clone, Copy)]
pub struct ServerPort {
    host: ServerHost,
    port: *mut c_void,
}

unsafe impl Send for ServerPort {}

impl ServerPort {
    /// Pair an opaque port handle with its host.
    pub fn new(host: ServerHost, port: *mut c_void) -> Self {
        Self { host, port }
    }

    /// Server buffer for this port for `frames` frames, or null.
    pub fn buffer(&self, frames: u32) -> *mut f32 {
        unsafe { (self.host.port_buffer)(self.host.client, self.port, frames) }
    }

    /// Direction flag word of this port, negative on failure.
    pub fn flags(&self) -> c_int {
        unsafe { (self.host.port_flags)(self.host.client, self.port) }
    }
}
