#![deny(missing_docs)]

//! Port format and period-size adaptation between a realtime audio server and
//! a client processing callback.
//!
//! The server drives its clients with a fixed per-cycle block size; a client
//! wrapped by this crate instead registers its callback through a
//! [`BufferAdapter`] and is invoked with its own preferred period, which may
//! be larger or smaller than the server period and need not divide it evenly.
//! Each wrapped port additionally exposes its samples in a client-chosen
//! format (normalized `f32`, `i16` or `i32`) through an aligned, adapter-owned
//! shadow buffer. The processing path performs no allocation and takes no
//! locks; construction and destruction happen while the audio graph is
//! quiescent.
//!
//! The server itself is out of scope: it is reached through the function
//! table in [`host::ServerHost`], and everything crossing the C ABI uses
//! opaque handles created and destroyed by the `frame_bridge_*` functions.

use std::collections::VecDeque;
use std::ffi::{CString, c_char, c_int, c_void};
use std::ptr::{self, NonNull};
use std::sync::Once;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::error;

use crate::host::{PORT_IS_OUTPUT, ProcessCallback, ServerHost, ServerPort};
use crate::period::{Advance, InputAdapter, OutputAdapter, silence_prefill};
use crate::sample::SampleFormat;
use crate::shadow::{ForwardPort, ShadowConverter};

pub mod host;
pub mod period;
pub mod sample;
pub mod shadow;


/// Destination format value selecting the server-native `f32` layout.
pub const FORMAT_DEFAULT: c_int = 0;
/// Destination format value selecting 16-bit signed integer samples.
pub const FORMAT_INT16: c_int = 1;
/// Destination format value selecting 32-bit signed integer samples.
pub const FORMAT_INT32: c_int = 2;

static LOG_BUFFER: Lazy<Mutex<VecDeque<String>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(64)));
static LOG_CACHE: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));
static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

pub(crate) fn emit_error(line: impl Into<String>) {
    let line = line.into();
    error!("{line}");
    let mut guard = LOG_BUFFER.lock();
    guard.push_back(line);
    while guard.len() > 256 {
        guard.pop_front();
    }
}

/// Error enumeration surfaced across the public API and the diagnostic sink.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// The adapter was driven without any registered input ports.
    #[error("processing called without any input ports")]
    NoInputPorts,
    /// An input shadow buffer held more frames than one client period.
    #[error("input shadow buffer holds {have} frames, more than the client period of {limit}")]
    InputOverrun {
        /// Frames found staged in the shadow buffer.
        have: u32,
        /// Configured client period.
        limit: u32,
    },
    /// An output shadow buffer held more frames than one drain can consume.
    #[error("output shadow buffer holds {have} frames, more than the draining limit of {limit}")]
    OutputOverrun {
        /// Frames found staged in the shadow buffer.
        have: u32,
        /// Largest staging the drain supports.
        limit: u32,
    },
    /// A buffer was requested with a frame count other than the configured
    /// client period.
    #[error("requested frames ({requested}) differ from configuration ({configured})")]
    FrameMismatch {
        /// Frame count the caller asked for.
        requested: u32,
        /// Client period fixed at construction.
        configured: u32,
    },
    /// `set` was called on an input port.
    #[error("set() is not allowed on input ports")]
    SetOnInput,
    /// The requested destination sample format is not supported.
    #[error("port converter requested with an unsupported destination format")]
    UnsupportedFormat,
    /// The server failed to report the direction flags of a port.
    #[error("reading the port direction flags from the server failed")]
    PortFlags,
    /// The server rejected the process callback registration.
    #[error("registering the server process callback failed")]
    CallbackRegistration,
}

impl BridgeError {
    fn status(&self) -> c_int {
        match self {
            BridgeError::InputOverrun { .. } | BridgeError::OutputOverrun { .. } => -22,
            _ => -1,
        }
    }
}

/// One converter wrapping one server port. A single handle type covers every
/// variant so the per-port API stays uniform.
pub enum PortConverter {
    /// Pass-through to the server buffer; no shadow storage, no period
    /// adaptation.
    Forward(ForwardPort),
    /// Format conversion through an aligned shadow buffer, driven directly by
    /// the caller without an adapter.
    Shadow(ShadowConverter),
    /// Period-adapted capture side, registered with a [`BufferAdapter`].
    Input(InputAdapter),
    /// Period-adapted playback side, registered with a [`BufferAdapter`].
    Output(OutputAdapter),
}

unsafe impl Send for PortConverter {}

impl PortConverter {
    /// Typed buffer of `frames` frames for this port, or null.
    ///
    /// Adapted ports only accept their configured client period and return
    /// the aligned shadow region; `Forward` returns the server buffer itself
    /// and `Shadow` fetches and converts a fresh block.
    pub fn get(&mut self, frames: u32) -> *mut c_void {
        match self {
            PortConverter::Forward(port) => port.get(frames) as *mut c_void,
            PortConverter::Shadow(conv) => conv
                .get(frames)
                .map_or(ptr::null_mut(), |p| p as *mut c_void),
            PortConverter::Input(adapter) => adapter
                .buffer(frames)
                .map_or(ptr::null_mut(), |p| p as *mut c_void),
            PortConverter::Output(adapter) => adapter
                .buffer(frames)
                .map_or(ptr::null_mut(), |p| p as *mut c_void),
        }
    }

    /// Overwrite this port's audio with `frames` frames from `src`.
    ///
    /// A `src` equal to the pointer just returned by [`PortConverter::get`]
    /// is recognized and elided. Calling this on an input port is an error
    /// and a no-op.
    ///
    /// # Safety
    ///
    /// `src` must reference at least `frames` frames in this converter's
    /// sample format.
    pub unsafe fn set(&mut self, src: *const c_void, frames: u32) {
        match self {
            PortConverter::Forward(port) => port.set(src as *const f32, frames),
            PortConverter::Shadow(conv) => unsafe { conv.set(src as *const u8, frames) },
            PortConverter::Input(_) => emit_error(BridgeError::SetOnInput.to_string()),
            PortConverter::Output(adapter) => unsafe { adapter.set(src as *const u8, frames) },
        }
    }
}

struct Trampoline {
    adapter: *mut BufferAdapter,
}

/// Aggregates the period adapters of one client and multiplexes the server's
/// process callback into client callbacks of the configured period.
///
/// The adapter does not own the registered port converters; each one stays
/// owned by the handle returned from [`frame_bridge_port_create`]. Ports are
/// registered between adapter creation and activation, and every registered
/// port must be destroyed only once the server can no longer invoke the
/// process callback.
pub struct BufferAdapter {
    host: ServerHost,
    callback: ProcessCallback,
    arg: *mut c_void,
    dst_frames: u32,
    silence_prefill: u32,
    inputs: Vec<NonNull<InputAdapter>>,
    outputs: Vec<NonNull<OutputAdapter>>,
    trampoline: Box<Trampoline>,
}

unsafe impl Send for BufferAdapter {}

impl BufferAdapter {
    /// Client period this adapter was configured with.
    pub fn dst_frames(&self) -> u32 {
        self.dst_frames
    }

    /// Silent frames seeded into every input port at registration.
    pub fn silence_prefill(&self) -> u32 {
        self.silence_prefill
    }

    fn register(&mut self, converter: &mut PortConverter) {
        match converter {
            PortConverter::Input(adapter) => self.inputs.push(NonNull::from(adapter)),
            PortConverter::Output(adapter) => self.outputs.push(NonNull::from(adapter)),
            _ => {}
        }
    }

    fn process(&mut self, server_frames: u32) -> c_int {
        if self.inputs.is_empty() {
            let err = BridgeError::NoInputPorts;
            emit_error(err.to_string());
            return err.status();
        }
        loop {
            let mut state = Advance::Ready;
            for input in &self.inputs {
                match unsafe { &mut *input.as_ptr() }.advance(server_frames) {
                    Ok(Advance::Ready) => {}
                    Ok(Advance::NotReady) => state = Advance::NotReady,
                    Err(err) => {
                        emit_error(err.to_string());
                        return err.status();
                    }
                }
            }
            if state != Advance::Ready {
                break;
            }
            let ret = unsafe { (self.callback)(self.dst_frames, self.arg) };
            if ret < 0 {
                return ret;
            }
            for output in &self.outputs {
                unsafe { &mut *output.as_ptr() }.note_client_wrote();
            }
        }
        for output in &self.outputs {
            if let Err(err) = unsafe { &mut *output.as_ptr() }.advance(server_frames) {
                emit_error(err.to_string());
                return err.status();
            }
        }
        0
    }
}

unsafe extern "C" fn process_trampoline(frames: u32, arg: *mut c_void) -> c_int {
    let trampoline = unsafe { &*(arg as *const Trampoline) };
    if trampoline.adapter.is_null() {
        return -1;
    }
    unsafe { (*trampoline.adapter).process(frames) }
}

/// Create a buffer adapter multiplexing the server cycle into client
/// callbacks of `dst_frames` frames.
///
/// Registers the adapter's own process callback with the host; `callback` is
/// from then on driven only through the adapter, with `arg` passed back
/// verbatim. Returns null when `host`, `callback` or `arg` is null, when
/// `dst_frames` or the server period is zero, or when the host rejects the
/// callback registration.
///
/// # Safety
///
/// `host` must point to a valid [`ServerHost`] whose entry points remain
/// callable for the lifetime of the adapter.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_adapter_create(
    host: *const ServerHost,
    callback: Option<ProcessCallback>,
    arg: *mut c_void,
    dst_frames: u32,
) -> *mut BufferAdapter {
    init_tracing();
    let Some(host) = (unsafe { host.as_ref() }) else {
        emit_error("server host is NULL");
        return ptr::null_mut();
    };
    let Some(callback) = callback else {
        emit_error("client callback is NULL");
        return ptr::null_mut();
    };
    if arg.is_null() {
        emit_error("client callback argument is NULL");
        return ptr::null_mut();
    }
    if dst_frames == 0 || dst_frames as usize > shadow::BUFFER_SIZE_MAX {
        emit_error(format!(
            "client period of {dst_frames} frames is outside the supported range"
        ));
        return ptr::null_mut();
    }
    let server_frames = unsafe { (host.buffer_size)(host.client) };
    if server_frames == 0 {
        emit_error("server reported a period of zero frames");
        return ptr::null_mut();
    }

    let adapter = Box::new(BufferAdapter {
        host: *host,
        callback,
        arg,
        dst_frames,
        silence_prefill: silence_prefill(dst_frames, server_frames),
        inputs: Vec::new(),
        outputs: Vec::new(),
        trampoline: Box::new(Trampoline {
            adapter: ptr::null_mut(),
        }),
    });
    let raw = Box::into_raw(adapter);
    unsafe {
        (*raw).trampoline.adapter = raw;
        let arg = &mut *(*raw).trampoline as *mut Trampoline as *mut c_void;
        if ((*raw).host.set_process_callback)((*raw).host.client, process_trampoline, arg) != 0 {
            emit_error(BridgeError::CallbackRegistration.to_string());
            drop(Box::from_raw(raw));
            return ptr::null_mut();
        }
    }
    raw
}

/// Destroy an adapter created by [`frame_bridge_adapter_create`].
///
/// # Safety
///
/// `handle` must be null or a pointer previously returned by
/// [`frame_bridge_adapter_create`] that has not been destroyed, the server
/// must no longer invoke the registered process callback, and every port
/// converter registered with the adapter must already be destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_adapter_destroy(handle: *mut BufferAdapter) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Client period of the adapter in frames, or `0` for a null handle.
///
/// # Safety
///
/// `handle` must be null or a live adapter handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_adapter_dst_frames(handle: *const BufferAdapter) -> u32 {
    if handle.is_null() {
        return 0;
    }
    unsafe { (*handle).dst_frames() }
}

/// Silent frames seeded into each input port of the adapter, or `0` for a
/// null handle.
///
/// # Safety
///
/// `handle` must be null or a live adapter handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_adapter_silence_prefill(
    handle: *const BufferAdapter,
) -> u32 {
    if handle.is_null() {
        return 0;
    }
    unsafe { (*handle).silence_prefill() }
}

/// Create a converter for one server port.
///
/// With `dst_type == FORMAT_DEFAULT` and a null `adapter` the converter is a
/// plain pass-through without shadow storage. Any other combination owns an
/// aligned shadow buffer; when `adapter` is non-null the converter is
/// additionally registered with it under the port's direction and from then
/// on only accepts the adapter's client period. Returns null for an unknown
/// `dst_type` or when the port's direction flags cannot be read.
///
/// # Safety
///
/// `host` must point to a valid [`ServerHost`]; `port` must stay a valid port
/// handle of that host for the converter's lifetime; `adapter` must be null
/// or a live handle created against the same host, not yet activated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_port_create(
    host: *const ServerHost,
    port: *mut c_void,
    dst_type: c_int,
    adapter: *mut BufferAdapter,
) -> *mut PortConverter {
    let Some(host) = (unsafe { host.as_ref() }) else {
        emit_error("server host is NULL");
        return ptr::null_mut();
    };
    let server_port = ServerPort::new(*host, port);

    let format = match dst_type {
        FORMAT_DEFAULT if adapter.is_null() => {
            let converter = PortConverter::Forward(ForwardPort::new(server_port));
            return Box::into_raw(Box::new(converter));
        }
        FORMAT_DEFAULT => SampleFormat::Float,
        FORMAT_INT16 => SampleFormat::Int16,
        FORMAT_INT32 => SampleFormat::Int32,
        _ => {
            emit_error(BridgeError::UnsupportedFormat.to_string());
            return ptr::null_mut();
        }
    };
    let conv = ShadowConverter::new(server_port, format);
    if adapter.is_null() {
        return Box::into_raw(Box::new(PortConverter::Shadow(conv)));
    }

    let flags = server_port.flags();
    if flags < 0 {
        emit_error(BridgeError::PortFlags.to_string());
        return ptr::null_mut();
    }
    let adapter = unsafe { &mut *adapter };
    let converter = if flags & PORT_IS_OUTPUT != 0 {
        PortConverter::Output(OutputAdapter::new(conv, adapter.dst_frames()))
    } else {
        PortConverter::Input(InputAdapter::new(
            conv,
            adapter.dst_frames(),
            adapter.silence_prefill(),
        ))
    };
    let raw = Box::into_raw(Box::new(converter));
    adapter.register(unsafe { &mut *raw });
    raw
}

/// Destroy a port converter created by [`frame_bridge_port_create`].
///
/// # Safety
///
/// `handle` must be null or a pointer previously returned by
/// [`frame_bridge_port_create`] that has not been destroyed. A converter
/// registered with an adapter may only be destroyed once the server can no
/// longer invoke that adapter's process callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_port_destroy(handle: *mut PortConverter) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Typed buffer of `frames` frames for the port, or null.
///
/// For adapted ports `frames` must equal the adapter's client period and is
/// otherwise rejected with an error. The returned pointer is only valid until
/// the current callback returns.
///
/// # Safety
///
/// `handle` must be null or a live port converter handle, and calls on one
/// handle must be serialized by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_port_get(
    handle: *mut PortConverter,
    frames: u32,
) -> *mut c_void {
    if handle.is_null() {
        emit_error("port converter handle is NULL");
        return ptr::null_mut();
    }
    unsafe { (*handle).get(frames) }
}

/// Overwrite the port's audio with `frames` frames from `buf`. Only allowed
/// on output and pass-through ports; a `buf` equal to the pointer returned by
/// the matching [`frame_bridge_port_get`] call is elided.
///
/// # Safety
///
/// `handle` must be null or a live port converter handle; `buf` must
/// reference at least `frames` frames in the converter's sample format; calls
/// on one handle must be serialized by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn frame_bridge_port_set(
    handle: *mut PortConverter,
    buf: *const c_void,
    frames: u32,
) {
    if handle.is_null() {
        emit_error("port converter handle is NULL");
        return;
    }
    unsafe { (*handle).set(buf, frames) };
}

/// Pop the next diagnostic line emitted by the adaptation layer. Returns
/// `NULL` when no lines remain; the returned pointer stays valid until the
/// next call.
#[unsafe(no_mangle)]
pub extern "C" fn frame_bridge_pop_log() -> *const c_char {
    if let Some(message) = LOG_BUFFER.lock().pop_front() {
        let mut cache = LOG_CACHE.lock();
        *cache = Some(CString::new(message).unwrap_or_default());
        cache.as_ref().map(|c| c.as_ptr()).unwrap_or(ptr::null())
    } else {
        ptr::null()
    }
}
