use std::ffi::{CStr, c_int, c_void};
use std::ptr;
use std::slice;

use frame_bridge::host::{PORT_IS_INPUT, PORT_IS_OUTPUT, ProcessCallback, ServerHost};
use frame_bridge::sample::INT32_SCALING;
use frame_bridge::{
    FORMAT_INT32, frame_bridge_adapter_create, frame_bridge_adapter_destroy,
    frame_bridge_adapter_dst_frames, frame_bridge_adapter_silence_prefill,
    frame_bridge_pop_log, frame_bridge_port_create, frame_bridge_port_destroy,
    frame_bridge_port_get, frame_bridge_port_set,
};

const BLOCK_FRAMES: u32 = 64;

struct FakeServer {
    period: u32,
    callback: Option<(ProcessCallback, *mut c_void)>,
}

struct FakePort {
    flags: c_int,
    frames: Vec<f32>,
}

unsafe extern "C" fn server_buffer_size(client: *mut c_void) -> u32 {
    unsafe { (*(client as *mut FakeServer)).period }
}

unsafe extern "C" fn server_set_callback(
    client: *mut c_void,
    callback: ProcessCallback,
    arg: *mut c_void,
) -> c_int {
    unsafe { (*(client as *mut FakeServer)).callback = Some((callback, arg)) };
    0
}

unsafe extern "C" fn server_port_buffer(
    _client: *mut c_void,
    port: *mut c_void,
    _frames: u32,
) -> *mut f32 {
    unsafe { (*(port as *mut FakePort)).frames.as_mut_ptr() }
}

unsafe extern "C" fn server_port_flags(_client: *mut c_void, port: *mut c_void) -> c_int {
    unsafe { (*(port as *mut FakePort)).flags }
}

fn host_for(server: &mut FakeServer) -> ServerHost {
    ServerHost {
        client: server as *mut FakeServer as *mut c_void,
        buffer_size: server_buffer_size,
        set_process_callback: server_set_callback,
        port_buffer: server_port_buffer,
        port_flags: server_port_flags,
    }
}

struct LoopbackClient {
    input: *mut frame_bridge::PortConverter,
    output: *mut frame_bridge::PortConverter,
    calls: u32,
}

unsafe extern "C" fn loopback_process(nframes: u32, arg: *mut c_void) -> c_int {
    let client = unsafe { &mut *(arg as *mut LoopbackClient) };
    client.calls += 1;
    let src = unsafe { frame_bridge_port_get(client.input, nframes) } as *mut i32;
    let dst = unsafe { frame_bridge_port_get(client.output, nframes) } as *mut i32;
    assert!(!src.is_null());
    assert!(!dst.is_null());
    unsafe { ptr::copy_nonoverlapping(src, dst, nframes as usize) };
    unsafe { frame_bridge_port_set(client.output, dst as *const c_void, nframes) };
    0
}

fn quantize(x: f32) -> i32 {
    if x <= -1.0 {
        -INT32_SCALING
    } else if x >= 1.0 {
        INT32_SCALING
    } else {
        (x * INT32_SCALING as f32).round() as i32
    }
}

#[test]
fn int32_loopback_round_trips_through_the_adapter() {
    let mut server = FakeServer {
        period: BLOCK_FRAMES,
        callback: None,
    };
    let host = host_for(&mut server);
    let mut in_port = FakePort {
        flags: PORT_IS_INPUT,
        frames: vec![0.0; BLOCK_FRAMES as usize],
    };
    let mut out_port = FakePort {
        flags: PORT_IS_OUTPUT,
        frames: vec![0.0; BLOCK_FRAMES as usize],
    };
    let mut client = LoopbackClient {
        input: ptr::null_mut(),
        output: ptr::null_mut(),
        calls: 0,
    };

    let adapter = unsafe {
        frame_bridge_adapter_create(
            &host,
            Some(loopback_process),
            &mut client as *mut LoopbackClient as *mut c_void,
            BLOCK_FRAMES,
        )
    };
    assert!(!adapter.is_null(), "expected a buffer adapter handle");
    assert_eq!(unsafe { frame_bridge_adapter_dst_frames(adapter) }, BLOCK_FRAMES);
    assert_eq!(unsafe { frame_bridge_adapter_silence_prefill(adapter) }, 0);

    client.input = unsafe {
        frame_bridge_port_create(
            &host,
            &mut in_port as *mut FakePort as *mut c_void,
            FORMAT_INT32,
            adapter,
        )
    };
    client.output = unsafe {
        frame_bridge_port_create(
            &host,
            &mut out_port as *mut FakePort as *mut c_void,
            FORMAT_INT32,
            adapter,
        )
    };
    assert!(!client.input.is_null());
    assert!(!client.output.is_null());

    for (i, sample) in in_port.frames.iter_mut().enumerate() {
        *sample = (i as f32 / BLOCK_FRAMES as f32) - 0.5;
    }
    let (callback, arg) = server.callback.expect("process callback registered");
    assert_eq!(unsafe { callback(BLOCK_FRAMES, arg) }, 0);
    assert_eq!(client.calls, 1);

    let scaling = 1.0 / INT32_SCALING as f32;
    for (i, &out) in out_port.frames.iter().enumerate() {
        let expected = quantize((i as f32 / BLOCK_FRAMES as f32) - 0.5) as f32 * scaling;
        assert_eq!(out, expected, "frame {i} did not round trip");
    }

    unsafe {
        frame_bridge_port_destroy(client.input);
        frame_bridge_port_destroy(client.output);
        frame_bridge_adapter_destroy(adapter);
    }
}

#[test]
fn bare_integer_converter_translates_without_an_adapter() {
    let mut server = FakeServer {
        period: BLOCK_FRAMES,
        callback: None,
    };
    let host = host_for(&mut server);
    let mut port = FakePort {
        flags: PORT_IS_OUTPUT,
        frames: vec![0.0; BLOCK_FRAMES as usize],
    };
    for (i, sample) in port.frames.iter_mut().enumerate() {
        *sample = (i as f32 / BLOCK_FRAMES as f32) - 0.5;
    }
    let original = port.frames.clone();

    let converter = unsafe {
        frame_bridge_port_create(
            &host,
            &mut port as *mut FakePort as *mut c_void,
            FORMAT_INT32,
            ptr::null_mut(),
        )
    };
    assert!(!converter.is_null());

    let buf = unsafe { frame_bridge_port_get(converter, BLOCK_FRAMES) } as *mut i32;
    assert!(!buf.is_null());
    assert_eq!(buf as usize % 32, 0, "shadow buffer misaligned");
    let ints = unsafe { slice::from_raw_parts_mut(buf, BLOCK_FRAMES as usize) };
    for (i, &v) in ints.iter().enumerate() {
        assert_eq!(v, quantize(original[i]), "sample {i} quantized wrong");
    }

    ints.fill(INT32_SCALING / 2);
    unsafe { frame_bridge_port_set(converter, buf as *const c_void, BLOCK_FRAMES) };
    let expected = (INT32_SCALING / 2) as f32 * (1.0 / INT32_SCALING as f32);
    assert!(port.frames.iter().all(|&x| x == expected));

    unsafe { frame_bridge_port_destroy(converter) };
}

#[test]
fn factories_reject_bad_configuration() {
    let mut server = FakeServer {
        period: BLOCK_FRAMES,
        callback: None,
    };
    let host = host_for(&mut server);
    let mut client = 0u64;
    let arg = &mut client as *mut u64 as *mut c_void;

    assert!(
        unsafe { frame_bridge_adapter_create(ptr::null(), Some(loopback_process), arg, 64) }
            .is_null()
    );
    assert!(unsafe { frame_bridge_adapter_create(&host, None, arg, 64) }.is_null());
    assert!(
        unsafe { frame_bridge_adapter_create(&host, Some(loopback_process), ptr::null_mut(), 64) }
            .is_null()
    );
    assert!(
        unsafe { frame_bridge_adapter_create(&host, Some(loopback_process), arg, 0) }.is_null()
    );

    let mut port = FakePort {
        flags: PORT_IS_INPUT,
        frames: vec![0.0; BLOCK_FRAMES as usize],
    };
    let bad_format = 99;
    assert!(
        unsafe {
            frame_bridge_port_create(
                &host,
                &mut port as *mut FakePort as *mut c_void,
                bad_format,
                ptr::null_mut(),
            )
        }
        .is_null()
    );

    // Unreadable direction flags fail the adapter-bound factory.
    let adapter =
        unsafe { frame_bridge_adapter_create(&host, Some(loopback_process), arg, 64) };
    assert!(!adapter.is_null());
    let mut flagless = FakePort {
        flags: -1,
        frames: vec![0.0; BLOCK_FRAMES as usize],
    };
    assert!(
        unsafe {
            frame_bridge_port_create(
                &host,
                &mut flagless as *mut FakePort as *mut c_void,
                FORMAT_INT32,
                adapter,
            )
        }
        .is_null()
    );
    unsafe { frame_bridge_adapter_destroy(adapter) };
}

#[test]
fn null_and_mismatched_handles_degrade_gracefully() {
    let mut server = FakeServer {
        period: BLOCK_FRAMES,
        callback: None,
    };
    let host = host_for(&mut server);

    assert!(unsafe { frame_bridge_port_get(ptr::null_mut(), BLOCK_FRAMES) }.is_null());
    let data = [0.0f32; 4];
    unsafe { frame_bridge_port_set(ptr::null_mut(), data.as_ptr() as *const c_void, 4) };
    assert_eq!(unsafe { frame_bridge_adapter_dst_frames(ptr::null()) }, 0);
    assert_eq!(unsafe { frame_bridge_adapter_silence_prefill(ptr::null()) }, 0);
    unsafe {
        frame_bridge_port_destroy(ptr::null_mut());
        frame_bridge_adapter_destroy(ptr::null_mut());
    }

    // An adapted port only answers for the configured client period, and an
    // input port ignores writes.
    let mut client = 0u64;
    let arg = &mut client as *mut u64 as *mut c_void;
    let adapter =
        unsafe { frame_bridge_adapter_create(&host, Some(loopback_process), arg, 96) };
    assert_eq!(unsafe { frame_bridge_adapter_silence_prefill(adapter) }, 96);

    let mut in_port = FakePort {
        flags: PORT_IS_INPUT,
        frames: vec![0.5; BLOCK_FRAMES as usize],
    };
    let input = unsafe {
        frame_bridge_port_create(
            &host,
            &mut in_port as *mut FakePort as *mut c_void,
            FORMAT_INT32,
            adapter,
        )
    };
    assert!(unsafe { frame_bridge_port_get(input, 32) }.is_null());
    assert!(!unsafe { frame_bridge_port_get(input, 96) }.is_null());

    let junk = vec![1i32; 96];
    unsafe { frame_bridge_port_set(input, junk.as_ptr() as *const c_void, 96) };
    assert_eq!(in_port.frames, vec![0.5; BLOCK_FRAMES as usize]);

    unsafe {
        frame_bridge_port_destroy(input);
        frame_bridge_adapter_destroy(adapter);
    }
}

#[test]
fn diagnostics_are_drained_through_the_log_ring() {
    // Provoke at least one diagnostic line.
    assert!(unsafe { frame_bridge_port_get(ptr::null_mut(), BLOCK_FRAMES) }.is_null());

    let mut seen = 0usize;
    for _ in 0..1024 {
        let line = frame_bridge_pop_log();
        if line.is_null() {
            break;
        }
        let text = unsafe { CStr::from_ptr(line) }.to_string_lossy().into_owned();
        assert!(!text.is_empty());
        seen += 1;
    }
    assert!(seen > 0, "expected at least one diagnostic line");
}
