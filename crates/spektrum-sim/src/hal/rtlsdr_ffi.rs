//! # librtlsdr bindings
//!
//! librtlsdr is loaded at runtime with `libloading`, so builds with the
//! `rtlsdr` feature still run on machines without the library; every
//! entry point reports [`RtlSdrError::LibraryNotFound`] instead.
//!
//! Only the calls a sweep needs are bound: enumeration, open/close,
//! tuning, gain, correction, offset tuning, direct sampling and
//! synchronous reads.
//!
//! ## Sample Format
//!
//! Interleaved unsigned 8-bit I/Q, `[I0, Q0, I1, Q1, ...]`, centered on
//! 127.5. [`convert_samples`] maps them to complex values in [-1, 1].

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::ptr;
use std::sync::OnceLock;

use libloading::Library;
use num_complex::Complex64;

/// Opaque `rtlsdr_dev_t *`.
pub type RtlSdrDevHandle = *mut c_void;

pub type RtlSdrResult<T> = Result<T, RtlSdrError>;

/// libusb's LIBUSB_ERROR_NO_DEVICE.
pub const LIBUSB_ERROR_NO_DEVICE: i32 = -4;

/// Returned by `rtlsdr_set_freq_correction` when the value is unchanged.
const FREQ_CORRECTION_UNCHANGED: c_int = -2;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RtlSdrError {
    #[error("librtlsdr not found - install rtl-sdr package")]
    LibraryNotFound,

    #[error("Device open failed: error code {0}")]
    OpenFailed(i32),

    #[error("{0} failed (error code {1})")]
    OperationFailed(&'static str, i32),

    #[error("Read failed: got {got} bytes, expected {expected}")]
    ShortRead { expected: usize, got: usize },

    #[error("Invalid device handle")]
    InvalidHandle,
}

impl RtlSdrError {
    /// The USB device disappeared.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RtlSdrError::OperationFailed(_, LIBUSB_ERROR_NO_DEVICE))
    }
}

type DevFn = unsafe extern "C" fn(RtlSdrDevHandle) -> c_int;
type DevIntFn = unsafe extern "C" fn(RtlSdrDevHandle, c_int) -> c_int;
type DevUintFn = unsafe extern "C" fn(RtlSdrDevHandle, c_uint) -> c_int;

/// Entry points copied out of the loaded library.
struct RtlSdrLib {
    get_device_count: unsafe extern "C" fn() -> c_uint,
    get_device_name: unsafe extern "C" fn(c_uint) -> *const c_char,
    get_device_usb_strings: unsafe extern "C" fn(c_uint, *mut c_char, *mut c_char, *mut c_char) -> c_int,
    open: unsafe extern "C" fn(*mut RtlSdrDevHandle, c_uint) -> c_int,
    close: DevFn,
    set_center_freq: DevUintFn,
    set_sample_rate: DevUintFn,
    set_tuner_gain_mode: DevIntFn,
    set_tuner_gain: DevIntFn,
    get_tuner_gains: unsafe extern "C" fn(RtlSdrDevHandle, *mut c_int) -> c_int,
    set_direct_sampling: DevIntFn,
    set_offset_tuning: DevIntFn,
    set_freq_correction: DevIntFn,
    reset_buffer: DevFn,
    read_sync: unsafe extern "C" fn(RtlSdrDevHandle, *mut c_void, c_int, *mut c_int) -> c_int,
    // Keeps the function pointers above valid.
    _lib: Library,
}

static RTLSDR_LIB: OnceLock<Option<RtlSdrLib>> = OnceLock::new();

#[cfg(target_os = "linux")]
const LIB_NAMES: &[&str] = &["librtlsdr.so.0", "librtlsdr.so"];

#[cfg(target_os = "macos")]
const LIB_NAMES: &[&str] = &["librtlsdr.dylib", "librtlsdr.0.dylib"];

#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["rtlsdr.dll", "librtlsdr.dll"];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const LIB_NAMES: &[&str] = &[];

/// Look up `name` and copy the function pointer out of the symbol.
///
/// # Safety
///
/// `T` must match the C signature of `name`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
    lib.get::<T>(name).ok().map(|s| *s)
}

fn bind(lib: Library) -> Option<RtlSdrLib> {
    // SAFETY: signatures follow rtl-sdr.h.
    unsafe {
        Some(RtlSdrLib {
            get_device_count: symbol(&lib, b"rtlsdr_get_device_count\0")?,
            get_device_name: symbol(&lib, b"rtlsdr_get_device_name\0")?,
            get_device_usb_strings: symbol(&lib, b"rtlsdr_get_device_usb_strings\0")?,
            open: symbol(&lib, b"rtlsdr_open\0")?,
            close: symbol(&lib, b"rtlsdr_close\0")?,
            set_center_freq: symbol(&lib, b"rtlsdr_set_center_freq\0")?,
            set_sample_rate: symbol(&lib, b"rtlsdr_set_sample_rate\0")?,
            set_tuner_gain_mode: symbol(&lib, b"rtlsdr_set_tuner_gain_mode\0")?,
            set_tuner_gain: symbol(&lib, b"rtlsdr_set_tuner_gain\0")?,
            get_tuner_gains: symbol(&lib, b"rtlsdr_get_tuner_gains\0")?,
            set_direct_sampling: symbol(&lib, b"rtlsdr_set_direct_sampling\0")?,
            set_offset_tuning: symbol(&lib, b"rtlsdr_set_offset_tuning\0")?,
            set_freq_correction: symbol(&lib, b"rtlsdr_set_freq_correction\0")?,
            reset_buffer: symbol(&lib, b"rtlsdr_reset_buffer\0")?,
            read_sync: symbol(&lib, b"rtlsdr_read_sync\0")?,
            _lib: lib,
        })
    }
}

fn load_library() -> Option<RtlSdrLib> {
    for name in LIB_NAMES {
        // SAFETY: librtlsdr has no load-time initializers with preconditions.
        let Ok(lib) = (unsafe { Library::new(name) }) else {
            continue;
        };
        match bind(lib) {
            Some(bound) => {
                tracing::info!("Loaded RTL-SDR library: {}", name);
                return Some(bound);
            }
            None => tracing::warn!("{} is missing required symbols", name),
        }
    }
    tracing::debug!("RTL-SDR library not found");
    None
}

fn get_lib() -> RtlSdrResult<&'static RtlSdrLib> {
    RTLSDR_LIB
        .get_or_init(load_library)
        .as_ref()
        .ok_or(RtlSdrError::LibraryNotFound)
}

fn check(op: &'static str, ret: c_int) -> RtlSdrResult<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(RtlSdrError::OperationFailed(op, ret))
    }
}

pub fn is_available() -> bool {
    get_lib().is_ok()
}

pub fn get_device_count() -> u32 {
    get_lib()
        .map(|lib| unsafe { (lib.get_device_count)() })
        .unwrap_or(0)
}

pub fn get_device_name(index: u32) -> Option<String> {
    let lib = get_lib().ok()?;
    let name = unsafe { (lib.get_device_name)(index) };
    if name.is_null() {
        return None;
    }
    // SAFETY: librtlsdr returns a static NUL-terminated string.
    Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
}

/// USB descriptor strings of a device.
#[derive(Debug, Clone, Default)]
pub struct UsbStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

fn c_buf_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

pub fn get_device_usb_strings(index: u32) -> Option<UsbStrings> {
    let lib = get_lib().ok()?;
    // librtlsdr writes at most 256 bytes into each.
    let mut manufacturer = [0u8; 256];
    let mut product = [0u8; 256];
    let mut serial = [0u8; 256];

    let ret = unsafe {
        (lib.get_device_usb_strings)(
            index,
            manufacturer.as_mut_ptr() as *mut c_char,
            product.as_mut_ptr() as *mut c_char,
            serial.as_mut_ptr() as *mut c_char,
        )
    };
    (ret == 0).then(|| UsbStrings {
        manufacturer: c_buf_to_string(&manufacturer),
        product: c_buf_to_string(&product),
        serial: c_buf_to_string(&serial),
    })
}

/// An open device. Closed on drop.
pub struct RtlSdrHandle {
    handle: RtlSdrDevHandle,
    index: u32,
    gains: Vec<i32>,
}

// SAFETY: the handle is only used through &mut self, one thread at a time.
unsafe impl Send for RtlSdrHandle {}

impl RtlSdrHandle {
    pub fn open(index: u32) -> RtlSdrResult<Self> {
        let lib = get_lib()?;

        let mut handle: RtlSdrDevHandle = ptr::null_mut();
        let ret = unsafe { (lib.open)(&mut handle, index) };
        if ret != 0 {
            return Err(RtlSdrError::OpenFailed(ret));
        }
        if handle.is_null() {
            return Err(RtlSdrError::InvalidHandle);
        }

        let gains = query_gains(|buf| unsafe { (lib.get_tuner_gains)(handle, buf) });

        tracing::info!("Opened RTL-SDR device #{} with {} gain levels", index, gains.len());

        Ok(Self {
            handle,
            index,
            gains,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Supported tuner gains in tenths of dB, ascending.
    pub fn gains(&self) -> &[i32] {
        &self.gains
    }

    /// Closest supported gain to `gain` (tenths of dB).
    pub fn nearest_gain(&self, gain: i32) -> i32 {
        nearest(&self.gains, gain)
    }

    fn call_int(&mut self, op: &'static str, f: fn(&RtlSdrLib) -> DevIntFn, value: c_int) -> RtlSdrResult<()> {
        let lib = get_lib()?;
        check(op, unsafe { f(lib)(self.handle, value) })
    }

    pub fn set_center_freq(&mut self, freq: u32) -> RtlSdrResult<()> {
        let lib = get_lib()?;
        check("set_center_freq", unsafe { (lib.set_center_freq)(self.handle, freq) })
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> RtlSdrResult<()> {
        let lib = get_lib()?;
        check("set_sample_rate", unsafe { (lib.set_sample_rate)(self.handle, rate) })
    }

    pub fn set_tuner_gain_mode(&mut self, manual: bool) -> RtlSdrResult<()> {
        self.call_int("set_tuner_gain_mode", |l| l.set_tuner_gain_mode, manual as c_int)
    }

    /// Set the nearest supported gain and return it.
    pub fn set_tuner_gain(&mut self, gain: i32) -> RtlSdrResult<i32> {
        let actual = self.nearest_gain(gain);
        self.call_int("set_tuner_gain", |l| l.set_tuner_gain, actual)?;
        Ok(actual)
    }

    /// 0 = off, 1 = I branch, 2 = Q branch.
    pub fn set_direct_sampling(&mut self, mode: i32) -> RtlSdrResult<()> {
        self.call_int("set_direct_sampling", |l| l.set_direct_sampling, mode)
    }

    pub fn set_offset_tuning(&mut self, enabled: bool) -> RtlSdrResult<()> {
        self.call_int("set_offset_tuning", |l| l.set_offset_tuning, enabled as c_int)
    }

    pub fn set_freq_correction(&mut self, ppm: i32) -> RtlSdrResult<()> {
        match self.call_int("set_freq_correction", |l| l.set_freq_correction, ppm) {
            Err(RtlSdrError::OperationFailed(_, FREQ_CORRECTION_UNCHANGED)) => Ok(()),
            other => other,
        }
    }

    pub fn reset_buffer(&mut self) -> RtlSdrResult<()> {
        let lib = get_lib()?;
        check("reset_buffer", unsafe { (lib.reset_buffer)(self.handle) })
    }

    /// Fill `buffer` with raw I/Q bytes and return the count read.
    ///
    /// The length must be a multiple of 512.
    pub fn read_sync(&mut self, buffer: &mut [u8]) -> RtlSdrResult<usize> {
        let lib = get_lib()?;
        let len = c_int::try_from(buffer.len()).map_err(|_| RtlSdrError::ShortRead {
            expected: buffer.len(),
            got: 0,
        })?;

        let mut n_read: c_int = 0;
        let ret = unsafe {
            (lib.read_sync)(self.handle, buffer.as_mut_ptr() as *mut c_void, len, &mut n_read)
        };
        check("read_sync", ret)?;
        Ok(n_read.max(0) as usize)
    }
}

impl Drop for RtlSdrHandle {
    fn drop(&mut self) {
        if let Ok(lib) = get_lib() {
            tracing::debug!("Closing RTL-SDR device #{}", self.index);
            unsafe { (lib.close)(self.handle) };
        }
    }
}

/// Run librtlsdr's two-step gain query: a null buffer returns the count,
/// then a buffer of that size is filled.
fn query_gains(mut get: impl FnMut(*mut c_int) -> c_int) -> Vec<i32> {
    let count = get(ptr::null_mut());
    if count <= 0 {
        return Vec::new();
    }
    let mut gains = vec![0 as c_int; count as usize];
    let n = get(gains.as_mut_ptr());
    gains.truncate(n.clamp(0, count) as usize);
    gains
}

/// Closest entry of `gains` to `gain`, or `gain` itself if the list is empty.
pub fn nearest(gains: &[i32], gain: i32) -> i32 {
    gains
        .iter()
        .copied()
        .min_by_key(|g| (g - gain).abs())
        .unwrap_or(gain)
}

#[inline]
pub fn u8_to_f64(sample: u8) -> f64 {
    (sample as f64 - 127.5) / 127.5
}

/// Interleaved 8-bit I/Q to complex samples. A trailing odd byte is dropped.
pub fn convert_samples(raw: &[u8]) -> Vec<Complex64> {
    raw.chunks_exact(2)
        .map(|iq| Complex64::new(u8_to_f64(iq[0]), u8_to_f64(iq[1])))
        .collect()
}
