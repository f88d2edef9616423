//! [`HatDriver`] backed by the vendor `libdaqhats` shared library.
//!
//! The library is loaded at runtime so the crate builds on machines without
//! the vendor package installed; only `hat-logger` runs without `--simulate`
//! need it.

use std::ffi::{CStr, c_char, c_double, c_int};
use std::time::Duration;

use libloading::Library;
use log::debug;

use crate::daqhats::{Error, HatDriver, HatInfo, ResultCode, ScanRead, ScanStatus};

pub const DEFAULT_LIBRARY: &str = "libdaqhats.so";
/// Environment variable overriding [`DEFAULT_LIBRARY`].
pub const LIBRARY_ENV: &str = "DAQHATS_LIB";

#[repr(C)]
#[derive(Clone, Copy)]
struct RawHatInfo {
    address: u8,
    id: u16,
    version: u16,
    product_name: [c_char; 256],
}

type HatListFn = unsafe extern "C" fn(u16, *mut RawHatInfo) -> c_int;
type AddressFn = unsafe extern "C" fn(u8) -> c_int;
type ActualRateFn = unsafe extern "C" fn(u8, c_double, *mut c_double) -> c_int;
type ScanStartFn = unsafe extern "C" fn(u8, u8, u32, c_double, u32) -> c_int;
type ScanReadFn =
    unsafe extern "C" fn(u8, *mut u16, i32, c_double, *mut c_double, u32, *mut u32) -> c_int;
type ErrorMessageFn = unsafe extern "C" fn(c_int) -> *const c_char;

pub struct LibDaqHats {
    // Keeps the function pointers below valid.
    _lib: Library,
    hat_list: HatListFn,
    open: AddressFn,
    close: AddressFn,
    actual_rate: ActualRateFn,
    scan_start: ScanStartFn,
    scan_read: ScanReadFn,
    scan_stop: AddressFn,
    scan_cleanup: AddressFn,
    error_message: ErrorMessageFn,
}

unsafe fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, Error> {
    let sym = unsafe { lib.get::<T>(name.as_bytes()) }
        .map_err(|source| Error::MissingSymbol { symbol: name, source })?;
    Ok(*sym)
}

impl LibDaqHats {
    /// Loads the library named by `DAQHATS_LIB`, or `libdaqhats.so`.
    pub fn load() -> Result<Self, Error> {
        let path = std::env::var(LIBRARY_ENV).unwrap_or_else(|_| DEFAULT_LIBRARY.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, Error> {
        debug!("loading {}", path);
        // Safety: loading runs the library's initializers; libdaqhats has none
        // with preconditions beyond being a valid shared object.
        let lib = unsafe { Library::new(path) }.map_err(|source| Error::Load {
            path: path.to_string(),
            source,
        })?;

        // Safety: the signatures match daqhats.h / mcc118.h.
        unsafe {
            Ok(Self {
                hat_list: symbol(&lib, "hat_list")?,
                open: symbol(&lib, "mcc118_open")?,
                close: symbol(&lib, "mcc118_close")?,
                actual_rate: symbol(&lib, "mcc118_a_in_scan_actual_rate")?,
                scan_start: symbol(&lib, "mcc118_a_in_scan_start")?,
                scan_read: symbol(&lib, "mcc118_a_in_scan_read")?,
                scan_stop: symbol(&lib, "mcc118_a_in_scan_stop")?,
                scan_cleanup: symbol(&lib, "mcc118_a_in_scan_cleanup")?,
                error_message: symbol(&lib, "hat_error_message")?,
                _lib: lib,
            })
        }
    }

    fn check(&self, raw: c_int, ctx: &str) -> Result<(), Error> {
        match ResultCode::from_raw(raw) {
            None => Ok(()),
            Some(code) => {
                let msg = unsafe { (self.error_message)(raw) };
                if !msg.is_null() {
                    // Safety: hat_error_message returns static nul-terminated strings.
                    let msg = unsafe { CStr::from_ptr(msg) };
                    debug!("{} failed: {}", ctx, msg.to_string_lossy());
                }
                Err(Error::code(code))
            }
        }
    }
}

impl HatDriver for LibDaqHats {
    fn list(&mut self, filter_id: u16) -> Result<Vec<HatInfo>, Error> {
        let count = unsafe { (self.hat_list)(filter_id, std::ptr::null_mut()) };
        if count <= 0 {
            return Ok(Vec::new());
        }

        let empty = RawHatInfo {
            address: 0,
            id: 0,
            version: 0,
            product_name: [0; 256],
        };
        let mut raw = vec![empty; count as usize];
        let count = unsafe { (self.hat_list)(filter_id, raw.as_mut_ptr()) };
        raw.truncate(count.max(0) as usize);

        Ok(raw
            .iter()
            .map(|info| {
                let bytes: Vec<u8> = info
                    .product_name
                    .iter()
                    .take_while(|&&c| c != 0)
                    .map(|&c| c as u8)
                    .collect();
                HatInfo {
                    address: info.address,
                    id: info.id,
                    version: info.version,
                    product_name: String::from_utf8_lossy(&bytes).into_owned(),
                }
            })
            .collect())
    }

    fn open(&mut self, address: u8) -> Result<(), Error> {
        self.check(unsafe { (self.open)(address) }, "mcc118_open")
    }

    fn close(&mut self, address: u8) -> Result<(), Error> {
        self.check(unsafe { (self.close)(address) }, "mcc118_close")
    }

    fn actual_rate(&mut self, channel_count: u8, rate_hz: f64) -> Result<f64, Error> {
        let mut actual: c_double = 0.0;
        self.check(
            unsafe { (self.actual_rate)(channel_count, rate_hz, &mut actual as *mut c_double) },
            "mcc118_a_in_scan_actual_rate",
        )?;
        Ok(actual)
    }

    fn scan_start(
        &mut self,
        address: u8,
        channel_mask: u8,
        samples_per_channel: u32,
        rate_hz: f64,
        options: u32,
    ) -> Result<(), Error> {
        self.check(
            unsafe { (self.scan_start)(address, channel_mask, samples_per_channel, rate_hz, options) },
            "mcc118_a_in_scan_start",
        )
    }

    fn scan_read(
        &mut self,
        address: u8,
        samples_per_channel: u32,
        timeout: Duration,
        buffer: &mut [f64],
    ) -> Result<ScanRead, Error> {
        if buffer.len() < samples_per_channel as usize {
            return Err(Error::BufferTooSmall {
                capacity: buffer.len(),
                requested: samples_per_channel as usize,
            });
        }

        let mut status: u16 = 0;
        let mut samples: u32 = 0;
        self.check(
            unsafe {
                (self.scan_read)(
                    address,
                    &mut status as *mut u16,
                    samples_per_channel as i32,
                    timeout.as_secs_f64(),
                    buffer.as_mut_ptr(),
                    buffer.len() as u32,
                    &mut samples as *mut u32,
                )
            },
            "mcc118_a_in_scan_read",
        )?;

        Ok(ScanRead {
            status: ScanStatus(status),
            samples: samples as usize,
        })
    }

    fn scan_stop(&mut self, address: u8) -> Result<(), Error> {
        self.check(unsafe { (self.scan_stop)(address) }, "mcc118_a_in_scan_stop")
    }

    fn scan_cleanup(&mut self, address: u8) -> Result<(), Error> {
        self.check(unsafe { (self.scan_cleanup)(address) }, "mcc118_a_in_scan_cleanup")
    }
}
