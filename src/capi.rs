//! C FFI boundary (spec.md §9): every entry point here takes and returns
//! only `extern "C"`-safe types, translates every [`Error`] into the
//! negative-integer taxonomy from [`crate::error`], and catches panics at
//! the boundary rather than letting them unwind into C.
//!
//! Grounded on `original_source/libgeopmd/include/geopm_stats_collector.h`:
//! opaque struct pointers for handles, `int` return codes, and the
//! "`*max_report_size` is zero means report the size you'd need" in/out
//! buffer-sizing contract, which [`geopm_stats_collector_report_yaml`]
//! reproduces exactly. The teacher has no outward-facing C API of its own
//! (`src/ffi` only wraps *incoming* syscalls), so the shape of an opaque
//! handle plus stable error codes is grounded on the GEOPM header instead.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use crate::error::Error;
use crate::handle::{ControlHandle, Handle};
use crate::platform_io::PlatformIo;
use crate::stats::{StatsCollector, StatsRequest};
use crate::topo::Domain;

/// Opaque handle to a [`PlatformIo`]; only ever seen by C as a pointer.
pub struct geopm_pio_s(PlatformIo);

/// Opaque handle to a [`StatsCollector`].
pub struct geopm_stats_collector_s(StatsCollector);

/// One `(name, domain, domain_idx)` request, mirroring
/// `geopm_stats_collector_create`'s request array from the reference header.
#[repr(C)]
pub struct geopm_stats_request_s {
    pub name: *const c_char,
    pub domain: c_int,
    pub domain_idx: usize,
}

fn domain_to_index(domain: Domain) -> i32 {
    Domain::ALL.iter().position(|d| *d == domain).unwrap() as i32
}

fn domain_from_index(idx: i32) -> Option<Domain> {
    Domain::ALL.get(usize::try_from(idx).ok()?).copied()
}

/// Runs `body`, catching any panic and mapping it to [`Error::Logic`], then
/// collapses a `Result<T, Error>` down to a single stable code: `0` on
/// success, `err.code()` on failure.
fn guard(body: impl FnOnce() -> Result<i32, Error> + std::panic::UnwindSafe) -> c_int {
    match catch_unwind(body) {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => e.code(),
        Err(_) => Error::Logic("panic across FFI boundary".to_string()).code(),
    }
}

/// # Safety
/// `ptr` must be null or point at a valid, NUL-terminated, UTF-8 C string.
unsafe fn cstr_to_string(ptr: *const c_char) -> Result<String, Error> {
    if ptr.is_null() {
        return Err(Error::Logic("null name pointer".to_string()));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_string)
        .map_err(|e| Error::Logic(format!("name is not valid UTF-8: {e}")))
}

/// Human-readable string for a code returned by any function below,
/// mirroring [`Error::describe_code`]. The returned pointer is valid until
/// the next call to this function on the same thread.
#[no_mangle]
pub extern "C" fn geopm_error_message(code: c_int) -> *const c_char {
    thread_local! {
        static LAST: std::cell::RefCell<CString> = std::cell::RefCell::new(CString::new("").unwrap());
    }
    let message = Error::describe_code(code);
    LAST.with(|cell| {
        let owned = CString::new(message).unwrap();
        let ptr = owned.as_ptr();
        *cell.borrow_mut() = owned;
        ptr
    })
}

/// # Safety
/// `out` must point to valid, writable storage for one pointer.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_create(out: *mut *mut geopm_pio_s) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        if out.is_null() {
            return Err(Error::Logic("null out pointer".to_string()));
        }
        let pio = PlatformIo::new()?;
        *out = Box::into_raw(Box::new(geopm_pio_s(pio)));
        Ok(0)
    }))
}

/// # Safety
/// `pio` must be a pointer returned by [`geopm_pio_create`] and not
/// previously destroyed.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_destroy(pio: *mut geopm_pio_s) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        if !pio.is_null() {
            drop(Box::from_raw(pio));
        }
        Ok(0)
    }))
}

/// # Safety
/// `pio` and `name` must be valid; `out_handle` must point to writable
/// storage for one `i64`.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_push_signal(
    pio: *mut geopm_pio_s,
    name: *const c_char,
    domain: c_int,
    domain_idx: usize,
    out_handle: *mut i64,
) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let name = cstr_to_string(name)?;
        let domain = domain_from_index(domain).ok_or_else(|| Error::Logic(format!("unknown domain index {domain}")))?;
        let handle = pio.0.push_signal(&name, domain, domain_idx)?;
        *out_handle = handle.index() as i64;
        Ok(0)
    }))
}

/// # Safety
/// Same contract as [`geopm_pio_push_signal`].
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_push_control(
    pio: *mut geopm_pio_s,
    name: *const c_char,
    domain: c_int,
    domain_idx: usize,
    out_handle: *mut i64,
) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let name = cstr_to_string(name)?;
        let domain = domain_from_index(domain).ok_or_else(|| Error::Logic(format!("unknown domain index {domain}")))?;
        let handle = pio.0.push_control(&name, domain, domain_idx)?;
        *out_handle = handle.index() as i64;
        Ok(0)
    }))
}

/// # Safety
/// `pio` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_read_batch(pio: *mut geopm_pio_s) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        pio.0.read_batch()?;
        Ok(0)
    }))
}

/// # Safety
/// `pio` must be valid; `out_value` must point to writable storage for one
/// `f64`.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_sample(pio: *const geopm_pio_s, handle: i64, out_value: *mut f64) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_ref().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let idx = usize::try_from(handle).map_err(|_| Error::Logic("negative handle".to_string()))?;
        *out_value = pio.0.sample(Handle(idx))?;
        Ok(0)
    }))
}

/// # Safety
/// `pio` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_adjust(pio: *mut geopm_pio_s, handle: i64, value: f64) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let idx = usize::try_from(handle).map_err(|_| Error::Logic("negative handle".to_string()))?;
        pio.0.adjust(ControlHandle(idx), value)?;
        Ok(0)
    }))
}

/// # Safety
/// `pio` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_write_batch(pio: *mut geopm_pio_s) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        pio.0.write_batch()?;
        Ok(0)
    }))
}

/// # Safety
/// `pio`, `name` must be valid; `out_value` must point to writable storage.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_read_signal(
    pio: *mut geopm_pio_s,
    name: *const c_char,
    domain: c_int,
    domain_idx: usize,
    out_value: *mut f64,
) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let name = cstr_to_string(name)?;
        let domain = domain_from_index(domain).ok_or_else(|| Error::Logic(format!("unknown domain index {domain}")))?;
        *out_value = pio.0.read_signal(&name, domain, domain_idx)?;
        Ok(0)
    }))
}

/// # Safety
/// `pio`, `name` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_write_control(
    pio: *mut geopm_pio_s,
    name: *const c_char,
    domain: c_int,
    domain_idx: usize,
    value: f64,
) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let name = cstr_to_string(name)?;
        let domain = domain_from_index(domain).ok_or_else(|| Error::Logic(format!("unknown domain index {domain}")))?;
        pio.0.write_control(&name, domain, domain_idx, value)?;
        Ok(0)
    }))
}

/// # Safety
/// `pio`, `path` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_save_control(pio: *mut geopm_pio_s, path: *const c_char) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let path = cstr_to_string(path)?;
        pio.0.save_control(std::path::Path::new(&path))?;
        Ok(0)
    }))
}

/// # Safety
/// `pio`, `path` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_pio_restore_control(pio: *mut geopm_pio_s, path: *const c_char) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        let path = cstr_to_string(path)?;
        pio.0.restore_control(std::path::Path::new(&path))?;
        Ok(0)
    }))
}

/// # Safety
/// `pio`, `hostname` must be valid; `requests` must point to `num_requests`
/// valid [`geopm_stats_request_s`] entries; `out` must point to writable
/// storage for one pointer. Mirrors `geopm_stats_collector_create` from the
/// reference header, plus the `pio` handle the collector pushes its own
/// requests against (spec.md §4.7: "construction pushes each request as a
/// signal against an injected PlatformIO").
#[no_mangle]
pub unsafe extern "C" fn geopm_stats_collector_create(
    pio: *mut geopm_pio_s,
    hostname: *const c_char,
    num_requests: usize,
    requests: *const geopm_stats_request_s,
    out: *mut *mut geopm_stats_collector_s,
) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        if out.is_null() || requests.is_null() {
            return Err(Error::Logic("null pointer".to_string()));
        }
        let hostname = cstr_to_string(hostname)?;
        let mut parsed = Vec::with_capacity(num_requests);
        for i in 0..num_requests {
            let req = &*requests.add(i);
            let name = cstr_to_string(req.name)?;
            let domain = domain_from_index(req.domain)
                .ok_or_else(|| Error::Logic(format!("unknown domain index {}", req.domain)))?;
            parsed.push(StatsRequest::new(name, domain, req.domain_idx));
        }
        let collector = StatsCollector::new(hostname, &parsed, &mut pio.0)?;
        *out = Box::into_raw(Box::new(geopm_stats_collector_s(collector)));
        Ok(0)
    }))
}

/// # Safety
/// `collector` and `pio` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_stats_collector_update(
    collector: *mut geopm_stats_collector_s,
    pio: *mut geopm_pio_s,
) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let collector = collector.as_mut().ok_or_else(|| Error::Logic("null collector pointer".to_string()))?;
        let pio = pio.as_mut().ok_or_else(|| Error::Logic("null pio pointer".to_string()))?;
        collector.0.update(&mut pio.0)?;
        Ok(0)
    }))
}

/// # Safety
/// Same in/out buffer-sizing contract as the reference: if
/// `*max_report_size` is zero, this writes the required size (including the
/// terminating NUL) into it and leaves `report` untouched.
#[no_mangle]
pub unsafe extern "C" fn geopm_stats_collector_report_yaml(
    collector: *const geopm_stats_collector_s,
    time_end: f64,
    max_report_size: *mut usize,
    report: *mut c_char,
) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let collector = collector.as_ref().ok_or_else(|| Error::Logic("null collector pointer".to_string()))?;
        let max = max_report_size.as_mut().ok_or_else(|| Error::Logic("null size pointer".to_string()))?;
        let yaml = CString::new(collector.0.report_yaml(time_end)).map_err(|e| Error::Logic(e.to_string()))?;
        let needed = yaml.as_bytes_with_nul().len();
        if *max == 0 {
            *max = needed;
            return Ok(0);
        }
        if *max < needed {
            return Err(Error::BufferTooSmall { needed });
        }
        ptr::copy_nonoverlapping(yaml.as_ptr(), report, needed);
        Ok(0)
    }))
}

/// # Safety
/// `collector` must be valid.
#[no_mangle]
pub unsafe extern "C" fn geopm_stats_collector_reset(collector: *mut geopm_stats_collector_s) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        let collector = collector.as_mut().ok_or_else(|| Error::Logic("null collector pointer".to_string()))?;
        collector.0.reset();
        Ok(0)
    }))
}

/// # Safety
/// `collector` must be a pointer returned by
/// [`geopm_stats_collector_create`] and not previously freed.
#[no_mangle]
pub unsafe extern "C" fn geopm_stats_collector_free(collector: *mut geopm_stats_collector_s) -> c_int {
    guard(AssertUnwindSafe(|| unsafe {
        if !collector.is_null() {
            drop(Box::from_raw(collector));
        }
        Ok(0)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_index_round_trips() {
        for d in Domain::ALL {
            assert_eq!(domain_from_index(domain_to_index(d)), Some(d));
        }
    }

    #[test]
    fn unknown_domain_index_is_none() {
        assert_eq!(domain_from_index(99), None);
    }

    #[test]
    fn error_message_matches_describe_code() {
        let msg = unsafe { CStr::from_ptr(geopm_error_message(-1)) };
        assert_eq!(msg.to_str().unwrap(), Error::describe_code(-1));
    }

    fn create_pio() -> *mut geopm_pio_s {
        let mut handle: *mut geopm_pio_s = ptr::null_mut();
        let rc = unsafe { geopm_pio_create(&mut handle) };
        assert_eq!(rc, 0);
        handle
    }

    #[test]
    fn create_and_destroy_a_stats_collector() {
        let pio = create_pio();
        let hostname = CString::new("node01").unwrap();
        let metric = CString::new("TIME").unwrap();
        let requests = [geopm_stats_request_s { name: metric.as_ptr(), domain: domain_to_index(Domain::Board), domain_idx: 0 }];
        let mut handle: *mut geopm_stats_collector_s = ptr::null_mut();
        let rc = unsafe { geopm_stats_collector_create(pio, hostname.as_ptr(), 1, requests.as_ptr(), &mut handle) };
        assert_eq!(rc, 0);
        assert!(!handle.is_null());
        let rc = unsafe { geopm_stats_collector_update(handle, pio) };
        assert_eq!(rc, 0);
        let rc = unsafe { geopm_stats_collector_free(handle) };
        assert_eq!(rc, 0);
        unsafe { geopm_pio_destroy(pio) };
    }

    #[test]
    fn report_yaml_size_query_then_fill() {
        let pio = create_pio();
        let hostname = CString::new("node01").unwrap();
        let metric = CString::new("TIME").unwrap();
        let requests = [geopm_stats_request_s { name: metric.as_ptr(), domain: domain_to_index(Domain::Board), domain_idx: 0 }];
        let mut handle: *mut geopm_stats_collector_s = ptr::null_mut();
        unsafe { geopm_stats_collector_create(pio, hostname.as_ptr(), 1, requests.as_ptr(), &mut handle) };
        unsafe { geopm_stats_collector_update(handle, pio) };
        let mut size: usize = 0;
        let rc = unsafe { geopm_stats_collector_report_yaml(handle, 1.0, &mut size, ptr::null_mut()) };
        assert_eq!(rc, 0);
        assert!(size > 0);
        let mut buf = vec![0 as c_char; size];
        let rc = unsafe { geopm_stats_collector_report_yaml(handle, 1.0, &mut size, buf.as_mut_ptr()) };
        assert_eq!(rc, 0);
        unsafe { geopm_stats_collector_free(handle) };
        unsafe { geopm_pio_destroy(pio) };
    }
}
