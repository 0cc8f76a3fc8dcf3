use libc::size_t;
use std::ffi::{CStr, CString};
use std::io::SeekFrom;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;
use std::time::Duration;

use crate::{Stream, StreamError};

pub const DHARA_SEEK_SET: c_int = 0;
pub const DHARA_SEEK_CUR: c_int = 1;
pub const DHARA_SEEK_END: c_int = 2;

#[repr(C)]
#[allow(non_camel_case_types)]
pub enum DharaErrorCode {
    DHARA_SUCCESS = 0,
    DHARA_NETWORK = 1,
    DHARA_PROTOCOL = 2,
    DHARA_IO = 3,
    DHARA_CLOSED = 4,
    DHARA_UNSUPPORTED_PROTOCOL = 5,
    DHARA_INVALID_ARGUMENT = 6,
    DHARA_END_OF_STREAM = 7,
    DHARA_UNSUPPORTED = 8,
    DHARA_SEEK = 9,
    DHARA_UNKNOWN = 99,
}

impl From<&StreamError> for DharaErrorCode {
    fn from(err: &StreamError) -> Self {
        match err {
            StreamError::Network(_) => DharaErrorCode::DHARA_NETWORK,
            StreamError::Protocol(_) => DharaErrorCode::DHARA_PROTOCOL,
            StreamError::Io(_) => DharaErrorCode::DHARA_IO,
            StreamError::Closed | StreamError::NotConfigured => DharaErrorCode::DHARA_CLOSED,
            StreamError::UnsupportedProtocol(_) => DharaErrorCode::DHARA_UNSUPPORTED_PROTOCOL,
            StreamError::InvalidArgument(_) | StreamError::NeedTooLarge(_) => {
                DharaErrorCode::DHARA_INVALID_ARGUMENT
            }
            StreamError::EndOfStream | StreamError::Underrun { .. } => {
                DharaErrorCode::DHARA_END_OF_STREAM
            }
            StreamError::Unsupported(_) | StreamError::UnsupportedCommand(_) => {
                DharaErrorCode::DHARA_UNSUPPORTED
            }
            StreamError::CacheNotEmpty
            | StreamError::BackwardSeek { .. }
            | StreamError::SeekOutOfRange
            | StreamError::SeekStalled { .. } => DharaErrorCode::DHARA_SEEK,
            StreamError::ShortWrite { .. } => DharaErrorCode::DHARA_UNKNOWN,
        }
    }
}

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CString>>  = const { std::cell::RefCell::new(None) };
}

fn set_last_error(err: &StreamError) {
    let error_msg = CString::new(err.to_string().replace('\0', " "))
        .unwrap_or_else(|_| CString::from(c"Failed to format error message"));
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(error_msg);
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

fn invalid(msg: &str) -> StreamError {
    StreamError::InvalidArgument(msg.to_string())
}

fn fail(err: StreamError) -> c_int {
    let code = DharaErrorCode::from(&err);
    set_last_error(&err);
    code as c_int
}

/// Opaque stream handle
pub struct DharaStream {
    inner: Stream,
}

/// Get the last error message for this thread
/// Returns NULL if no error
/// The returned string is valid until the next dhara call on this thread
#[unsafe(no_mangle)]
pub extern "C" fn dhara_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Get library version string
/// Returns pointer to static version string
#[unsafe(no_mangle)]
pub extern "C" fn dhara_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

/// Create a configured stream for the given URL
/// Returns NULL on error
///
/// # Safety
/// >> url must be a valid null-terminated C string
/// >> Caller must free the returned pointer with dhara_stream_destroy()
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_create(url: *const c_char) -> *mut DharaStream {
    clear_last_error();

    if url.is_null() {
        set_last_error(&invalid("URL is null"));
        return ptr::null_mut();
    }

    let url_str = match unsafe { CStr::from_ptr(url) }.to_str() {
        Ok(s) => s,
        Err(_) => {
            set_last_error(&invalid("Invalid UTF-8 in URL"));
            return ptr::null_mut();
        }
    };

    match Stream::from_url(url_str) {
        Ok(stream) => Box::into_raw(Box::new(DharaStream { inner: stream })),
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// Open the stream
/// Returns 0 on success, error code on failure
///
/// # Safety
/// >> stream must be a valid stream handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_open(stream: *mut DharaStream) -> c_int {
    clear_last_error();

    let Some(stream_ref) = (unsafe { stream.as_mut() }) else {
        return fail(invalid("Null stream pointer"));
    };

    match stream_ref.inner.open() {
        Ok(()) => DharaErrorCode::DHARA_SUCCESS as c_int,
        Err(e) => fail(e),
    }
}

/// Close the stream; it can be opened again later
///
/// # Safety
/// >> stream must be a valid stream handle or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_close(stream: *mut DharaStream) {
    if let Some(stream_ref) = unsafe { stream.as_mut() } {
        stream_ref.inner.close();
    }
}

/// Close the stream and free its resources
///
/// # Safety
/// >> stream must be a valid stream handle or NULL
/// >> stream must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_destroy(stream: *mut DharaStream) {
    if !stream.is_null() {
        let stream_box = unsafe { Box::from_raw(stream) };
        stream_box.inner.destroy();
    }
}

/// Shared body of the read entry points. `blocking` selects bread over read.
unsafe fn read_into(
    stream: *mut DharaStream,
    buffer: *mut c_void,
    size: size_t,
    blocking: bool,
) -> isize {
    clear_last_error();

    if stream.is_null() || buffer.is_null() {
        set_last_error(&invalid("Null pointer argument"));
        return -1;
    }

    let stream_ref = unsafe { &mut *stream };
    let buf = unsafe { slice::from_raw_parts_mut(buffer as *mut u8, size) };

    let result = if blocking {
        stream_ref.inner.bread(buf)
    } else {
        stream_ref.inner.read(buf)
    };

    match result {
        Ok(n) => n as isize,
        Err(StreamError::EndOfStream) => 0,
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

unsafe fn write_from(
    stream: *mut DharaStream,
    buffer: *const c_void,
    size: size_t,
    blocking: bool,
) -> isize {
    clear_last_error();

    if stream.is_null() || buffer.is_null() {
        set_last_error(&invalid("Null pointer argument"));
        return -1;
    }

    let stream_ref = unsafe { &mut *stream };
    let buf = unsafe { slice::from_raw_parts(buffer as *const u8, size) };

    let result = if blocking {
        stream_ref.inner.bwrite(buf)
    } else {
        stream_ref.inner.write(buf)
    };

    match result {
        Ok(n) => n as isize,
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

/// Read whatever is available, up to size bytes
/// Returns number of bytes read (0 at end of stream or when nothing arrived), or -1 on error
///
/// # Safety
/// >> stream must be a valid stream handle
/// >> buffer must be valid for writes of at least size bytes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_read(
    stream: *mut DharaStream,
    buffer: *mut c_void,
    size: size_t,
) -> isize {
    unsafe { read_into(stream, buffer, size, false) }
}

/// Read size bytes, waiting until they arrive, the stream ends or the timeout passes
/// Returns number of bytes read, or -1 on error
///
/// # Safety
/// >> stream must be a valid stream handle
/// >> buffer must be valid for writes of at least size bytes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_bread(
    stream: *mut DharaStream,
    buffer: *mut c_void,
    size: size_t,
) -> isize {
    unsafe { read_into(stream, buffer, size, true) }
}

/// Write what the backend accepts right now
/// Returns number of bytes written, or -1 on error
///
/// # Safety
/// >> stream must be a valid stream handle
/// >> buffer must be valid for reads of at least size bytes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_write(
    stream: *mut DharaStream,
    buffer: *const c_void,
    size: size_t,
) -> isize {
    unsafe { write_from(stream, buffer, size, false) }
}

/// Write size bytes, waiting until all are accepted or the timeout passes
/// Returns number of bytes written, or -1 on error
///
/// # Safety
/// >> stream must be a valid stream handle
/// >> buffer must be valid for reads of at least size bytes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_bwrite(
    stream: *mut DharaStream,
    buffer: *const c_void,
    size: size_t,
) -> isize {
    unsafe { write_from(stream, buffer, size, true) }
}

/// Seek relative to DHARA_SEEK_SET, DHARA_SEEK_CUR or DHARA_SEEK_END
/// Returns the new offset, or -1 on error
///
/// # Safety
/// >> stream must be a valid stream handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_seek(
    stream: *mut DharaStream,
    offset: i64,
    whence: c_int,
) -> i64 {
    clear_last_error();

    let Some(stream_ref) = (unsafe { stream.as_mut() }) else {
        set_last_error(&invalid("Null stream pointer"));
        return -1;
    };

    let pos = match whence {
        DHARA_SEEK_SET => match u64::try_from(offset) {
            Ok(offset) => SeekFrom::Start(offset),
            Err(_) => {
                set_last_error(&StreamError::SeekOutOfRange);
                return -1;
            }
        },
        DHARA_SEEK_CUR => SeekFrom::Current(offset),
        DHARA_SEEK_END => SeekFrom::End(offset),
        _ => {
            set_last_error(&invalid("Unknown whence"));
            return -1;
        }
    };

    match stream_ref.inner.seek(pos) {
        Ok(new_pos) => i64::try_from(new_pos).unwrap_or(i64::MAX),
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

/// Get stream size if available
/// Returns size, or 0 if not available
/// Sets has_size to 1 if size is available, 0 otherwise
///
/// # Safety
/// >> stream must be a valid stream handle
/// >> has_size must be valid for writes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_size(
    stream: *const DharaStream,
    has_size: *mut c_int,
) -> u64 {
    clear_last_error();

    if stream.is_null() || has_size.is_null() {
        if !has_size.is_null() {
            unsafe { *has_size = 0 };
        }
        set_last_error(&invalid("Null pointer argument"));
        return 0;
    }

    let stream_ref = unsafe { &*stream };

    match stream_ref.inner.size() {
        Some(size) => {
            unsafe { *has_size = 1 };
            size
        }
        None => {
            unsafe { *has_size = 0 };
            0
        }
    }
}

/// Get current logical offset
/// Returns the offset, or 0 if stream is invalid
///
/// # Safety
/// >> stream must be a valid stream handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_offset(stream: *const DharaStream) -> u64 {
    clear_last_error();

    match unsafe { stream.as_ref() } {
        Some(stream_ref) => stream_ref.inner.offset(),
        None => {
            set_last_error(&invalid("Null stream pointer"));
            0
        }
    }
}

/// Set the idle timeout in milliseconds
/// Returns 0 on success, error code on failure
///
/// # Safety
/// >> stream must be a valid stream handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_set_timeout(stream: *mut DharaStream, timeout_ms: u64) -> c_int {
    clear_last_error();

    let Some(stream_ref) = (unsafe { stream.as_mut() }) else {
        return fail(invalid("Null stream pointer"));
    };

    match stream_ref.inner.set_timeout(Duration::from_millis(timeout_ms)) {
        Ok(()) => DharaErrorCode::DHARA_SUCCESS as c_int,
        Err(e) => fail(e),
    }
}

/// Copy everything src yields into dst
/// Returns number of bytes copied, or -1 on error
///
/// # Safety
/// >> dst and src must be valid, distinct stream handles
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dhara_stream_load(dst: *mut DharaStream, src: *mut DharaStream) -> i64 {
    clear_last_error();

    if dst.is_null() || src.is_null() || ptr::eq(dst, src) {
        set_last_error(&invalid("Need two distinct stream handles"));
        return -1;
    }

    let dst_ref = unsafe { &mut *dst };
    let src_ref = unsafe { &mut *src };

    match dst_ref.inner.load(&mut src_ref.inner) {
        Ok(n) => i64::try_from(n).unwrap_or(i64::MAX),
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_stream_round_trip_through_the_c_api() {
        unsafe {
            let s = dhara_stream_create(c"data:,hello world".as_ptr());
            assert!(!s.is_null());
            assert_eq!(dhara_stream_open(s), 0);

            let mut has_size = 0;
            assert_eq!(dhara_stream_size(s, &mut has_size), 11);
            assert_eq!(has_size, 1);

            assert_eq!(dhara_stream_seek(s, 6, DHARA_SEEK_SET), 6);
            let mut buf = [0u8; 16];
            let n = dhara_stream_bread(s, buf.as_mut_ptr() as *mut c_void, buf.len());
            assert_eq!(n, 5);
            assert_eq!(&buf[..5], b"world");
            assert_eq!(dhara_stream_offset(s), 11);

            dhara_stream_destroy(s);
        }
    }

    #[test]
    fn errors_are_reported_through_last_error() {
        unsafe {
            let s = dhara_stream_create(c"gopher://nowhere".as_ptr());
            assert!(s.is_null());
            let msg = CStr::from_ptr(dhara_last_error()).to_str().unwrap();
            assert!(msg.contains("gopher"));

            assert_eq!(
                dhara_stream_open(ptr::null_mut()),
                DharaErrorCode::DHARA_INVALID_ARGUMENT as c_int
            );
        }
    }
}
