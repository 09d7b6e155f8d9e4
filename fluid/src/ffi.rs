//! C ABI for C, C++ and R hosts.
//!
//! Every call takes an opaque `FluidSession*` created by `fluid_initialize`
//! and destroyed by `fluid_shutdown`. There is no process-global state.
//! Functions return an [`ErrorCode`] value (`0` on success); details of each
//! failure are logged through `tracing`.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;
use std::ptr;

use crate::binding::DEFAULT_ARTIFACT;
use crate::config::SessionConfig;
use crate::envelope::TaskKind;
use crate::error::{ErrorCode, FluidError};
use crate::session::Session;

/// Returned by `fluid_task_status` when no record exists for the id.
pub const FLUID_STATUS_UNKNOWN: c_int = -1;

/// Opaque session handle.
pub struct FluidSession {
    session: Session,
}

fn fail(err: &FluidError) -> c_int {
    tracing::warn!(error = %err, "Fluid call failed");
    ErrorCode::from(err).code()
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, c_int> {
    if ptr.is_null() {
        tracing::warn!(argument = name, "Null pointer argument");
        return Err(ErrorCode::NullPointer.code());
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| fail(&FluidError::InvalidArgument(format!("{name} is not valid UTF-8"))))
}

/// # Safety
///
/// `handle` must be null or a live pointer from `fluid_initialize`.
unsafe fn session_mut<'a>(handle: *mut FluidSession) -> Result<&'a mut Session, c_int> {
    // SAFETY: per the caller's contract.
    match unsafe { handle.as_mut() } {
        Some(handle) => Ok(&mut handle.session),
        None => Err(ErrorCode::NullPointer.code()),
    }
}

/// Load the service artifact from `directory` and create a session.
///
/// `artifact` may be null for the default artifact name. On success `*out`
/// receives a handle to pass to every other call.
///
/// # Safety
///
/// `directory` and a non-null `artifact` must be NUL-terminated strings;
/// `out` must be valid for a pointer write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fluid_initialize(
    directory: *const c_char,
    artifact: *const c_char,
    out: *mut *mut FluidSession,
) -> c_int {
    if out.is_null() {
        return ErrorCode::NullPointer.code();
    }
    // SAFETY: `out` is non-null and writable per the contract.
    unsafe { *out = ptr::null_mut() };

    // SAFETY: per the contract.
    let directory = match unsafe { str_arg(directory, "directory") } {
        Ok(dir) => PathBuf::from(dir),
        Err(code) => return code,
    };
    let artifact = if artifact.is_null() {
        DEFAULT_ARTIFACT
    } else {
        // SAFETY: per the contract.
        match unsafe { str_arg(artifact, "artifact") } {
            Ok(name) => name,
            Err(code) => return code,
        }
    };

    match Session::initialize(SessionConfig::new(directory).with_artifact(artifact)) {
        Ok(session) => {
            let handle = Box::new(FluidSession { session });
            // SAFETY: as above.
            unsafe { *out = Box::into_raw(handle) };
            ErrorCode::Ok.code()
        }
        Err(e) => fail(&e),
    }
}

/// # Safety
///
/// `handle` must come from `fluid_initialize`; `address` must be a
/// NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fluid_connect(
    handle: *mut FluidSession,
    address: *const c_char,
    port: c_int,
) -> c_int {
    // SAFETY: per the contract.
    let (session, address) = match unsafe { (session_mut(handle), str_arg(address, "address")) } {
        (Ok(session), Ok(address)) => (session, address),
        (Err(code), _) | (_, Err(code)) => return code,
    };
    let Ok(port) = u16::try_from(port) else {
        return fail(&FluidError::InvalidArgument(format!("port {port} out of range")));
    };
    match session.connect(address, port) {
        Ok(()) => ErrorCode::Ok.code(),
        Err(e) => fail(&e),
    }
}

/// # Safety
///
/// `handle` must come from `fluid_initialize`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fluid_disconnect(handle: *mut FluidSession) -> c_int {
    // SAFETY: per the contract.
    match unsafe { session_mut(handle) } {
        Ok(session) => {
            session.disconnect();
            ErrorCode::Ok.code()
        }
        Err(code) => code,
    }
}

/// Submit a task. `kind` is `0` for R and `1` for Julia. The correlation id
/// is written NUL-terminated into `id_out`, which must hold at least the
/// session's id capacity plus one byte.
///
/// # Safety
///
/// `handle` must come from `fluid_initialize`; `function` must be a
/// NUL-terminated string; `data` must be readable for `len` bytes (or null
/// when `len` is 0); `id_out` must be writable for `id_capacity` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fluid_submit(
    handle: *mut FluidSession,
    kind: c_int,
    function: *const c_char,
    data: *const u8,
    len: usize,
    id_out: *mut c_char,
    id_capacity: usize,
) -> c_int {
    // SAFETY: per the contract.
    let (session, function) = match unsafe { (session_mut(handle), str_arg(function, "function")) } {
        (Ok(session), Ok(function)) => (session, function),
        (Err(code), _) | (_, Err(code)) => return code,
    };
    let Some(kind) = TaskKind::from_code(kind) else {
        return fail(&FluidError::InvalidArgument(format!("unknown task kind {kind}")));
    };
    if id_out.is_null() || (data.is_null() && len > 0) {
        return ErrorCode::NullPointer.code();
    }
    if id_capacity <= session.id_capacity() {
        tracing::warn!(id_capacity, required = session.id_capacity() + 1, "Id buffer too small");
        return ErrorCode::BufferTooSmall.code();
    }

    let data = if len == 0 {
        &[][..]
    } else {
        // SAFETY: non-null and readable for `len` bytes per the contract.
        unsafe { std::slice::from_raw_parts(data, len) }
    };

    match session.submit(kind, function, data.to_vec()) {
        Ok(task) => {
            let id = task.id().as_bytes();
            if id.len() >= id_capacity {
                tracing::error!(id_len = id.len(), id_capacity, "Correlation id does not fit the caller's buffer");
                return ErrorCode::BufferTooSmall.code();
            }
            // SAFETY: `id_out` is writable for `id_capacity` bytes and
            // `id.len() + 1 <= id_capacity`.
            unsafe {
                ptr::copy_nonoverlapping(id.as_ptr(), id_out.cast::<u8>(), id.len());
                *id_out.add(id.len()) = 0;
            }
            ErrorCode::Ok.code()
        }
        Err(e) => fail(&e),
    }
}

/// Apply one result envelope received by the host.
///
/// # Safety
///
/// `handle` must come from `fluid_initialize`; `envelope` must be readable
/// for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fluid_deliver(
    handle: *mut FluidSession,
    envelope: *const u8,
    len: usize,
) -> c_int {
    // SAFETY: per the contract.
    let session = match unsafe { session_mut(handle) } {
        Ok(session) => session,
        Err(code) => return code,
    };
    if envelope.is_null() {
        return ErrorCode::NullPointer.code();
    }
    // SAFETY: non-null and readable for `len` bytes per the contract.
    let envelope = unsafe { std::slice::from_raw_parts(envelope, len) };
    match session.deliver(envelope) {
        Ok(_) => ErrorCode::Ok.code(),
        Err(e) => fail(&e),
    }
}

/// Status code of a task (`0` queued, `1` running, `2` complete, `3`
/// failed), or `FLUID_STATUS_UNKNOWN`.
///
/// # Safety
///
/// `handle` must come from `fluid_initialize`; `id` must be a NUL-terminated
/// string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fluid_task_status(handle: *mut FluidSession, id: *const c_char) -> c_int {
    // SAFETY: per the contract.
    let (session, id) = match unsafe { (session_mut(handle), str_arg(id, "id")) } {
        (Ok(session), Ok(id)) => (session, id),
        _ => return FLUID_STATUS_UNKNOWN,
    };
    session
        .state(id)
        .map(|state| state.status().code())
        .unwrap_or(FLUID_STATUS_UNKNOWN)
}

/// Shut the session down and free the handle. Null is a no-op.
///
/// # Safety
///
/// `handle` must be null or come from `fluid_initialize`, and must not be
/// used again.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fluid_shutdown(handle: *mut FluidSession) {
    if handle.is_null() {
        return;
    }
    // SAFETY: the handle was produced by `Box::into_raw` in `fluid_initialize`.
    let mut handle = unsafe { Box::from_raw(handle) };
    handle.session.shutdown();
}

#[cfg(test)]
impl FluidSession {
    /// Box a session around an already-resolved service, as
    /// `fluid_initialize` would.
    pub(crate) fn boxed<B>(binding: B) -> *mut FluidSession
    where
        B: crate::binding::ServiceApi + 'static,
    {
        let session = Session::with_binding(binding, &SessionConfig::new("/unused"))
            .expect("test session");
        Box::into_raw(Box::new(FluidSession { session }))
    }
}
