//! Native artifact loading and entry-point resolution.
//!
//! The compute service ships a client library exporting four C entry points:
//!
//! ```text
//! int  Connect(const char* address, int port);
//! void Disconnect(void);
//! int  SubmitRTask(const unsigned char* envelope, int size, char* id, int id_capacity);
//! int  SubmitJuliaTask(const unsigned char* envelope, int size, char* id, int id_capacity);
//! ```
//!
//! Resolution is all-or-nothing: a [`NativeBinding`] only exists once every
//! entry point resolved. The rest of the crate talks to it through
//! [`ServiceApi`], never through raw symbols.

use std::ffi::{CStr, OsString};
use std::os::raw::{c_char, c_int, c_uchar};
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::envelope::TaskKind;
use crate::error::LoadError;

/// Artifact base name; the platform prefix and suffix are added at load time.
pub const DEFAULT_ARTIFACT: &str = "fluid_core_client";

pub const REQUIRED_SYMBOLS: [&str; 4] = ["Connect", "Disconnect", "SubmitRTask", "SubmitJuliaTask"];

pub type ConnectFn = unsafe extern "C" fn(address: *const c_char, port: c_int) -> c_int;
pub type DisconnectFn = unsafe extern "C" fn();
pub type SubmitFn = unsafe extern "C" fn(
    envelope: *const c_uchar,
    size: c_int,
    id: *mut c_char,
    id_capacity: c_int,
) -> c_int;

/// Status returned when a buffer length cannot be expressed as a C `int`.
const STATUS_OVERSIZE: i32 = -1;

/// Typed call surface of a connected compute service.
///
/// Status codes are the service's raw non-zero return values.
pub trait ServiceApi: Send + Sync {
    fn connect(&self, address: &CStr, port: i32) -> Result<(), i32>;

    fn disconnect(&self);

    /// Hand one encoded envelope to the service. On success the service may
    /// have written a NUL-terminated correlation id into `id_buf`.
    fn submit(&self, kind: TaskKind, envelope: &[u8], id_buf: &mut [u8]) -> Result<(), i32>;

    /// Release the underlying resources. Called exactly once, by the owning
    /// session.
    fn release(self: Box<Self>) {}
}

/// Something exported symbols can be looked up in.
pub trait SymbolSource {
    /// # Safety
    ///
    /// `T` must be a function pointer type matching the export's real signature.
    unsafe fn symbol<T: Copy>(&self, name: &str) -> Option<T>;
}

impl SymbolSource for Library {
    unsafe fn symbol<T: Copy>(&self, name: &str) -> Option<T> {
        let mut cname = Vec::with_capacity(name.len() + 1);
        cname.extend_from_slice(name.as_bytes());
        cname.push(0);
        // SAFETY: forwarded to the caller's contract on `T`.
        unsafe { self.get::<T>(&cname) }.ok().map(|sym| *sym)
    }
}

/// The resolved entry-point table.
#[derive(Clone, Copy)]
pub struct EntryPoints {
    connect: ConnectFn,
    disconnect: DisconnectFn,
    submit_r: SubmitFn,
    submit_julia: SubmitFn,
}

impl EntryPoints {
    /// Resolve every required symbol, or report all of the ones missing.
    ///
    /// # Safety
    ///
    /// Each export found under a required name must have the signature
    /// declared for it above.
    pub unsafe fn resolve<S: SymbolSource>(source: &S) -> Result<Self, Vec<&'static str>> {
        // SAFETY: signatures are the caller's contract.
        let (connect, disconnect, submit_r, submit_julia) = unsafe {
            (
                source.symbol::<ConnectFn>(REQUIRED_SYMBOLS[0]),
                source.symbol::<DisconnectFn>(REQUIRED_SYMBOLS[1]),
                source.symbol::<SubmitFn>(REQUIRED_SYMBOLS[2]),
                source.symbol::<SubmitFn>(REQUIRED_SYMBOLS[3]),
            )
        };

        match (connect, disconnect, submit_r, submit_julia) {
            (Some(connect), Some(disconnect), Some(submit_r), Some(submit_julia)) => Ok(Self {
                connect,
                disconnect,
                submit_r,
                submit_julia,
            }),
            (connect, disconnect, submit_r, submit_julia) => {
                let found = [
                    connect.is_some(),
                    disconnect.is_some(),
                    submit_r.is_some(),
                    submit_julia.is_some(),
                ];
                Err(REQUIRED_SYMBOLS
                    .iter()
                    .zip(found)
                    .filter(|(_, found)| !found)
                    .map(|(name, _)| *name)
                    .collect())
            }
        }
    }

    fn submit_fn(&self, kind: TaskKind) -> SubmitFn {
        match kind {
            TaskKind::R => self.submit_r,
            TaskKind::Julia => self.submit_julia,
        }
    }
}

/// Platform file name for an artifact, e.g. `libfluid_core_client.so`.
pub fn artifact_file_name(artifact: &str) -> OsString {
    libloading::library_filename(artifact)
}

pub fn artifact_path(directory: &Path, artifact: &str) -> PathBuf {
    directory.join(artifact_file_name(artifact))
}

/// A loaded artifact with every entry point resolved.
pub struct NativeBinding {
    path: PathBuf,
    entries: EntryPoints,
    // Keeps `entries` valid; dropped last.
    library: Library,
}

impl NativeBinding {
    pub fn load(directory: &Path, artifact: &str) -> Result<Self, LoadError> {
        let path = artifact_path(directory, artifact);
        tracing::debug!(path = %path.display(), "Loading service artifact");

        // SAFETY: loading runs the artifact's initializers. The artifact is
        // chosen by the host's configuration and trusted the same way.
        let library = unsafe { Library::new(&path) }.map_err(|source| {
            LoadError::ArtifactNotFound {
                path: path.clone(),
                source,
            }
        })?;

        // SAFETY: the required names are the service's documented C exports.
        match unsafe { EntryPoints::resolve(&library) } {
            Ok(entries) => {
                tracing::info!(path = %path.display(), "Service artifact bound");
                Ok(Self {
                    path,
                    entries,
                    library,
                })
            }
            Err(missing) => {
                tracing::error!(path = %path.display(), ?missing, "Service artifact is missing entry points");
                if let Err(e) = library.close() {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to unload incomplete artifact");
                }
                Err(LoadError::IncompleteBinding { path, missing })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the load handle. Consumes the binding, so no entry point can
    /// be called afterwards.
    pub fn unload(self) {
        let Self { path, library, .. } = self;
        match library.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "Service artifact unloaded"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to unload service artifact")
            }
        }
    }
}

impl std::fmt::Debug for NativeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBinding")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ServiceApi for NativeBinding {
    fn connect(&self, address: &CStr, port: i32) -> Result<(), i32> {
        // SAFETY: `library` outlives this call and `address` is NUL-terminated.
        let status = unsafe { (self.entries.connect)(address.as_ptr(), port) };
        match status {
            0 => Ok(()),
            code => Err(code),
        }
    }

    fn disconnect(&self) {
        // SAFETY: `library` outlives this call.
        unsafe { (self.entries.disconnect)() }
    }

    fn submit(&self, kind: TaskKind, envelope: &[u8], id_buf: &mut [u8]) -> Result<(), i32> {
        let (Ok(size), Ok(id_capacity)) = (c_int::try_from(envelope.len()), c_int::try_from(id_buf.len()))
        else {
            return Err(STATUS_OVERSIZE);
        };
        let submit = self.entries.submit_fn(kind);
        // SAFETY: both buffers are valid for the lengths passed and the
        // service writes at most `id_capacity` bytes into `id_buf`.
        let status = unsafe {
            submit(
                envelope.as_ptr(),
                size,
                id_buf.as_mut_ptr().cast::<c_char>(),
                id_capacity,
            )
        };
        match status {
            0 => Ok(()),
            code => Err(code),
        }
    }

    fn release(self: Box<Self>) {
        self.unload();
    }
}
