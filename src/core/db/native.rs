/// Native Engine Protocol Module
///
/// Thin, safe wrappers over the embedded SQLite C API as re-exported by
/// `rusqlite::ffi`. This is the only place (besides the function-callback
/// trampolines) where raw engine handles are dereferenced. Nothing here
/// translates status codes into errors; failing calls capture the engine's
/// message in an `Outcome`, which callers route through
/// `ConnectionInner::check_outcome`.

use rusqlite::ffi;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr::{self, NonNull};
use std::time::Duration;

/// Success
pub const OK: i32 = ffi::SQLITE_OK;
/// `step` produced a row
pub const ROW: i32 = ffi::SQLITE_ROW;
/// `step` finished
pub const DONE: i32 = ffi::SQLITE_DONE;
/// Contended database; the call may be retried
pub const BUSY: i32 = ffi::SQLITE_BUSY;
/// Misuse of the engine API (used for local argument failures)
pub const MISUSE: i32 = ffi::SQLITE_MISUSE;

/// True for the three non-error statuses.
pub fn is_success(code: i32) -> bool {
    code == OK || code == ROW || code == DONE
}

/// True for `SQLITE_BUSY` and its extended forms.
pub fn is_busy(code: i32) -> bool {
    code & 0xff == BUSY
}

/// A native status, with the engine's message captured alongside it when
/// the status is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub code: i32,
    pub message: Option<String>,
}

impl Outcome {
    fn local(code: i32) -> Self {
        Outcome {
            code,
            message: Some(error_string(code)),
        }
    }
}

/// Runs `f` while holding the connection's engine mutex and reads the
/// error message before releasing it, so no call from another thread can
/// replace the message in between.
///
/// # Safety
///
/// `db` must be a valid, open handle.
unsafe fn serialized(db: *mut ffi::sqlite3, f: impl FnOnce() -> i32) -> Outcome {
    // Null outside serialized threading mode; enter/leave accept null.
    let mutex = ffi::sqlite3_db_mutex(db);
    ffi::sqlite3_mutex_enter(mutex);
    let code = f();
    let message = if is_success(code) {
        None
    } else {
        Some(cstr_to_string(ffi::sqlite3_errmsg(db)))
    };
    ffi::sqlite3_mutex_leave(mutex);
    Outcome { code, message }
}

/// Engine storage class of a column or function argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl StorageClass {
    /// Maps a native type tag; `None` for tags outside the known set.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            ffi::SQLITE_INTEGER => Some(StorageClass::Integer),
            ffi::SQLITE_FLOAT => Some(StorageClass::Float),
            ffi::SQLITE_TEXT => Some(StorageClass::Text),
            ffi::SQLITE_BLOB => Some(StorageClass::Blob),
            ffi::SQLITE_NULL => Some(StorageClass::Null),
            _ => None,
        }
    }
}

/// Generic English text for a status code.
pub fn error_string(code: i32) -> String {
    // SAFETY: sqlite3_errstr returns a pointer to a static string.
    unsafe { cstr_to_string(ffi::sqlite3_errstr(code)) }
}

unsafe fn cstr_to_string(p: *const c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        CStr::from_ptr(p).to_string_lossy().into_owned()
    }
}

/// Owned native database handle.
#[derive(Debug)]
pub struct RawDb(NonNull<ffi::sqlite3>);

// SAFETY: the bundled engine is compiled in serialized threading mode, and
// every RawDb lives behind a Mutex in ConnectionInner.
unsafe impl Send for RawDb {}

/// Outcome of a prepare call.
pub struct Prepared {
    pub outcome: Outcome,
    pub stmt: Option<RawStmt>,
    /// Unconsumed text after the first command.
    pub tail: String,
}

impl RawDb {
    /// Opens (or creates) the database at `path`.
    ///
    /// On failure the handle the engine may still have allocated is closed
    /// and the engine's message is returned alongside the status.
    pub fn open(path: &str) -> std::result::Result<RawDb, (i32, String)> {
        let c_path = CString::new(path)
            .map_err(|_| (MISUSE, "path contains an interior NUL byte".to_string()))?;
        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: c_path is NUL terminated; db is a valid out pointer.
        let status = unsafe { ffi::sqlite3_open(c_path.as_ptr(), &mut db) };

        match NonNull::new(db) {
            Some(handle) if status == OK => Ok(RawDb(handle)),
            Some(handle) => {
                let raw = RawDb(handle);
                let message = raw.errmsg();
                let _ = raw.close();
                Err((status, message))
            }
            None => Err((status, error_string(status))),
        }
    }

    /// Closes the handle. On a non-OK status the engine keeps the handle
    /// open and it is handed back to the caller.
    pub fn close(self) -> std::result::Result<(), (i32, RawDb)> {
        // SAFETY: self owns the handle; it is only reused if the close failed.
        let status = unsafe { ffi::sqlite3_close(self.0.as_ptr()) };
        if status == OK {
            Ok(())
        } else {
            Err((status, self))
        }
    }

    /// Closes the handle with `sqlite3_close_v2`: if statements are still
    /// unfinalized the engine keeps the connection as a zombie and frees it
    /// when the last one is finalized.
    pub fn close_deferred(self) -> i32 {
        // SAFETY: self owns the handle and is consumed.
        unsafe { ffi::sqlite3_close_v2(self.0.as_ptr()) }
    }

    /// Most recent error message recorded on this handle.
    pub fn errmsg(&self) -> String {
        // SAFETY: handle is valid; the returned string is owned by the engine
        // and copied immediately.
        unsafe { cstr_to_string(ffi::sqlite3_errmsg(self.0.as_ptr())) }
    }

    pub fn set_extended_result_codes(&self, on: bool) -> i32 {
        // SAFETY: handle is valid.
        unsafe { ffi::sqlite3_extended_result_codes(self.0.as_ptr(), on as c_int) }
    }

    pub fn busy_timeout(&self, timeout: Duration) -> i32 {
        let ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;
        // SAFETY: handle is valid.
        unsafe { ffi::sqlite3_busy_timeout(self.0.as_ptr(), ms) }
    }

    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: handle is valid.
        unsafe { ffi::sqlite3_last_insert_rowid(self.0.as_ptr()) }
    }

    /// Prepares the first command in `sql`.
    pub fn prepare(&self, sql: &str) -> Prepared {
        let Ok(len) = c_int::try_from(sql.len()) else {
            return Prepared {
                outcome: Outcome::local(ffi::SQLITE_TOOBIG),
                stmt: None,
                tail: String::new(),
            };
        };

        let base = sql.as_ptr() as *const c_char;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        // SAFETY: base points at len readable bytes; the engine never reads
        // past nByte when it is non-negative.
        let outcome = unsafe {
            serialized(self.0.as_ptr(), || {
                ffi::sqlite3_prepare_v2(self.0.as_ptr(), base, len, &mut stmt, &mut tail)
            })
        };

        let remainder = if tail.is_null() {
            String::new()
        } else {
            let offset = (tail as usize).saturating_sub(base as usize);
            sql.get(offset..).unwrap_or_default().to_string()
        };

        Prepared {
            outcome,
            stmt: NonNull::new(stmt).map(RawStmt),
            tail: remainder,
        }
    }

    /// Runs a raw call against the handle under the engine mutex.
    ///
    /// # Safety
    ///
    /// `f` must only use the pointer it is given for the duration of the
    /// call.
    pub(crate) unsafe fn call(&self, f: impl FnOnce(*mut ffi::sqlite3) -> i32) -> Outcome {
        let db = self.0.as_ptr();
        serialized(db, || f(db))
    }
}

/// Owned native prepared-statement handle.
#[derive(Debug)]
pub struct RawStmt(NonNull<ffi::sqlite3_stmt>);

// SAFETY: a RawStmt is only ever touched through its StatementSlot mutex.
unsafe impl Send for RawStmt {}

impl RawStmt {
    /// Releases the handle. The returned status repeats the most recent
    /// execution error, if any.
    pub fn finalize(self) -> i32 {
        // SAFETY: self owns the handle and is consumed.
        unsafe { ffi::sqlite3_finalize(self.0.as_ptr()) }
    }

    /// Runs `f` under the owning connection's engine mutex, capturing the
    /// error message of a failing status.
    pub fn guarded(&self, f: impl FnOnce(&RawStmt) -> i32) -> Outcome {
        // SAFETY: a live statement always has a live connection handle.
        unsafe {
            let db = ffi::sqlite3_db_handle(self.0.as_ptr());
            if db.is_null() {
                return Outcome::local(MISUSE);
            }
            serialized(db, || f(self))
        }
    }

    pub fn step(&self) -> Outcome {
        // SAFETY: handle is valid for the lifetime of self.
        self.guarded(|raw| unsafe { ffi::sqlite3_step(raw.0.as_ptr()) })
    }

    pub fn reset(&self) -> i32 {
        // SAFETY: handle is valid.
        unsafe { ffi::sqlite3_reset(self.0.as_ptr()) }
    }

    pub fn parameter_count(&self) -> usize {
        // SAFETY: handle is valid.
        let count = unsafe { ffi::sqlite3_bind_parameter_count(self.0.as_ptr()) };
        count.max(0) as usize
    }

    pub fn bind_null(&self, index: c_int) -> i32 {
        // SAFETY: handle is valid; out-of-range indexes return SQLITE_RANGE.
        unsafe { ffi::sqlite3_bind_null(self.0.as_ptr(), index) }
    }

    pub fn bind_int(&self, index: c_int, value: i32) -> i32 {
        // SAFETY: as above.
        unsafe { ffi::sqlite3_bind_int(self.0.as_ptr(), index, value) }
    }

    pub fn bind_int64(&self, index: c_int, value: i64) -> i32 {
        // SAFETY: as above.
        unsafe { ffi::sqlite3_bind_int64(self.0.as_ptr(), index, value) }
    }

    pub fn bind_double(&self, index: c_int, value: f64) -> i32 {
        // SAFETY: as above.
        unsafe { ffi::sqlite3_bind_double(self.0.as_ptr(), index, value) }
    }

    /// Binds a copy of `value` (transient destructor).
    pub fn bind_text(&self, index: c_int, value: &str) -> i32 {
        let Ok(len) = c_int::try_from(value.len()) else {
            return ffi::SQLITE_TOOBIG;
        };
        // SAFETY: the engine copies len bytes before returning because of
        // SQLITE_TRANSIENT.
        unsafe {
            ffi::sqlite3_bind_text(
                self.0.as_ptr(),
                index,
                value.as_ptr() as *const c_char,
                len,
                ffi::SQLITE_TRANSIENT(),
            )
        }
    }

    /// Binds a copy of `value` (transient destructor).
    pub fn bind_blob(&self, index: c_int, value: &[u8]) -> i32 {
        let Ok(len) = c_int::try_from(value.len()) else {
            return ffi::SQLITE_TOOBIG;
        };
        // A zero-length blob still needs a non-null pointer, otherwise the
        // engine binds NULL.
        static EMPTY: [u8; 1] = [0];
        let data = if value.is_empty() {
            EMPTY.as_ptr()
        } else {
            value.as_ptr()
        };
        // SAFETY: see bind_text.
        unsafe {
            ffi::sqlite3_bind_blob(
                self.0.as_ptr(),
                index,
                data as *const c_void,
                len,
                ffi::SQLITE_TRANSIENT(),
            )
        }
    }

    pub fn column_count(&self) -> usize {
        // SAFETY: handle is valid.
        let count = unsafe { ffi::sqlite3_column_count(self.0.as_ptr()) };
        count.max(0) as usize
    }

    pub fn column_name(&self, index: c_int) -> String {
        // SAFETY: handle is valid; the name is copied before any other call.
        unsafe { cstr_to_string(ffi::sqlite3_column_name(self.0.as_ptr(), index)) }
    }

    pub fn column_type(&self, index: c_int) -> i32 {
        // SAFETY: handle is valid and positioned on a row.
        unsafe { ffi::sqlite3_column_type(self.0.as_ptr(), index) }
    }

    pub fn column_int64(&self, index: c_int) -> i64 {
        // SAFETY: as above.
        unsafe { ffi::sqlite3_column_int64(self.0.as_ptr(), index) }
    }

    pub fn column_double(&self, index: c_int) -> f64 {
        // SAFETY: as above.
        unsafe { ffi::sqlite3_column_double(self.0.as_ptr(), index) }
    }

    pub fn column_text(&self, index: c_int) -> String {
        // SAFETY: column_text must be called before column_bytes so the
        // length refers to the UTF-8 form; both pointers stay valid until
        // the next step/reset/finalize, and the bytes are copied here.
        unsafe {
            let data = ffi::sqlite3_column_text(self.0.as_ptr(), index);
            let len = ffi::sqlite3_column_bytes(self.0.as_ptr(), index);
            if data.is_null() || len <= 0 {
                return String::new();
            }
            let bytes = std::slice::from_raw_parts(data as *const u8, len as usize);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }

    pub fn column_blob(&self, index: c_int) -> Vec<u8> {
        // SAFETY: see column_text.
        unsafe {
            let data = ffi::sqlite3_column_blob(self.0.as_ptr(), index);
            let len = ffi::sqlite3_column_bytes(self.0.as_ptr(), index);
            if data.is_null() || len <= 0 {
                return Vec::new();
            }
            std::slice::from_raw_parts(data as *const u8, len as usize).to_vec()
        }
    }
}
