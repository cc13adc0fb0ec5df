/// SQL Function Registration Module
///
/// Scalar functions, aggregates and collations are registered explicitly
/// with a `FunctionDescriptor` that names the function, its arity and the
/// Rust callback. Callbacks run inside the engine; a returned error or a
/// panic becomes an SQL error for the statement being stepped.

use super::native::{self, StorageClass};
use super::{Connection, Value};
use crate::core::{Result, SqlstepError};
use rusqlite::ffi;
use std::cmp::Ordering;
use std::ffi::{c_char, c_int, c_void, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use tracing::warn;

/// Scalar callback: one call per row.
pub type ScalarFn = Box<dyn Fn(&[Value]) -> Result<Value> + Send + 'static>;

/// Produces a fresh accumulator for each aggregate group.
pub type AggregateFactory = Box<dyn Fn() -> Box<dyn AggregateState> + Send + 'static>;

/// Collation callback comparing two text values.
pub type CollationFn = Box<dyn Fn(&str, &str) -> Ordering + Send + 'static>;

/// Accumulator of an aggregate function for one group.
pub trait AggregateState: Send {
    fn step(&mut self, args: &[Value]) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Value>;
}

/// What kind of callable is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
    Collation,
}

pub enum FunctionCallback {
    Scalar(ScalarFn),
    Aggregate(AggregateFactory),
    Collation(CollationFn),
}

/// A function to register on a connection.
///
/// `arity` is the number of SQL arguments, or -1 for any number. It is
/// ignored for collations.
pub struct FunctionDescriptor {
    pub name: String,
    pub arity: i32,
    pub callback: FunctionCallback,
}

impl FunctionDescriptor {
    pub fn scalar<F>(name: &str, arity: i32, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + 'static,
    {
        FunctionDescriptor {
            name: name.to_string(),
            arity,
            callback: FunctionCallback::Scalar(Box::new(f)),
        }
    }

    pub fn aggregate<F, S>(name: &str, arity: i32, init: F) -> Self
    where
        F: Fn() -> S + Send + 'static,
        S: AggregateState + 'static,
    {
        FunctionDescriptor {
            name: name.to_string(),
            arity,
            callback: FunctionCallback::Aggregate(Box::new(move || {
                Box::new(init()) as Box<dyn AggregateState>
            })),
        }
    }

    pub fn collation<F>(name: &str, compare: F) -> Self
    where
        F: Fn(&str, &str) -> Ordering + Send + 'static,
    {
        FunctionDescriptor {
            name: name.to_string(),
            arity: 2,
            callback: FunctionCallback::Collation(Box::new(compare)),
        }
    }

    pub fn kind(&self) -> FunctionKind {
        match self.callback {
            FunctionCallback::Scalar(_) => FunctionKind::Scalar,
            FunctionCallback::Aggregate(_) => FunctionKind::Aggregate,
            FunctionCallback::Collation(_) => FunctionKind::Collation,
        }
    }
}

impl std::fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("kind", &self.kind())
            .finish()
    }
}

fn function_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|_| SqlstepError::Function(format!("invalid function name: {:?}", name)))
}

impl Connection {
    /// Registers `descriptor` on this connection, replacing any function
    /// with the same name and arity.
    ///
    /// ```
    /// use sqlstep::{Connection, FunctionDescriptor, Value};
    ///
    /// let conn = Connection::open_in_memory()?;
    /// conn.add_function(FunctionDescriptor::scalar("double_it", 1, |args| {
    ///     Ok(Value::Integer(args[0].as_i64().unwrap_or(0) * 2))
    /// }))?;
    /// assert_eq!(conn.query_scalar("SELECT double_it(21)")?, Value::Integer(42));
    /// # Ok::<(), sqlstep::SqlstepError>(())
    /// ```
    pub fn add_function(&self, descriptor: FunctionDescriptor) -> Result<()> {
        let name = function_name(&descriptor.name)?;
        let arity = descriptor.arity;
        let outcome = self.inner().with_db(|db| unsafe {
            db.call(|raw| register(raw, &name, arity, descriptor.callback))
        })?;
        self.inner().check_outcome(outcome, None)
    }

    /// Unregisters a function previously added with `add_function`.
    ///
    /// Fails with a busy `Status` error while a statement that uses the
    /// function is still live.
    pub fn remove_function(&self, name: &str, arity: i32, kind: FunctionKind) -> Result<()> {
        let c_name = function_name(name)?;
        let outcome = self.inner().with_db(|db| unsafe {
            db.call(|raw| match kind {
                FunctionKind::Collation => ffi::sqlite3_create_collation_v2(
                    raw,
                    c_name.as_ptr(),
                    ffi::SQLITE_UTF8,
                    ptr::null_mut(),
                    None,
                    None,
                ),
                FunctionKind::Scalar | FunctionKind::Aggregate => ffi::sqlite3_create_function_v2(
                    raw,
                    c_name.as_ptr(),
                    arity,
                    ffi::SQLITE_UTF8,
                    ptr::null_mut(),
                    None,
                    None,
                    None,
                    None,
                ),
            })
        })?;
        self.inner().check_outcome(outcome, None)
    }
}

/// Hands the boxed callback to the engine, which owns it from here on.
unsafe fn register(
    db: *mut ffi::sqlite3,
    name: &CString,
    arity: c_int,
    callback: FunctionCallback,
) -> i32 {
    match callback {
        FunctionCallback::Scalar(f) => {
            let data = Box::into_raw(Box::new(f)) as *mut c_void;
            // xDestroy runs on replacement, close, and on a failed call.
            ffi::sqlite3_create_function_v2(
                db,
                name.as_ptr(),
                arity,
                ffi::SQLITE_UTF8,
                data,
                Some(call_scalar),
                None,
                None,
                Some(drop_boxed::<ScalarFn>),
            )
        }
        FunctionCallback::Aggregate(factory) => {
            let data = Box::into_raw(Box::new(factory)) as *mut c_void;
            ffi::sqlite3_create_function_v2(
                db,
                name.as_ptr(),
                arity,
                ffi::SQLITE_UTF8,
                data,
                None,
                Some(call_step),
                Some(call_final),
                Some(drop_boxed::<AggregateFactory>),
            )
        }
        FunctionCallback::Collation(f) => {
            let data = Box::into_raw(Box::new(f)) as *mut c_void;
            let code = ffi::sqlite3_create_collation_v2(
                db,
                name.as_ptr(),
                ffi::SQLITE_UTF8,
                data,
                Some(call_compare),
                Some(drop_boxed::<CollationFn>),
            );
            // Unlike create_function_v2, a failed collation registration
            // does not invoke xDestroy.
            if code != native::OK {
                drop_boxed::<CollationFn>(data);
            }
            code
        }
    }
}

unsafe extern "C" fn drop_boxed<T>(data: *mut c_void) {
    drop(Box::from_raw(data as *mut T));
}

unsafe fn bytes<'a>(data: *const c_void, len: c_int) -> &'a [u8] {
    if data.is_null() || len <= 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data as *const u8, len as usize)
    }
}

unsafe fn value_from_raw(value: *mut ffi::sqlite3_value) -> Value {
    match StorageClass::from_tag(ffi::sqlite3_value_type(value)) {
        Some(StorageClass::Integer) => Value::Integer(ffi::sqlite3_value_int64(value)),
        Some(StorageClass::Float) => Value::Real(ffi::sqlite3_value_double(value)),
        Some(StorageClass::Text) => {
            let data = ffi::sqlite3_value_text(value) as *const c_void;
            let len = ffi::sqlite3_value_bytes(value);
            Value::Text(String::from_utf8_lossy(bytes(data, len)).into_owned())
        }
        Some(StorageClass::Blob) => {
            let data = ffi::sqlite3_value_blob(value);
            let len = ffi::sqlite3_value_bytes(value);
            Value::Blob(bytes(data, len).to_vec())
        }
        Some(StorageClass::Null) | None => Value::Null,
    }
}

unsafe fn collect_args(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> Vec<Value> {
    (0..argc.max(0) as usize)
        .map(|i| value_from_raw(*argv.add(i)))
        .collect()
}

unsafe fn set_error(ctx: *mut ffi::sqlite3_context, message: &str) {
    let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
    ffi::sqlite3_result_error(ctx, message.as_ptr() as *const c_char, len);
}

unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) {
    match value {
        Value::Null => ffi::sqlite3_result_null(ctx),
        Value::Integer(i) => ffi::sqlite3_result_int64(ctx, *i),
        Value::Real(f) => ffi::sqlite3_result_double(ctx, *f),
        Value::Text(s) => match c_int::try_from(s.len()) {
            Ok(len) => ffi::sqlite3_result_text(
                ctx,
                s.as_ptr() as *const c_char,
                len,
                ffi::SQLITE_TRANSIENT(),
            ),
            Err(_) => ffi::sqlite3_result_error_toobig(ctx),
        },
        Value::Blob(b) => match c_int::try_from(b.len()) {
            Ok(len) => ffi::sqlite3_result_blob(
                ctx,
                b.as_ptr() as *const c_void,
                len,
                ffi::SQLITE_TRANSIENT(),
            ),
            Err(_) => ffi::sqlite3_result_error_toobig(ctx),
        },
    }
}

unsafe fn deliver(ctx: *mut ffi::sqlite3_context, outcome: std::thread::Result<Result<Value>>) {
    match outcome {
        Ok(Ok(value)) => set_result(ctx, &value),
        Ok(Err(e)) => set_error(ctx, &e.to_string()),
        Err(_) => {
            warn!("SQL function callback panicked");
            set_error(ctx, "function callback panicked");
        }
    }
}

unsafe extern "C" fn call_scalar(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let f = &*(ffi::sqlite3_user_data(ctx) as *const ScalarFn);
    let args = collect_args(argc, argv);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&args)));
    deliver(ctx, outcome);
}

/// Aggregate context payload: null until the group's first row.
type StatePtr = *mut Box<dyn AggregateState>;

unsafe extern "C" fn call_step(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let slot =
        ffi::sqlite3_aggregate_context(ctx, std::mem::size_of::<StatePtr>() as c_int) as *mut StatePtr;
    if slot.is_null() {
        ffi::sqlite3_result_error_nomem(ctx);
        return;
    }

    let factory = &*(ffi::sqlite3_user_data(ctx) as *const AggregateFactory);
    let args = collect_args(argc, argv);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if (*slot).is_null() {
            *slot = Box::into_raw(Box::new(factory()));
        }
        (**slot).step(&args)
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => set_error(ctx, &e.to_string()),
        Err(_) => {
            warn!("SQL aggregate step panicked");
            set_error(ctx, "aggregate step panicked");
        }
    }
}

unsafe extern "C" fn call_final(ctx: *mut ffi::sqlite3_context) {
    // A zero size never allocates: null means the group had no rows.
    let slot = ffi::sqlite3_aggregate_context(ctx, 0) as *mut StatePtr;
    let factory = &*(ffi::sqlite3_user_data(ctx) as *const AggregateFactory);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let state = if slot.is_null() || (*slot).is_null() {
            factory()
        } else {
            let state = *Box::from_raw(*slot);
            *slot = ptr::null_mut();
            state
        };
        state.finish()
    }));
    deliver(ctx, outcome);
}

unsafe extern "C" fn call_compare(
    data: *mut c_void,
    len_a: c_int,
    a: *const c_void,
    len_b: c_int,
    b: *const c_void,
) -> c_int {
    let compare = &*(data as *const CollationFn);
    let a = String::from_utf8_lossy(bytes(a, len_a));
    let b = String::from_utf8_lossy(bytes(b, len_b));

    match panic::catch_unwind(AssertUnwindSafe(|| compare(&*a, &*b))) {
        Ok(Ordering::Less) => -1,
        Ok(Ordering::Equal) => 0,
        Ok(Ordering::Greater) => 1,
        Err(_) => {
            warn!("SQL collation callback panicked");
            0
        }
    }
}
