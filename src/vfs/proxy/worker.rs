//! Worker side of the Async-Proxy transport (spec.md §4.4.5): the only
//! place allowed to touch OPFS's asynchronous API, and the main-thread
//! startup handshake that hands a worker its shared buffers.
//!
//! The actual file operations reuse the `FileSystemSyncAccessHandle` calls
//! from [`crate::vfs::sahpool`] (`read_with_u8_array_and_options` /
//! `write_with_u8_array_and_options` / `truncate_with_f64` / `flush` /
//! `get_size`), acquired per virtual path on first `xOpen` instead of out of
//! a fixed pool -- a worker thread may call `createSyncAccessHandle` the
//! same way the SAHPool does, it just does so lazily here.

use super::s11n::{self, Value};
use super::{ProxyError, SharedState, IO_BLOCK_SIZE, OP_NAMES};
use crate::libsqlite3::{
    SQLITE_CANTOPEN, SQLITE_IOERR, SQLITE_IOERR_DELETE, SQLITE_IOERR_FSYNC,
    SQLITE_IOERR_SHORT_READ, SQLITE_IOERR_TRUNCATE, SQLITE_IOERR_WRITE, SQLITE_OK,
};
use js_sys::{Array, Atomics, Int32Array, Object, Reflect, Uint8Array};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use wasm_bindgen::prelude::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    DedicatedWorkerGlobalScope, FileSystemGetFileOptions, FileSystemReadWriteOptions,
    FileSystemSyncAccessHandle, MessageEvent, WorkerOptions, WorkerType,
};

const MSG_LOADED: &str = "opfs-async-loaded";
const MSG_INITED: &str = "opfs-async-inited";
const MSG_UNAVAILABLE: &str = "opfs-unavailable";

/// How long the worker blocks on one `Atomics.wait` before looping back to
/// check for a pending shutdown, per spec.md §5 ("~150ms idle bound").
const IDLE_WAIT_MS: f64 = 150.0;

/// Keys of the state payload the main thread posts after `opfs-async-loaded`
/// (spec.md §4.4.5: "buffers, op-id map, SQLITE_* code map, endianness
/// probe"). The worker cross-checks every field against its own build
/// before trusting the buffers and announcing `opfs-async-inited`.
const KEY_OP_BUF: &str = "opBuf";
const KEY_IO_BUF: &str = "ioBuf";
const KEY_OP_NAMES: &str = "opNames";
const KEY_CODES: &str = "codes";
const KEY_ENDIANNESS: &str = "endianness";

/// Arbitrary four-byte pattern both sides agree on; a worker built against a
/// differently-endianed or differently-laid-out `Int32Array` view would read
/// this back as something other than itself.
const ENDIANNESS_PROBE: i32 = 0x0102_0304;

fn sqlite_codes() -> Object {
    let obj = Object::new();
    for (name, code) in [
        ("SQLITE_OK", SQLITE_OK),
        ("SQLITE_IOERR", SQLITE_IOERR),
        ("SQLITE_IOERR_DELETE", SQLITE_IOERR_DELETE),
        ("SQLITE_IOERR_FSYNC", SQLITE_IOERR_FSYNC),
        ("SQLITE_IOERR_SHORT_READ", SQLITE_IOERR_SHORT_READ),
        ("SQLITE_IOERR_TRUNCATE", SQLITE_IOERR_TRUNCATE),
        ("SQLITE_IOERR_WRITE", SQLITE_IOERR_WRITE),
        ("SQLITE_CANTOPEN", SQLITE_CANTOPEN),
    ] {
        let _ = Reflect::set(&obj, &JsValue::from_str(name), &JsValue::from_f64(code as f64));
    }
    obj
}

/// Builds the payload the main thread posts once it has seen
/// `opfs-async-loaded`.
fn handshake_payload(state: &SharedState) -> JsValue {
    let obj = Object::new();
    let _ = Reflect::set(&obj, &JsValue::from_str(KEY_OP_BUF), &state.op_buf);
    let _ = Reflect::set(&obj, &JsValue::from_str(KEY_IO_BUF), &state.io_buf);
    let names = Array::new();
    for name in OP_NAMES {
        names.push(&JsValue::from_str(name));
    }
    let _ = Reflect::set(&obj, &JsValue::from_str(KEY_OP_NAMES), &names);
    let _ = Reflect::set(&obj, &JsValue::from_str(KEY_CODES), &sqlite_codes());
    let _ = Reflect::set(
        &obj,
        &JsValue::from_str(KEY_ENDIANNESS),
        &JsValue::from_f64(ENDIANNESS_PROBE as f64),
    );
    obj.into()
}

/// Validates `payload` against this build's own op-id map, code map, and
/// endianness probe, returning the reconstructed [`SharedState`] on a match.
fn parse_handshake_payload(payload: &JsValue) -> Option<SharedState> {
    let op_buf: Int32Array = Reflect::get(payload, &JsValue::from_str(KEY_OP_BUF))
        .ok()?
        .dyn_into()
        .ok()?;
    let io_buf: Uint8Array = Reflect::get(payload, &JsValue::from_str(KEY_IO_BUF))
        .ok()?
        .dyn_into()
        .ok()?;

    let names: Array = Reflect::get(payload, &JsValue::from_str(KEY_OP_NAMES))
        .ok()?
        .dyn_into()
        .ok()?;
    if names.length() as usize != OP_NAMES.len() {
        return None;
    }
    for (i, expected) in OP_NAMES.iter().enumerate() {
        if names.get(i as u32).as_string().as_deref() != Some(*expected) {
            return None;
        }
    }

    let codes = Reflect::get(payload, &JsValue::from_str(KEY_CODES)).ok()?;
    let ours = sqlite_codes();
    for key in Object::keys(&ours).iter() {
        let ours_val = Reflect::get(&ours, &key).ok()?.as_f64()?;
        let theirs_val = Reflect::get(&codes, &key).ok()?.as_f64()?;
        if ours_val != theirs_val {
            return None;
        }
    }

    let endianness = Reflect::get(payload, &JsValue::from_str(KEY_ENDIANNESS))
        .ok()?
        .as_f64()?;
    if endianness as i32 != ENDIANNESS_PROBE {
        return None;
    }

    Some(SharedState::from_parts(op_buf, io_buf, IO_BLOCK_SIZE))
}

/// Milliseconds the main thread allows the worker to complete its startup
/// handshake before giving up (spec.md §4.4.5).
const HANDSHAKE_TIMEOUT_MS: i32 = 4_000;

fn read_write_options(at: f64) -> FileSystemReadWriteOptions {
    let options = FileSystemReadWriteOptions::new();
    options.set_at(at);
    options
}

/// One virtual file the worker has opened a synchronous access handle for.
struct OpenFile {
    handle: FileSystemSyncAccessHandle,
    path: String,
}

/// Worker-side state: the OPFS root directory and every currently open
/// file, keyed by the id handed back to the caller on `xOpen`.
pub struct Worker {
    root: web_sys::FileSystemDirectoryHandle,
    files: RefCell<HashMap<u32, OpenFile>>,
    next_id: Cell<u32>,
}

impl Worker {
    async fn new() -> Result<Self, JsValue> {
        let root: web_sys::FileSystemDirectoryHandle = JsFuture::from(
            js_sys::global()
                .dyn_into::<web_sys::WorkerGlobalScope>()?
                .navigator()
                .storage()
                .get_directory(),
        )
        .await?
        .into();

        Ok(Worker {
            root,
            files: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        })
    }

    async fn open(&self, path: &str) -> Result<u32, JsValue> {
        let existing = self
            .files
            .borrow()
            .iter()
            .find(|(_, f)| f.path == path)
            .map(|(&id, _)| id);
        if let Some(id) = existing {
            return Ok(id);
        }

        let options = FileSystemGetFileOptions::new();
        options.set_create(true);
        let handle: web_sys::FileSystemFileHandle =
            JsFuture::from(self.root.get_file_handle_with_options(path, &options))
                .await?
                .into();
        let sah: FileSystemSyncAccessHandle = JsFuture::from(handle.create_sync_access_handle())
            .await?
            .into();

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.files.borrow_mut().insert(
            id,
            OpenFile {
                handle: sah,
                path: path.to_string(),
            },
        );
        Ok(id)
    }

    async fn delete(&self, path: &str) -> Result<(), JsValue> {
        let existing = self
            .files
            .borrow()
            .iter()
            .find(|(_, f)| f.path == path)
            .map(|(&id, _)| id);
        if let Some(id) = existing {
            self.close(id);
        }
        JsFuture::from(self.root.remove_entry(path)).await?;
        Ok(())
    }

    fn close(&self, id: u32) {
        if let Some(file) = self.files.borrow_mut().remove(&id) {
            let _ = FileSystemSyncAccessHandle::flush(&file.handle);
            file.handle.close();
        }
    }

    fn read(&self, id: u32, amount: usize, offset: f64, dst: &Uint8Array) -> i32 {
        let files = self.files.borrow();
        let Some(file) = files.get(&id) else {
            return SQLITE_IOERR;
        };
        let mut buf = vec![0u8; amount];
        let n = match file
            .handle
            .read_with_u8_array_and_options(&mut buf, &read_write_options(offset))
        {
            Ok(n) => n as usize,
            Err(_) => return SQLITE_IOERR,
        };
        if n < amount {
            buf[n..].fill(0);
        }
        dst.set(&Uint8Array::from(buf.as_slice()), 0);
        if n < amount {
            SQLITE_IOERR_SHORT_READ
        } else {
            SQLITE_OK
        }
    }

    fn write(&self, id: u32, bytes: &[u8], offset: f64) -> i32 {
        let files = self.files.borrow();
        let Some(file) = files.get(&id) else {
            return SQLITE_IOERR;
        };
        match file
            .handle
            .write_with_u8_array_and_options(bytes, &read_write_options(offset))
        {
            Ok(n) if n as usize == bytes.len() => SQLITE_OK,
            _ => SQLITE_IOERR_WRITE,
        }
    }

    fn truncate(&self, id: u32, size: f64) -> i32 {
        let files = self.files.borrow();
        let Some(file) = files.get(&id) else {
            return SQLITE_IOERR;
        };
        match file.handle.truncate_with_f64(size) {
            Ok(()) => SQLITE_OK,
            Err(_) => SQLITE_IOERR_TRUNCATE,
        }
    }

    fn sync(&self, id: u32) -> i32 {
        let files = self.files.borrow();
        let Some(file) = files.get(&id) else {
            return SQLITE_IOERR;
        };
        match FileSystemSyncAccessHandle::flush(&file.handle) {
            Ok(()) => SQLITE_OK,
            Err(_) => SQLITE_IOERR_FSYNC,
        }
    }

    fn file_size(&self, id: u32) -> Option<f64> {
        self.files.borrow().get(&id).and_then(|f| f.handle.get_size().ok())
    }
}

/// Dispatches one decoded op against `worker`, returning the sqlite result
/// code and leaving any result payload in `result_out`.
async fn dispatch(worker: &Worker, op: &str, args: &[Value], result_out: &mut Vec<Value>) -> i32 {
    result_out.clear();
    match (op, args) {
        ("xOpen", [Value::Str(path)]) => match worker.open(path).await {
            Ok(id) => {
                result_out.push(Value::BigInt(id as i64));
                SQLITE_OK
            }
            Err(_) => SQLITE_CANTOPEN,
        },
        ("xDelete", [Value::Str(path)]) => match worker.delete(path).await {
            Ok(()) => SQLITE_OK,
            Err(_) => SQLITE_IOERR_DELETE,
        },
        ("xClose", [Value::BigInt(id)]) => {
            worker.close(*id as u32);
            SQLITE_OK
        }
        ("xTruncate", [Value::BigInt(id), Value::BigInt(size)]) => {
            worker.truncate(*id as u32, *size as f64)
        }
        ("xSync", [Value::BigInt(id)]) => worker.sync(*id as u32),
        ("xFileSize", [Value::BigInt(id)]) => match worker.file_size(*id as u32) {
            Some(size) => {
                result_out.push(Value::BigInt(size as i64));
                SQLITE_OK
            }
            None => SQLITE_IOERR,
        },
        ("xLock", [Value::BigInt(_), Value::Number(_)]) => SQLITE_OK,
        ("xUnlock", [Value::BigInt(_), Value::Number(_)]) => SQLITE_OK,
        ("xCheckReservedLock", [Value::BigInt(_)]) => {
            result_out.push(Value::Bool(false));
            SQLITE_OK
        }
        _ => SQLITE_IOERR,
    }
}

/// Runs the worker's dispatch loop against `state` until the tab unloads.
/// Blocks on `Atomics.wait`, waking at least every [`IDLE_WAIT_MS`] so a
/// caller listening for `worker.terminate()` responsiveness is honored.
pub async fn run(worker: Worker, state: SharedState) -> ! {
    const OP_WHICH: u32 = 0;
    const OP_RC: u32 = 1;

    let mut io_buf = vec![0u8; IO_BLOCK_SIZE];
    loop {
        let outcome = match Atomics::wait_with_timeout(&state.op_buf, OP_WHICH, -1, IDLE_WAIT_MS) {
            Ok(v) => JsValue::from(v).as_string().unwrap_or_default(),
            Err(_) => "timed-out".into(),
        };
        if outcome == "timed-out" {
            continue;
        }

        let which = Atomics::load(&state.op_buf, OP_WHICH).unwrap_or(-1);
        if which < 0 || which as usize >= OP_NAMES.len() {
            continue;
        }
        let op = OP_NAMES[which as usize];

        let s11n_block = state.s11n_block();
        let mut raw = s11n_block.to_vec();
        let args = s11n::decode(&mut raw, false).unwrap_or_default();

        if op == "xRead" {
            if let [Value::BigInt(id), Value::Number(amt), Value::BigInt(ofst)] = args.as_slice() {
                let dst = state.io_buf.subarray(0, *amt as u32);
                let rc = worker.read(*id as u32, *amt as usize, *ofst as f64, &dst);
                Atomics::store(&state.op_buf, OP_RC, rc).expect("store RC");
                Atomics::store(&state.op_buf, OP_WHICH, -1).expect("reset WHICH_OP");
                Atomics::notify(&state.op_buf, OP_RC).expect("notify RC");
                continue;
            }
        }
        if op == "xWrite" {
            if let [Value::BigInt(id), Value::Number(amt), Value::BigInt(ofst)] = args.as_slice() {
                io_buf.resize(*amt as usize, 0);
                state.io_buf.subarray(0, *amt as u32).copy_to(&mut io_buf);
                let rc = worker.write(*id as u32, &io_buf, *ofst as f64);
                Atomics::store(&state.op_buf, OP_RC, rc).expect("store RC");
                Atomics::store(&state.op_buf, OP_WHICH, -1).expect("reset WHICH_OP");
                Atomics::notify(&state.op_buf, OP_RC).expect("notify RC");
                continue;
            }
        }

        let mut result = Vec::new();
        let rc = dispatch(&worker, op, &args, &mut result).await;

        let mut block = Vec::new();
        let _ = s11n::encode(&result, &mut block);
        let dst = state.s11n_block();
        dst.fill(0, 0, dst.length());
        dst.set(&Uint8Array::from(block.as_slice()), 0);

        Atomics::store(&state.op_buf, OP_RC, rc).expect("store RC");
        Atomics::store(&state.op_buf, OP_WHICH, -1).expect("reset WHICH_OP");
        Atomics::notify(&state.op_buf, OP_RC).expect("notify RC");
    }
}

/// Entry point run inside the dedicated worker. Reports `opfs-async-loaded`
/// as soon as OPFS is reachable, then blocks for the main thread's state
/// payload; only once that payload checks out against this build does it
/// report `opfs-async-inited` and enter [`run`] (spec.md §4.4.5).
pub async fn main(global: DedicatedWorkerGlobalScope) {
    let worker = match Worker::new().await {
        Ok(worker) => worker,
        Err(_) => return post(&global, MSG_UNAVAILABLE),
    };

    post(&global, MSG_LOADED);

    let payload = next_worker_message(&global).await;
    let Ok(payload) = payload else {
        return post(&global, MSG_UNAVAILABLE);
    };
    let Some(state) = parse_handshake_payload(&payload) else {
        return post(&global, MSG_UNAVAILABLE);
    };

    post(&global, MSG_INITED);
    run(worker, state).await;
}

fn post(global: &DedicatedWorkerGlobalScope, kind: &str) {
    let _ = global.post_message(&JsValue::from_str(kind));
}

fn next_worker_message(global: &DedicatedWorkerGlobalScope) -> JsFuture {
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let closure = Closure::once(move |event: MessageEvent| {
            let _ = resolve.call1(&JsValue::NULL, &event.data());
        });
        global.set_onmessage(Some(closure.as_ref().unchecked_ref()));
        closure.forget();
    });
    JsFuture::from(promise)
}

/// Main-thread half of the handshake (spec.md §4.4.5): spawn the worker,
/// wait for `opfs-async-loaded`, post the shared buffers plus the op-id
/// map/`SQLITE_*` code map/endianness probe the worker cross-checks, then
/// wait again for a genuine `opfs-async-inited` before handing back the
/// state. Gives up after [`HANDSHAKE_TIMEOUT_MS`] at either wait.
pub async fn install(worker_script_url: &str, max_pathname: usize) -> Result<SharedState, ProxyError> {
    let options = WorkerOptions::new();
    options.set_type(WorkerType::Module);
    let worker = web_sys::Worker::new_with_options(worker_script_url, &options)
        .map_err(|_| ProxyError::Unavailable)?;

    let loaded = race(next_message(&worker), sleep_ms(HANDSHAKE_TIMEOUT_MS)).await;
    match loaded.as_ref().and_then(JsValue::as_string).as_deref() {
        Some(MSG_LOADED) => {}
        Some(MSG_UNAVAILABLE) => return Err(ProxyError::Unavailable),
        Some(_) => return Err(ProxyError::Unavailable),
        None => return Err(ProxyError::HandshakeTimeout),
    }

    let state = SharedState::new(max_pathname);
    let _ = worker.post_message(&handshake_payload(&state));

    let inited = race(next_message(&worker), sleep_ms(HANDSHAKE_TIMEOUT_MS)).await;
    match inited.as_ref().and_then(JsValue::as_string).as_deref() {
        Some(MSG_INITED) => Ok(state),
        Some(MSG_UNAVAILABLE) => Err(ProxyError::Unavailable),
        Some(_) => Err(ProxyError::Unavailable),
        None => Err(ProxyError::HandshakeTimeout),
    }
}

fn next_message(worker: &web_sys::Worker) -> JsFuture {
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let closure = Closure::once(move |event: MessageEvent| {
            let _ = resolve.call1(&JsValue::NULL, &event.data());
        });
        worker.set_onmessage(Some(closure.as_ref().unchecked_ref()));
        closure.forget();
    });
    JsFuture::from(promise)
}

fn sleep_ms(ms: i32) -> JsFuture {
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let window = web_sys::window().expect("window unavailable");
        let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms);
    });
    JsFuture::from(promise)
}

/// Resolves to `Some(value)` if `a` finishes first, `None` if `timeout`
/// fires first. Only needs first-to-settle semantics, not real cancellation.
async fn race(a: JsFuture, timeout: JsFuture) -> Option<JsValue> {
    let a = wasm_bindgen_futures::future_to_promise(async move { a.await });
    let timeout = wasm_bindgen_futures::future_to_promise(async move {
        timeout.await?;
        Ok(JsValue::NULL)
    });
    let winner = JsFuture::from(js_sys::Promise::race(&js_sys::Array::of2(&a, &timeout))).await;
    match winner {
        Ok(v) if v.is_null() => None,
        Ok(v) => Some(v),
        Err(_) => None,
    }
}
