//! Loading built artifacts and running their registration entrypoint.
//!
//! An artifact is a `wasm32-wasip1` module instantiated once for the life
//! of the process. The host exposes two imports under `modhost`:
//!
//! - `register_handler(handle, kind, name_ptr, name_len) -> i32`
//! - `log(level, ptr, len)`
//!
//! and calls the exported `modhost_register(handle)` exactly once. Handler
//! names collected during that call are attached to the worker afterwards.
//! Dispatch goes through `modhost_alloc`, `modhost_dealloc` and
//! `modhost_invoke`, the latter returning a packed `ptr << 32 | len`
//! pointing at a JSON envelope `{"ok": ...}` or `{"error": "..."}`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use modhost_engine::{Handler, HandlerError, HandlerKind, WorkerHandle};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use wasmtime::{Caller, Engine, Extern, Instance, Linker, Memory, Module, Store, TypedFunc};
use wasmtime_wasi::p1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::LoadError;

/// Import module name of the host ABI.
pub const HOST_MODULE: &str = "modhost";
/// The registration entrypoint every artifact must export.
pub const REGISTER_SYMBOL: &str = "modhost_register";
const REGISTER_SHAPE: &str = "fn(i32)";

/// `register_handler` return codes.
pub const REGISTER_OK: i32 = 0;
pub const REGISTER_BAD_HANDLE: i32 = -1;
pub const REGISTER_BAD_NAME: i32 = -2;
pub const REGISTER_BAD_KIND: i32 = -3;

/// Per-instance host state.
struct UnitState {
    wasi: WasiP1Ctx,
    module: String,
    handle: i32,
    pending: Vec<(String, HandlerKind)>,
    rejected: usize,
}

/// Exports needed to dispatch work into the unit.
struct DispatchExports {
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    dealloc: TypedFunc<(i32, i32), ()>,
    invoke: TypedFunc<(i32, i32, i32, i32), i64>,
}

/// A loaded, instantiated unit. Lives until process exit.
struct LoadedUnit {
    module: String,
    store: Mutex<Store<UnitState>>,
    exports: DispatchExports,
}

/// What a successful load registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub handlers: Vec<(String, HandlerKind)>,
}

/// Loads artifacts with a shared wasmtime engine.
#[derive(Clone, Default)]
pub struct WasmLoader {
    engine: Engine,
}

impl WasmLoader {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Load `artifact`, call its registration entrypoint with `worker`,
    /// and attach the handlers it named.
    ///
    /// Blocking: call from a blocking-capable thread.
    pub fn load_and_register(
        &self,
        artifact: &Path,
        module: &str,
        module_dir: &Path,
        worker: &WorkerHandle,
    ) -> Result<LoadReport, LoadError> {
        let compiled = Module::from_file(&self.engine, artifact).map_err(|e| LoadError::Open {
            path: artifact.to_path_buf(),
            message: format!("{e}"),
        })?;

        let instantiate_err = |message: String| LoadError::Instantiate {
            path: artifact.to_path_buf(),
            message,
        };

        let mut linker: Linker<UnitState> = Linker::new(&self.engine);
        wasmtime_wasi::p1::add_to_linker_sync(&mut linker, |state: &mut UnitState| {
            &mut state.wasi
        })
        .map_err(|e| instantiate_err(format!("failed to link WASI: {e}")))?;
        linker
            .func_wrap(HOST_MODULE, "register_handler", host_register_handler)
            .map_err(|e| instantiate_err(format!("failed to link register_handler: {e}")))?;
        linker
            .func_wrap(HOST_MODULE, "log", host_log)
            .map_err(|e| instantiate_err(format!("failed to link log: {e}")))?;

        let mut wasi = WasiCtxBuilder::new();
        wasi.inherit_stdio().inherit_env();
        if let Err(e) = wasi.preopened_dir(module_dir, ".", DirPerms::all(), FilePerms::all()) {
            warn!(path = %module_dir.display(), error = %e, "Could not preopen module directory");
        }

        let handle = worker.id() as i32;
        let mut store = Store::new(
            &self.engine,
            UnitState {
                wasi: wasi.build_p1(),
                module: module.to_string(),
                handle,
                pending: Vec::new(),
                rejected: 0,
            },
        );

        let instance = linker
            .instantiate(&mut store, &compiled)
            .map_err(|e| instantiate_err(format!("{e}")))?;

        let entrypoint = resolve_entrypoint(&instance, &mut store)?;

        if let Some(init) = instance.get_func(&mut store, "_initialize") {
            let init = init
                .typed::<(), ()>(&store)
                .map_err(|e| instantiate_err(format!("_initialize has the wrong shape: {e}")))?;
            init.call(&mut store, ())
                .map_err(|e| instantiate_err(format!("_initialize trapped: {e}")))?;
        }

        debug!(module, handle, "Calling registration entrypoint");
        entrypoint
            .call(&mut store, handle)
            .map_err(|e| LoadError::EntrypointTrapped(format!("{e}")))?;

        let pending = std::mem::take(&mut store.data_mut().pending);
        let rejected = store.data().rejected;
        if rejected > 0 {
            warn!(module, rejected, "Module made invalid register_handler calls");
        }

        if pending.is_empty() {
            info!(module, "Module registered no handlers");
            return Ok(LoadReport::default());
        }

        let exports = resolve_dispatch_exports(&instance, &mut store)?;
        let unit = Arc::new(LoadedUnit {
            module: module.to_string(),
            store: Mutex::new(store),
            exports,
        });

        let entries = pending
            .iter()
            .map(|(name, kind)| {
                let handler: Arc<dyn Handler> = Arc::new(WasmHandler {
                    unit: Arc::clone(&unit),
                    name: name.clone(),
                });
                (name.clone(), *kind, handler)
            })
            .collect();
        worker.register_all(Some(module), entries)?;

        info!(module, handlers = pending.len(), "Module registered");
        Ok(LoadReport { handlers: pending })
    }
}

fn resolve_entrypoint(
    instance: &Instance,
    store: &mut Store<UnitState>,
) -> Result<TypedFunc<i32, ()>, LoadError> {
    let wrong_shape = |found: String| LoadError::EntrypointWrongShape {
        symbol: REGISTER_SYMBOL,
        expected: REGISTER_SHAPE,
        found,
    };
    match instance.get_export(&mut *store, REGISTER_SYMBOL) {
        None => Err(LoadError::EntrypointNotFound {
            symbol: REGISTER_SYMBOL,
        }),
        Some(Extern::Func(func)) => func.typed::<i32, ()>(&*store).map_err(|_| {
            let ty = func.ty(&*store);
            let params: Vec<String> = ty.params().map(|p| p.to_string()).collect();
            let results: Vec<String> = ty.results().map(|r| r.to_string()).collect();
            wrong_shape(format!(
                "fn({}) -> ({})",
                params.join(", "),
                results.join(", ")
            ))
        }),
        Some(Extern::Memory(_)) => Err(wrong_shape("memory".to_string())),
        Some(Extern::Global(_)) => Err(wrong_shape("global".to_string())),
        Some(Extern::Table(_)) => Err(wrong_shape("table".to_string())),
        Some(_) => Err(wrong_shape("non-function export".to_string())),
    }
}

fn resolve_dispatch_exports(
    instance: &Instance,
    store: &mut Store<UnitState>,
) -> Result<DispatchExports, LoadError> {
    let memory = instance
        .get_memory(&mut *store, "memory")
        .ok_or(LoadError::MissingExport("memory"))?;
    let alloc = instance
        .get_typed_func::<i32, i32>(&mut *store, "modhost_alloc")
        .map_err(|_| LoadError::MissingExport("modhost_alloc"))?;
    let dealloc = instance
        .get_typed_func::<(i32, i32), ()>(&mut *store, "modhost_dealloc")
        .map_err(|_| LoadError::MissingExport("modhost_dealloc"))?;
    let invoke = instance
        .get_typed_func::<(i32, i32, i32, i32), i64>(&mut *store, "modhost_invoke")
        .map_err(|_| LoadError::MissingExport("modhost_invoke"))?;
    Ok(DispatchExports {
        memory,
        alloc,
        dealloc,
        invoke,
    })
}

fn read_guest_str(caller: &mut Caller<'_, UnitState>, ptr: i32, len: i32) -> Option<String> {
    let memory = caller.get_export("memory")?.into_memory()?;
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    let bytes = memory.data(&*caller).get(start..end)?;
    std::str::from_utf8(bytes).ok().map(str::to_string)
}

fn host_register_handler(
    mut caller: Caller<'_, UnitState>,
    handle: i32,
    kind: i32,
    name_ptr: i32,
    name_len: i32,
) -> i32 {
    let code = if handle != caller.data().handle {
        REGISTER_BAD_HANDLE
    } else if let Some(kind) = HandlerKind::from_code(kind) {
        match read_guest_str(&mut caller, name_ptr, name_len) {
            Some(name) if !name.is_empty() => {
                caller.data_mut().pending.push((name, kind));
                REGISTER_OK
            }
            _ => REGISTER_BAD_NAME,
        }
    } else {
        REGISTER_BAD_KIND
    };
    if code != REGISTER_OK {
        caller.data_mut().rejected += 1;
    }
    code
}

fn host_log(mut caller: Caller<'_, UnitState>, level: i32, ptr: i32, len: i32) {
    let Some(message) = read_guest_str(&mut caller, ptr, len) else {
        return;
    };
    let module = caller.data().module.as_str();
    match level {
        0 => tracing::error!(target: "modhost::module", module, "{message}"),
        1 => tracing::warn!(target: "modhost::module", module, "{message}"),
        2 => tracing::info!(target: "modhost::module", module, "{message}"),
        3 => tracing::debug!(target: "modhost::module", module, "{message}"),
        _ => tracing::trace!(target: "modhost::module", module, "{message}"),
    }
}

#[derive(Deserialize)]
struct Envelope {
    ok: Option<Value>,
    error: Option<String>,
}

impl LoadedUnit {
    fn invoke(&self, name: &str, input: &[u8]) -> Result<Value, HandlerError> {
        let trap = |e: wasmtime::Error| HandlerError::Invocation(format!("{e}"));
        let mut guard = self.store.lock();
        let store = &mut *guard;
        let ex = &self.exports;

        let name_ptr = self.write_guest(store, name.as_bytes())?;
        let input_ptr = self.write_guest(store, input)?;
        let packed = ex
            .invoke
            .call(
                &mut *store,
                (name_ptr, name.len() as i32, input_ptr, input.len() as i32),
            )
            .map_err(trap)?;
        ex.dealloc
            .call(&mut *store, (name_ptr, name.len() as i32))
            .map_err(trap)?;
        ex.dealloc
            .call(&mut *store, (input_ptr, input.len() as i32))
            .map_err(trap)?;

        let (ptr, len) = unpack(packed);
        let mut out = vec![0u8; len];
        ex.memory
            .read(&*store, ptr, &mut out)
            .map_err(|e| HandlerError::Invocation(format!("bad result pointer: {e}")))?;
        ex.dealloc
            .call(&mut *store, (ptr as i32, len as i32))
            .map_err(trap)?;
        drop(guard);

        let envelope: Envelope = serde_json::from_slice(&out).map_err(|e| {
            HandlerError::Invocation(format!("module {} returned bad envelope: {e}", self.module))
        })?;
        match envelope.error {
            Some(message) => Err(HandlerError::Failed(message)),
            None => Ok(envelope.ok.unwrap_or(Value::Null)),
        }
    }

    fn write_guest(&self, store: &mut Store<UnitState>, bytes: &[u8]) -> Result<i32, HandlerError> {
        let ptr = self
            .exports
            .alloc
            .call(&mut *store, bytes.len() as i32)
            .map_err(|e| HandlerError::Invocation(format!("{e}")))?;
        self.exports
            .memory
            .write(&mut *store, ptr as u32 as usize, bytes)
            .map_err(|e| HandlerError::Invocation(format!("bad alloc pointer: {e}")))?;
        Ok(ptr)
    }
}

/// Split `ptr << 32 | len`.
fn unpack(packed: i64) -> (usize, usize) {
    let bits = packed as u64;
    ((bits >> 32) as usize, (bits & 0xffff_ffff) as usize)
}

/// Worker-facing handler that calls into a loaded unit.
struct WasmHandler {
    unit: Arc<LoadedUnit>,
    name: String,
}

#[async_trait]
impl Handler for WasmHandler {
    async fn call(&self, input: Value) -> Result<Value, HandlerError> {
        let input = serde_json::to_vec(&input)
            .map_err(|e| HandlerError::Invocation(format!("cannot encode input: {e}")))?;
        let unit = Arc::clone(&self.unit);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || unit.invoke(&name, &input))
            .await
            .map_err(|e| HandlerError::Invocation(format!("handler task failed: {e}")))?
    }
}
