//! JavaScript import object for the shim
//!
//! Each preview 1 function the guest imports becomes a JS function that
//! forwards its raw arguments to [`WasiShim::call`]. Imports the shim does
//! not implement are bound to a stub returning `ENOSYS`, so instantiation
//! never fails on an unused call.

use super::abi::{self, Errno, Syscall};
use super::memory::JsMemory;
use super::shim::{CallOutcome, WasiShim};
use crate::console_log;
use crate::loader::{ExternKind, ModuleInfo};
use js_sys::{Array, Function, Object, Reflect};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Thrown out of `proc_exit` to unwind the guest
pub const EXIT_SENTINEL: &str = "rustic-boot: proc_exit";

/// State shared between the host and every import closure
pub struct HostState {
    pub shim: WasiShim,
    /// Guest memory, bound once the instance exists
    pub memory: Option<JsMemory>,
}

pub type SharedState = Rc<RefCell<HostState>>;

type Handler = Closure<dyn FnMut(Array) -> JsValue>;

/// An import object plus the closures backing it
///
/// The closures are freed when this is dropped, so it must outlive the
/// guest's execution.
pub struct ImportObject {
    object: Object,
    _handlers: Vec<Handler>,
}

impl ImportObject {
    pub fn as_object(&self) -> &Object {
        &self.object
    }
}

/// Build the import object satisfying every WASI function `info` imports
pub fn build(info: &ModuleInfo, state: &SharedState) -> Result<ImportObject, JsValue> {
    let object = Object::new();
    let mut handlers = Vec::new();

    for import in &info.imports {
        let namespace = import.module.as_str();
        if namespace != abi::IMPORT_MODULE && namespace != abi::IMPORT_MODULE_LEGACY {
            continue;
        }
        if import.kind != ExternKind::Func {
            continue;
        }

        let handler = match Syscall::from_name(&import.name) {
            Some(call) => syscall_handler(call, Rc::clone(state)),
            None => {
                console_log!("[wasi] {} not supported, stubbed with ENOSYS", import.name);
                unsupported_handler()
            }
        };

        let function = variadic(&handler)?;
        Reflect::set(&namespace_object(&object, namespace)?, &import.name.as_str().into(), &function)?;
        handlers.push(handler);
    }

    Ok(ImportObject {
        object,
        _handlers: handlers,
    })
}

/// Get or create `object[name]`
fn namespace_object(object: &Object, name: &str) -> Result<Object, JsValue> {
    let key = JsValue::from_str(name);
    let existing = Reflect::get(object, &key)?;
    if existing.is_object() {
        return existing.dyn_into::<Object>();
    }
    let namespace = Object::new();
    Reflect::set(object, &key, &namespace)?;
    Ok(namespace)
}

/// Wrap a handler in a JS function accepting any number of arguments
///
/// `Closure` supports at most eight parameters and `path_open` takes nine,
/// so every import collects its arguments into one array instead.
fn variadic(handler: &Handler) -> Result<Function, JsValue> {
    let factory = Function::new_with_args(
        "handler",
        "return function (...args) { return handler(args); };",
    );
    factory
        .call1(&JsValue::NULL, handler.as_ref())?
        .dyn_into::<Function>()
}

fn syscall_handler(call: Syscall, state: SharedState) -> Handler {
    Closure::wrap(Box::new(move |args: Array| -> JsValue {
        let Some(raw) = args.iter().map(|v| raw_arg(&v)).collect::<Option<Vec<u64>>>() else {
            return JsValue::from(Errno::Inval.code() as u32);
        };

        let outcome = {
            let mut host = state.borrow_mut();
            let HostState { shim, memory } = &mut *host;
            match memory {
                Some(memory) => shim.call(memory, call, &raw),
                None => CallOutcome::Return(Errno::Fault),
            }
        };

        match outcome {
            CallOutcome::Return(errno) => JsValue::from(errno.code() as u32),
            // The borrow above is released before unwinding
            CallOutcome::Exit(_) => wasm_bindgen::throw_str(EXIT_SENTINEL),
        }
    }) as Box<dyn FnMut(Array) -> JsValue>)
}

fn unsupported_handler() -> Handler {
    Closure::wrap(
        Box::new(|_args: Array| JsValue::from(Errno::NoSys.code() as u32))
            as Box<dyn FnMut(Array) -> JsValue>,
    )
}

/// Convert one JS argument to its raw bit pattern
///
/// `i32` parameters arrive as numbers (possibly negative), `i64` ones as
/// `BigInt`. Anything else yields `None`.
fn raw_arg(value: &JsValue) -> Option<u64> {
    if let Some(number) = value.as_f64() {
        if !number.is_finite() || number.fract() != 0.0 {
            return None;
        }
        return Some(number as i64 as u64);
    }
    let big = value.dyn_ref::<js_sys::BigInt>()?;
    u64::try_from(js_sys::BigInt::as_uint_n(64.0, big)).ok()
}
