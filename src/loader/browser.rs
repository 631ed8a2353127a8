//! Running a module on the browser's WebAssembly engine

use super::{describe_js, ModuleHost, ModuleInfo, RunReport};
use crate::console_log;
use crate::error::{BootError, BootResult};
use crate::wasi::abi::exports;
use crate::wasi::imports::{self, HostState};
use crate::wasi::{JsMemory, WasiShim};
use js_sys::{Function, Reflect, Uint8Array, WebAssembly};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

/// `WebAssembly.compile` + `WebAssembly.instantiate`, then `_start`
pub struct BrowserHost;

fn instantiation(err: JsValue) -> BootError {
    BootError::InstantiationFailed {
        reason: describe_js(&err),
    }
}

fn export<T: JsCast>(exports: &JsValue, name: &str) -> BootResult<T> {
    Reflect::get(exports, &JsValue::from_str(name))
        .map_err(instantiation)?
        .dyn_into::<T>()
        .map_err(|_| BootError::InstantiationFailed {
            reason: format!("export '{}' has an unexpected type", name),
        })
}

impl ModuleHost for BrowserHost {
    async fn run(
        &mut self,
        bytes: Vec<u8>,
        info: ModuleInfo,
        shim: WasiShim,
    ) -> BootResult<RunReport> {
        let buffer = Uint8Array::from(bytes.as_slice());
        let module: WebAssembly::Module = JsFuture::from(WebAssembly::compile(&buffer))
            .await
            .map_err(instantiation)?
            .dyn_into()
            .map_err(instantiation)?;

        let state = Rc::new(RefCell::new(HostState { shim, memory: None }));
        let import_object = imports::build(&info, &state).map_err(instantiation)?;

        let instance: WebAssembly::Instance = JsFuture::from(WebAssembly::instantiate_module(
            &module,
            import_object.as_object(),
        ))
        .await
        .map_err(instantiation)?
        .dyn_into()
        .map_err(instantiation)?;

        let guest_exports: JsValue = instance.exports().into();
        let memory: WebAssembly::Memory = export(&guest_exports, exports::MEMORY)?;
        let start: Function = export(&guest_exports, exports::START)?;
        state.borrow_mut().memory = Some(JsMemory::new(memory));

        console_log!("[loader] calling {}", exports::START);
        let result = start.call0(&JsValue::UNDEFINED);
        let exit_code = state.borrow().shim.exit_code();

        // The import closures must stay alive until the guest is done
        drop(import_object);

        match (result, exit_code) {
            (_, Some(code)) => Ok(RunReport {
                exit_code: Some(code),
            }),
            (Ok(_), None) => Ok(RunReport { exit_code: None }),
            (Err(err), None) => Err(BootError::Trap {
                reason: describe_js(&err),
            }),
        }
    }
}
