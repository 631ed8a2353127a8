//! Browser tests for the DOM sink and the browser host
//!
//! Run with `wasm-pack test --headless --firefox`.

#![cfg(target_arch = "wasm32")]

use rustic_boot::error::BootError;
use rustic_boot::loader::{BootOutcome, BrowserHost, Loader, RunReport, StaticSource};
use rustic_boot::sink::{DomSink, OutputSink, StdoutRedirector, TextSink};
use rustic_boot::wasi::WasiShim;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn output_element(id: &str) -> web_sys::Element {
    let document = web_sys::window().unwrap().document().unwrap();
    let element = document.create_element("pre").unwrap();
    element.set_id(id);
    document.body().unwrap().append_child(&element).unwrap();
    element
}

#[wasm_bindgen_test]
fn attach_fails_without_element() {
    let result = DomSink::attach("no-such-element");
    assert!(matches!(result, Err(BootError::SinkUnavailable { .. })));
}

#[wasm_bindgen_test]
fn stdout_lines_reach_the_element() {
    let element = output_element("wasm-output-lines");
    let sink = DomSink::attach("wasm-output-lines").unwrap();
    let mut redirector = StdoutRedirector::new(sink);

    assert_eq!(redirector.emit(1, b"A"), 1);
    assert_eq!(redirector.emit(1, b"B"), 1);
    assert_eq!(redirector.emit(2, b"hidden"), 6);

    assert_eq!(element.text_content().unwrap(), "A\nB\n");
}

#[wasm_bindgen_test]
fn append_keeps_existing_text() {
    let element = output_element("wasm-output-existing");
    element.set_text_content(Some("$ "));
    let mut sink = DomSink::attach("wasm-output-existing").unwrap();

    sink.append("ls\n");

    assert_eq!(element.text_content().unwrap(), "$ ls\n");
}

// ============================================================================
// Guest modules run on the browser's engine
// ============================================================================

const WASI: &str = "wasi_snapshot_preview1";

/// Type 0: () -> ()
const VOID: u8 = 0;
/// Type 1: (i32, i32, i32, i32) -> i32
const FOUR_I32: u8 = 1;
/// Type 2: (i32) -> ()
const ONE_I32: u8 = 2;

/// Command module with the given function imports and a single `_start`
struct GuestModule<'a> {
    imports: &'a [(&'a str, &'a str, u8)],
    body: &'a [u8],
    data: &'a [u8],
}

fn leb128(bytes: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            bytes.push(byte);
            return;
        }
        bytes.push(byte | 0x80);
    }
}

fn name(bytes: &mut Vec<u8>, text: &str) {
    leb128(bytes, text.len() as u32);
    bytes.extend_from_slice(text.as_bytes());
}

fn section(bytes: &mut Vec<u8>, id: u8, content: &[u8]) {
    bytes.push(id);
    leb128(bytes, content.len() as u32);
    bytes.extend_from_slice(content);
}

impl GuestModule<'_> {
    fn build(&self) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

        section(
            &mut bytes,
            0x01,
            &[
                0x03, // 3 types
                0x60, 0x00, 0x00, // () -> ()
                0x60, 0x04, 0x7F, 0x7F, 0x7F, 0x7F, 0x01, 0x7F, // (i32 x4) -> i32
                0x60, 0x01, 0x7F, 0x00, // (i32) -> ()
            ],
        );

        let mut imports = Vec::new();
        leb128(&mut imports, self.imports.len() as u32);
        for (module, field, ty) in self.imports {
            name(&mut imports, module);
            name(&mut imports, field);
            imports.extend_from_slice(&[0x00, *ty]);
        }
        section(&mut bytes, 0x02, &imports);

        section(&mut bytes, 0x03, &[0x01, VOID]);
        section(&mut bytes, 0x05, &[0x01, 0x00, 0x01]);

        let mut exports = Vec::new();
        leb128(&mut exports, 2);
        name(&mut exports, "memory");
        exports.extend_from_slice(&[0x02, 0x00]);
        name(&mut exports, "_start");
        exports.push(0x00);
        leb128(&mut exports, self.imports.len() as u32);
        section(&mut bytes, 0x07, &exports);

        let mut function = vec![0x00]; // no locals
        function.extend_from_slice(self.body);
        function.push(0x0B);
        let mut code = vec![0x01];
        leb128(&mut code, function.len() as u32);
        code.extend_from_slice(&function);
        section(&mut bytes, 0x0A, &code);

        if !self.data.is_empty() {
            let mut data = vec![0x01, 0x00, 0x41, 0x00, 0x0B]; // active, offset 0
            leb128(&mut data, self.data.len() as u32);
            data.extend_from_slice(self.data);
            section(&mut bytes, 0x0B, &data);
        }

        bytes
    }
}

async fn run_guest(module: GuestModule<'_>) -> (BootOutcome, String) {
    let text = Rc::new(RefCell::new(String::new()));
    let shim = WasiShim::new(StdoutRedirector::new(Rc::clone(&text)));
    let mut loader = Loader::new(
        StaticSource::new(module.build()),
        BrowserHost,
        "guest.wasm",
    );
    let outcome = loader.boot(shim).await;
    let output = text.borrow().clone();
    (outcome, output)
}

fn exited(code: u32) -> BootOutcome {
    BootOutcome::Loaded(RunReport {
        exit_code: Some(code),
    })
}

#[wasm_bindgen_test]
async fn start_returning_is_a_clean_run() {
    let (outcome, output) = run_guest(GuestModule {
        imports: &[(WASI, "proc_exit", ONE_I32)],
        body: &[],
        data: &[],
    })
    .await;

    assert_eq!(outcome, BootOutcome::Loaded(RunReport { exit_code: None }));
    assert_eq!(output, "");
}

#[wasm_bindgen_test]
async fn proc_exit_becomes_the_exit_code() {
    let (outcome, _) = run_guest(GuestModule {
        imports: &[(WASI, "proc_exit", ONE_I32)],
        // proc_exit(7)
        body: &[0x41, 0x07, 0x10, 0x00],
        data: &[],
    })
    .await;

    assert_eq!(outcome, exited(7));
}

#[wasm_bindgen_test]
async fn legacy_namespace_is_linked() {
    let (outcome, _) = run_guest(GuestModule {
        imports: &[("wasi_unstable", "proc_exit", ONE_I32)],
        body: &[0x41, 0x03, 0x10, 0x00],
        data: &[],
    })
    .await;

    assert_eq!(outcome, exited(3));
}

#[wasm_bindgen_test]
async fn guest_fd_write_lands_in_the_sink() {
    let (outcome, output) = run_guest(GuestModule {
        imports: &[(WASI, "fd_write", FOUR_I32)],
        // drop(fd_write(1, iovs = 0, count = 1, nwritten = 16))
        body: &[
            0x41, 0x01, 0x41, 0x00, 0x41, 0x01, 0x41, 0x10, 0x10, 0x00, 0x1A,
        ],
        // iovec { ptr: 8, len: 2 } followed by the bytes it points at
        data: &[8, 0, 0, 0, 2, 0, 0, 0, b'h', b'i'],
    })
    .await;

    assert_eq!(outcome, BootOutcome::Loaded(RunReport { exit_code: None }));
    assert_eq!(output, "hi\n");
}

#[wasm_bindgen_test]
async fn unsupported_import_answers_nosys() {
    let (outcome, _) = run_guest(GuestModule {
        imports: &[
            (WASI, "poll_oneoff", FOUR_I32),
            (WASI, "proc_exit", ONE_I32),
        ],
        // proc_exit(poll_oneoff(0, 0, 0, 0))
        body: &[
            0x41, 0x00, 0x41, 0x00, 0x41, 0x00, 0x41, 0x00, 0x10, 0x00, 0x10, 0x01,
        ],
        data: &[],
    })
    .await;

    assert_eq!(outcome, exited(52));
}

#[wasm_bindgen_test]
async fn foreign_namespace_fails_instantiation() {
    let (outcome, _) = run_guest(GuestModule {
        imports: &[("env", "host_hook", ONE_I32)],
        body: &[],
        data: &[],
    })
    .await;

    assert!(matches!(
        outcome,
        BootOutcome::Failed(BootError::InstantiationFailed { .. })
    ));
}

#[wasm_bindgen_test]
async fn unreachable_is_a_trap() {
    let (outcome, _) = run_guest(GuestModule {
        imports: &[(WASI, "proc_exit", ONE_I32)],
        body: &[0x00],
        data: &[],
    })
    .await;

    assert!(matches!(outcome, BootOutcome::Failed(BootError::Trap { .. })));
}
