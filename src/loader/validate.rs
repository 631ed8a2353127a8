//! Module validation
//!
//! A structural pass over the binary before it is handed to the engine:
//! header, section framing, the exports a WASI command needs, and the list
//! of imports the host has to satisfy. Function bodies are not inspected;
//! the engine's own compile step does that.

use crate::error::{BootError, BootResult};
use crate::wasi::abi::exports;

/// `\0asm`
const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Binary format version 1
const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

const SECTION_IMPORT: u8 = 2;
const SECTION_EXPORT: u8 = 7;
/// Highest known section id (data count)
const SECTION_MAX: u8 = 12;

/// What an import or export refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternKind {
    fn from_byte(byte: u8) -> BootResult<Self> {
        match byte {
            0 => Ok(ExternKind::Func),
            1 => Ok(ExternKind::Table),
            2 => Ok(ExternKind::Memory),
            3 => Ok(ExternKind::Global),
            other => Err(invalid(format!("unknown external kind 0x{:02x}", other))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExternKind::Func => "function",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ExternKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

/// What validation learned about a module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
}

impl ModuleInfo {
    /// Imports from the given namespace
    pub fn imports_from<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a Import> + 'a {
        self.imports.iter().filter(move |i| i.module == module)
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }
}

fn invalid(reason: impl Into<String>) -> BootError {
    BootError::InvalidModule {
        reason: reason.into(),
    }
}

/// Byte cursor over a module or section
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn byte(&mut self) -> BootResult<u8> {
        let byte = *self
            .bytes
            .get(self.offset)
            .ok_or_else(|| invalid("unexpected end of module"))?;
        self.offset += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> BootResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| invalid("length extends past end of section"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Unsigned LEB128, at most 5 bytes
    fn leb_u32(&mut self) -> BootResult<u32> {
        let mut result = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.byte()?;
            result |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(invalid("invalid LEB128"))
    }

    fn name(&mut self) -> BootResult<String> {
        let len = self.leb_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("name is not valid UTF-8"))
    }

    /// `limits`: flag, min, optional max
    fn limits(&mut self) -> BootResult<()> {
        let flags = self.byte()?;
        self.leb_u32()?;
        if flags & 0x01 != 0 {
            self.leb_u32()?;
        }
        Ok(())
    }
}

/// Validate a WASI command module
///
/// Checks:
/// - magic number and version
/// - every section's size lies within the module
/// - `_start` is an exported function
/// - `memory` is an exported memory
pub fn validate(bytes: &[u8]) -> BootResult<ModuleInfo> {
    if bytes.len() < 8 {
        return Err(invalid("module too small"));
    }
    if bytes[0..4] != WASM_MAGIC {
        return Err(invalid("invalid magic number"));
    }
    if bytes[4..8] != WASM_VERSION {
        return Err(invalid("unsupported WASM version"));
    }

    let mut info = ModuleInfo::default();
    let mut reader = Reader::new(&bytes[8..]);

    while !reader.is_empty() {
        let id = reader.byte()?;
        if id > SECTION_MAX {
            return Err(invalid(format!("unknown section id {}", id)));
        }
        let size = reader.leb_u32()? as usize;
        let body = reader
            .take(size)
            .map_err(|_| invalid("section extends past end of module"))?;

        match id {
            SECTION_IMPORT => info.imports = parse_imports(body)?,
            SECTION_EXPORT => info.exports = parse_exports(body)?,
            _ => {}
        }
    }

    require_export(&info, exports::START, ExternKind::Func)?;
    require_export(&info, exports::MEMORY, ExternKind::Memory)?;
    Ok(info)
}

fn require_export(info: &ModuleInfo, name: &'static str, kind: ExternKind) -> BootResult<()> {
    match info.export(name) {
        None => Err(BootError::MissingExport { name }),
        Some(export) if export.kind != kind => Err(BootError::WrongExportType {
            name,
            expected: kind.as_str(),
        }),
        Some(_) => Ok(()),
    }
}

fn parse_imports(body: &[u8]) -> BootResult<Vec<Import>> {
    let mut reader = Reader::new(body);
    let count = reader.leb_u32()?;
    let mut imports = Vec::new();

    for _ in 0..count {
        let module = reader.name()?;
        let name = reader.name()?;
        let kind = ExternKind::from_byte(reader.byte()?)?;
        match kind {
            // type index
            ExternKind::Func => {
                reader.leb_u32()?;
            }
            // reftype + limits
            ExternKind::Table => {
                reader.byte()?;
                reader.limits()?;
            }
            ExternKind::Memory => reader.limits()?,
            // valtype + mutability
            ExternKind::Global => {
                reader.byte()?;
                reader.byte()?;
            }
        }
        imports.push(Import { module, name, kind });
    }

    Ok(imports)
}

fn parse_exports(body: &[u8]) -> BootResult<Vec<Export>> {
    let mut reader = Reader::new(body);
    let count = reader.leb_u32()?;
    let mut exports = Vec::new();

    for _ in 0..count {
        let name = reader.name()?;
        let kind = ExternKind::from_byte(reader.byte()?)?;
        let index = reader.leb_u32()?;
        exports.push(Export { name, kind, index });
    }

    Ok(exports)
}
