//! SLAD adapter class container.
//!
//! A generated adapter is shipped as bytes in a small tagged-section format:
//! a fixed header followed by `HEAD`, `REFS`, `MTHD` and an optional JSON
//! `META` section. Unknown sections are skipped so older readers keep working.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::codegen::{MethodSignature, Type};

use super::host::TypeKind;

const MAGIC: [u8; 4] = *b"SLAD";
pub const CURRENT_VERSION: u16 = 1;

/// How a generated adapter method is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dispatch {
    /// Forward to the script-supplied implementation.
    Script,
    /// Forward to the superclass body or interface default.
    Super,
    /// No implementation; invoking it fails.
    Unsupported,
}

impl Dispatch {
    const fn tag(self) -> u8 {
        match self {
            Dispatch::Script => 0,
            Dispatch::Super => 1,
            Dispatch::Unsupported => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Dispatch> {
        Ok(match tag {
            0 => Dispatch::Script,
            1 => Dispatch::Super,
            2 => Dispatch::Unsupported,
            other => bail!("unknown dispatch tag {other}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    pub name: Arc<str>,
    pub signature: MethodSignature,
    pub dispatch: Dispatch,
}

/// Free-form annotations carried for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterMeta {
    pub target_domain: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl AdapterMeta {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.target_domain.is_none() && self.tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterClassFile {
    pub version: u16,
    pub class_name: Arc<str>,
    pub target_name: Arc<str>,
    pub target_kind: TypeKind,
    pub class_level: bool,
    /// Symbols the generated code links against when it is defined.
    pub refs: Vec<Arc<str>>,
    pub methods: Vec<MethodEntry>,
    pub meta: Option<AdapterMeta>,
}

impl AdapterClassFile {
    pub fn method(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.iter().find(|m| &*m.name == name)
    }
}

pub fn encode_class(class: &AdapterClassFile) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    write_u16(&mut out, class.version);
    write_u16(&mut out, 0); // reserved

    let mut head = Vec::new();
    write_str(&mut head, &class.class_name);
    write_str(&mut head, &class.target_name);
    write_u8(
        &mut head,
        match class.target_kind {
            TypeKind::Interface => 0,
            TypeKind::Class => 1,
        },
    );
    write_u8(&mut head, u8::from(class.class_level));
    write_section(&mut out, *b"HEAD", &head);

    let mut refs = Vec::new();
    write_u32(&mut refs, len_u32(class.refs.len())?);
    for symbol in &class.refs {
        write_str(&mut refs, symbol);
    }
    write_section(&mut out, *b"REFS", &refs);

    let mut methods = Vec::new();
    write_u32(&mut methods, len_u32(class.methods.len())?);
    for method in &class.methods {
        write_str(&mut methods, &method.name);
        write_u8(&mut methods, method.signature.ret.tag());
        let params = u16::try_from(method.signature.params.len()).context("too many parameters")?;
        write_u16(&mut methods, params);
        for ty in &method.signature.params {
            write_u8(&mut methods, ty.tag());
        }
        write_u8(&mut methods, method.dispatch.tag());
    }
    write_section(&mut out, *b"MTHD", &methods);

    if let Some(meta) = class.meta.as_ref().filter(|m| !m.is_empty()) {
        let payload = serde_json::to_vec(meta)?;
        write_section(&mut out, *b"META", &payload);
    }

    Ok(out)
}

pub fn decode_class(bytes: &[u8]) -> Result<AdapterClassFile> {
    ensure!(bytes.len() >= 8, "class too small");
    ensure!(bytes[..4] == MAGIC, "invalid SLAD magic");

    let mut cursor = 4;
    let version = read_u16(bytes, &mut cursor)?;
    let _reserved = read_u16(bytes, &mut cursor)?;
    ensure!(
        version <= CURRENT_VERSION,
        "unsupported SLAD version {} (reader supports <= {})",
        version,
        CURRENT_VERSION
    );

    let mut head: Option<(String, String, TypeKind, bool)> = None;
    let mut refs: Option<Vec<Arc<str>>> = None;
    let mut methods: Option<Vec<MethodEntry>> = None;
    let mut meta: Option<AdapterMeta> = None;

    while cursor < bytes.len() {
        let tag = read_tag(bytes, &mut cursor)?;
        let len = read_u32(bytes, &mut cursor)? as usize;
        ensure!(cursor + len <= bytes.len(), "section overruns payload");
        let payload = &bytes[cursor..cursor + len];
        cursor += len;

        match &tag {
            b"HEAD" => {
                ensure!(head.is_none(), "duplicate HEAD section");
                head = Some(decode_head(payload)?);
            }
            b"REFS" => {
                ensure!(refs.is_none(), "duplicate REFS section");
                refs = Some(decode_refs(payload)?);
            }
            b"MTHD" => {
                ensure!(methods.is_none(), "duplicate MTHD section");
                methods = Some(decode_methods(payload)?);
            }
            b"META" => {
                ensure!(meta.is_none(), "duplicate META section");
                meta = Some(serde_json::from_slice(payload).context("decode META section")?);
            }
            _ => {}
        }
    }

    let (class_name, target_name, target_kind, class_level) =
        head.ok_or_else(|| anyhow::anyhow!("missing HEAD section"))?;
    Ok(AdapterClassFile {
        version,
        class_name: Arc::from(class_name),
        target_name: Arc::from(target_name),
        target_kind,
        class_level,
        refs: refs.unwrap_or_default(),
        methods: methods.ok_or_else(|| anyhow::anyhow!("missing MTHD section"))?,
        meta,
    })
}

fn decode_head(payload: &[u8]) -> Result<(String, String, TypeKind, bool)> {
    let mut cursor = 0;
    let class_name = read_string(payload, &mut cursor)?;
    let target_name = read_string(payload, &mut cursor)?;
    let kind = match read_u8(payload, &mut cursor)? {
        0 => TypeKind::Interface,
        1 => TypeKind::Class,
        other => bail!("unknown target kind {other}"),
    };
    let class_level = read_u8(payload, &mut cursor)? != 0;
    ensure!(cursor == payload.len(), "trailing bytes in HEAD section");
    Ok((class_name, target_name, kind, class_level))
}

fn decode_refs(payload: &[u8]) -> Result<Vec<Arc<str>>> {
    let mut cursor = 0;
    let count = read_u32(payload, &mut cursor)? as usize;
    let mut refs = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        refs.push(Arc::from(read_string(payload, &mut cursor)?));
    }
    ensure!(cursor == payload.len(), "trailing bytes in REFS section");
    Ok(refs)
}

fn decode_methods(payload: &[u8]) -> Result<Vec<MethodEntry>> {
    let mut cursor = 0;
    let count = read_u32(payload, &mut cursor)? as usize;
    let mut methods = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let name = read_string(payload, &mut cursor)?;
        let ret = read_type(payload, &mut cursor)?;
        let arity = read_u16(payload, &mut cursor)?;
        let mut params = Vec::with_capacity(usize::from(arity));
        for _ in 0..arity {
            params.push(read_type(payload, &mut cursor)?);
        }
        let dispatch = Dispatch::from_tag(read_u8(payload, &mut cursor)?)?;
        methods.push(MethodEntry {
            name: Arc::from(name),
            signature: MethodSignature::new(ret, params),
            dispatch,
        });
    }
    ensure!(cursor == payload.len(), "trailing bytes in MTHD section");
    Ok(methods)
}

fn read_type(bytes: &[u8], cursor: &mut usize) -> Result<Type> {
    let tag = read_u8(bytes, cursor)?;
    Type::from_tag(tag).ok_or_else(|| anyhow::anyhow!("unknown type tag {tag}"))
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).context("section too large")
}

fn write_section(out: &mut Vec<u8>, tag: [u8; 4], payload: &[u8]) {
    out.extend_from_slice(&tag);
    write_u32(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor >= bytes.len() {
        bail!("unexpected end of input while reading u8");
    }
    let value = bytes[*cursor];
    *cursor += 1;
    Ok(value)
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    if *cursor + 2 > bytes.len() {
        bail!("unexpected end of input while reading u16");
    }
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 2]);
    *cursor += 2;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    if *cursor + 4 > bytes.len() {
        bail!("unexpected end of input while reading u32");
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(u32::from_le_bytes(buf))
}

fn read_string(bytes: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u32(bytes, cursor)? as usize;
    if *cursor + len > bytes.len() {
        bail!("unexpected end of input while reading string");
    }
    let slice = &bytes[*cursor..*cursor + len];
    *cursor += len;
    String::from_utf8(slice.to_vec()).context("invalid UTF-8 in string")
}

fn read_tag(bytes: &[u8], cursor: &mut usize) -> Result<[u8; 4]> {
    if *cursor + 4 > bytes.len() {
        bail!("unexpected end of input while reading section tag");
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(tag)
}
