//! Class file reader and writer.
//!
//! Only the parts instrumentation has to touch are modelled: the constant
//! pool, members, and the `Code` attribute with the tables that carry code
//! offsets. Every other attribute is kept as an opaque [`AttributeInfo::Raw`]
//! blob, so parsing a class and writing it back yields the same bytes.

use std::borrow::Cow;

use thiserror::Error;

pub const MAGIC: u32 = 0xCAFEBABE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    #[error("unexpected end of class data")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("constant pool entry {0} is not valid modified UTF-8")]
    InvalidUtf8(u16),
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("constant pool is full")]
    ConstantPoolOverflow,
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

/// A field or a method; both share the same layout.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|a| match a {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    /// Modified UTF-8 bytes, kept verbatim.
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl CpInfo {
    fn tag(&self) -> u8 {
        match self {
            CpInfo::Utf8(_) => 1,
            CpInfo::Integer(_) => 3,
            CpInfo::Float(_) => 4,
            CpInfo::Long(_) => 5,
            CpInfo::Double(_) => 6,
            CpInfo::Class { .. } => 7,
            CpInfo::String { .. } => 8,
            CpInfo::Fieldref { .. } => 9,
            CpInfo::Methodref { .. } => 10,
            CpInfo::InterfaceMethodref { .. } => 11,
            CpInfo::NameAndType { .. } => 12,
            CpInfo::MethodHandle { .. } => 15,
            CpInfo::MethodType { .. } => 16,
            CpInfo::Dynamic { .. } => 17,
            CpInfo::InvokeDynamic { .. } => 18,
            CpInfo::Module { .. } => 19,
            CpInfo::Package { .. } => 20,
        }
    }
}

/// Constant pool with 1-based indexing. `Long` and `Double` occupy two
/// slots; the second one is `None`.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self { entries: vec![None] }
    }

    /// The `constant_pool_count` value written to the class file.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    /// Text of a `Utf8` entry. Borrowed unless the entry holds an encoded NUL
    /// or a surrogate pair.
    pub fn get_utf8(&self, index: u16) -> Result<Cow<'_, str>, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(Cow::Borrowed(text)),
                Err(_) => from_modified_utf8(bytes).map(Cow::Owned).ok_or(ClassFileError::InvalidUtf8(index)),
            },
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Internal name behind a `Class` entry.
    pub fn class_name(&self, index: u16) -> Result<Cow<'_, str>, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    fn find(&self, entry: &CpInfo) -> Option<u16> {
        self.entries
            .iter()
            .position(|e| e.as_ref() == Some(entry))
            .map(|i| i as u16)
    }

    fn intern(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        if let Some(index) = self.find(&entry) {
            return Ok(index);
        }
        if self.entries.len() >= u16::MAX as usize {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        self.entries.push(Some(entry));
        Ok((self.entries.len() - 1) as u16)
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16, ClassFileError> {
        self.intern(CpInfo::Utf8(to_modified_utf8(value)))
    }

    pub fn class(&mut self, name: &str) -> Result<u16, ClassFileError> {
        let name_index = self.utf8(name)?;
        self.intern(CpInfo::Class { name_index })
    }

    pub fn string(&mut self, value: &str) -> Result<u16, ClassFileError> {
        let string_index = self.utf8(value)?;
        self.intern(CpInfo::String { string_index })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.intern(CpInfo::NameAndType { name_index, descriptor_index })
    }

    pub fn methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.intern(CpInfo::Methodref { class_index, name_and_type_index })
    }
}

/// Standard UTF-8 to the JVM's modified form: NUL becomes `C0 80` and
/// supplementary characters become surrogate pairs.
fn to_modified_utf8(value: &str) -> Vec<u8> {
    if value.bytes().all(|b| b != 0 && b < 0x80) {
        return value.as_bytes().to_vec();
    }
    let mut out = Vec::with_capacity(value.len() + 8);
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// The JVM's modified UTF-8 back to a string: `C0 80` is NUL and
/// supplementary characters arrive as two three-byte surrogates.
fn from_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        let (unit, width) = match lead {
            0x01..=0x7F => (lead as u16, 1),
            0xC0..=0xDF => (((lead as u16 & 0x1F) << 6) | continuation(bytes, i + 1)?, 2),
            0xE0..=0xEF => {
                let high = continuation(bytes, i + 1)?;
                let low = continuation(bytes, i + 2)?;
                (((lead as u16 & 0x0F) << 12) | (high << 6) | low, 3)
            }
            _ => return None,
        };
        units.push(unit);
        i += width;
    }
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

fn continuation(bytes: &[u8], at: usize) -> Option<u16> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Some((b & 0x3F) as u16),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub enum AttributeInfo {
    Code(CodeAttribute),
    StackMapTable(StackMapTableAttribute),
    Exceptions { name_index: u16, exception_index_table: Vec<u16> },
    LineNumberTable { name_index: u16, entries: Vec<LineNumberEntry> },
    LocalVariableTable { name_index: u16, entries: Vec<LocalVariableTableEntry> },
    LocalVariableTypeTable { name_index: u16, entries: Vec<LocalVariableTypeTableEntry> },
    /// Anything not listed above, byte for byte.
    Raw { name_index: u16, info: Vec<u8> },
}

impl AttributeInfo {
    pub fn name_index(&self) -> u16 {
        match self {
            AttributeInfo::Code(code) => code.name_index,
            AttributeInfo::StackMapTable(table) => table.name_index,
            AttributeInfo::Exceptions { name_index, .. }
            | AttributeInfo::LineNumberTable { name_index, .. }
            | AttributeInfo::LocalVariableTable { name_index, .. }
            | AttributeInfo::LocalVariableTypeTable { name_index, .. }
            | AttributeInfo::Raw { name_index, .. } => *name_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub name_index: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone)]
pub struct StackMapTableAttribute {
    pub name_index: u16,
    pub entries: Vec<StackMapFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationTypeInfo },
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationTypeInfo },
    Chop { offset_delta: u16, k: u8 },
    SameExtended { offset_delta: u16 },
    Append { offset_delta: u16, locals: Vec<VerificationTypeInfo> },
    Full { offset_delta: u16, locals: Vec<VerificationTypeInfo>, stack: Vec<VerificationTypeInfo> },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    /// Replaces the offset delta, switching the compact `Same` forms to their
    /// extended encodings once the delta no longer fits in the frame type.
    pub fn with_offset_delta(self, delta: u16) -> StackMapFrame {
        match self {
            StackMapFrame::Same { .. } | StackMapFrame::SameExtended { .. } if delta <= 63 => {
                StackMapFrame::Same { offset_delta: delta }
            }
            StackMapFrame::Same { .. } | StackMapFrame::SameExtended { .. } => {
                StackMapFrame::SameExtended { offset_delta: delta }
            }
            StackMapFrame::SameLocals1StackItem { stack, .. } if delta <= 63 => {
                StackMapFrame::SameLocals1StackItem { offset_delta: delta, stack }
            }
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => {
                StackMapFrame::SameLocals1StackItemExtended { offset_delta: delta, stack }
            }
            StackMapFrame::Chop { k, .. } => StackMapFrame::Chop { offset_delta: delta, k },
            StackMapFrame::Append { locals, .. } => StackMapFrame::Append { offset_delta: delta, locals },
            StackMapFrame::Full { locals, stack, .. } => StackMapFrame::Full { offset_delta: delta, locals, stack },
        }
    }

    pub fn verification_types_mut(&mut self) -> Vec<&mut VerificationTypeInfo> {
        match self {
            StackMapFrame::Same { .. } | StackMapFrame::SameExtended { .. } | StackMapFrame::Chop { .. } => Vec::new(),
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => vec![stack],
            StackMapFrame::Append { locals, .. } => locals.iter_mut().collect(),
            StackMapFrame::Full { locals, stack, .. } => locals.iter_mut().chain(stack.iter_mut()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    /// Code offset of the `new` instruction that created the value.
    Uninitialized(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTypeTableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub signature_index: u16,
    pub index: u16,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        let v = *self.data.get(self.pos).ok_or(ClassFileError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        if self.remaining() < len {
            return Err(ClassFileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u2_table(&mut self) -> Result<Vec<u16>, ClassFileError> {
        let count = self.read_u2()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_u2()?);
        }
        Ok(out)
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u1(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u2(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u4(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn u2_table(&mut self, values: &[u16]) {
        self.u2(values.len() as u16);
        for v in values {
            self.u2(*v);
        }
    }
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = r.read_u2()?;
        let major_version = r.read_u2()?;

        let constant_pool = parse_constant_pool(&mut r)?;

        let access_flags = r.read_u2()?;
        let this_class = r.read_u2()?;
        let super_class = r.read_u2()?;
        let interfaces = r.read_u2_table()?;

        let fields_count = r.read_u2()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            fields.push(parse_member(&mut r, &constant_pool)?);
        }

        let methods_count = r.read_u2()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(parse_member(&mut r, &constant_pool)?);
        }

        let attributes = parse_attributes(&mut r, &constant_pool)?;

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// An empty class extending `super_name`, targeting Java 8.
    pub fn new_class(name: &str, super_name: &str, access_flags: u16) -> Result<Self, ClassFileError> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.class(name)?;
        let super_class = constant_pool.class(super_name)?;
        Ok(Self {
            minor_version: 0,
            major_version: 52,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Adds a method without a `Code` attribute. The caller sets `ACC_NATIVE`.
    pub fn add_native_method(&mut self, access_flags: u16, name: &str, descriptor: &str) -> Result<(), ClassFileError> {
        let name_index = self.constant_pool.utf8(name)?;
        let descriptor_index = self.constant_pool.utf8(descriptor)?;
        self.methods.push(MemberInfo { access_flags, name_index, descriptor_index, attributes: Vec::new() });
        Ok(())
    }

    pub fn name(&self) -> Result<Cow<'_, str>, ClassFileError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.u4(MAGIC);
        w.u2(self.minor_version);
        w.u2(self.major_version);

        w.u2(self.constant_pool.count());
        for entry in self.constant_pool.entries.iter().flatten() {
            write_cp_entry(&mut w, entry);
        }

        w.u2(self.access_flags);
        w.u2(self.this_class);
        w.u2(self.super_class);
        w.u2_table(&self.interfaces);

        w.u2(self.fields.len() as u16);
        for field in &self.fields {
            write_member(&mut w, field);
        }
        w.u2(self.methods.len() as u16);
        for method in &self.methods {
            write_member(&mut w, method);
        }
        write_attributes(&mut w, &self.attributes);
        w.buf
    }
}

fn parse_constant_pool(r: &mut Reader) -> Result<ConstantPool, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count);
    entries.push(None);

    while entries.len() < count {
        let tag = r.read_u1()?;
        let entry = match tag {
            1 => {
                let len = r.read_u2()? as usize;
                CpInfo::Utf8(r.read_bytes(len)?.to_vec())
            }
            3 => CpInfo::Integer(r.read_u4()? as i32),
            4 => CpInfo::Float(r.read_u4()?),
            5 | 6 => {
                let high = r.read_u4()? as u64;
                let low = r.read_u4()? as u64;
                let bits = (high << 32) | low;
                let entry = if tag == 5 { CpInfo::Long(bits as i64) } else { CpInfo::Double(bits) };
                entries.push(Some(entry));
                entries.push(None);
                continue;
            }
            7 => CpInfo::Class { name_index: r.read_u2()? },
            8 => CpInfo::String { string_index: r.read_u2()? },
            9 => CpInfo::Fieldref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            10 => CpInfo::Methodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            11 => CpInfo::InterfaceMethodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            12 => CpInfo::NameAndType { name_index: r.read_u2()?, descriptor_index: r.read_u2()? },
            15 => CpInfo::MethodHandle { reference_kind: r.read_u1()?, reference_index: r.read_u2()? },
            16 => CpInfo::MethodType { descriptor_index: r.read_u2()? },
            17 => CpInfo::Dynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            18 => CpInfo::InvokeDynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            19 => CpInfo::Module { name_index: r.read_u2()? },
            20 => CpInfo::Package { name_index: r.read_u2()? },
            _ => return Err(ClassFileError::InvalidConstantPoolTag(tag)),
        };
        entries.push(Some(entry));
    }

    // a trailing Long/Double pushes one slot past the declared count
    if entries.len() != count {
        return Err(ClassFileError::InvalidConstantPoolIndex(count as u16));
    }

    Ok(ConstantPool { entries })
}

fn write_cp_entry(w: &mut Writer, entry: &CpInfo) {
    w.u1(entry.tag());
    match entry {
        CpInfo::Utf8(bytes) => {
            w.u2(bytes.len() as u16);
            w.bytes(bytes);
        }
        CpInfo::Integer(v) => w.u4(*v as u32),
        CpInfo::Float(bits) => w.u4(*bits),
        CpInfo::Long(v) => {
            let bits = *v as u64;
            w.u4((bits >> 32) as u32);
            w.u4(bits as u32);
        }
        CpInfo::Double(bits) => {
            w.u4((bits >> 32) as u32);
            w.u4(*bits as u32);
        }
        CpInfo::Class { name_index } => w.u2(*name_index),
        CpInfo::String { string_index } => w.u2(*string_index),
        CpInfo::Fieldref { class_index, name_and_type_index }
        | CpInfo::Methodref { class_index, name_and_type_index }
        | CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
            w.u2(*class_index);
            w.u2(*name_and_type_index);
        }
        CpInfo::NameAndType { name_index, descriptor_index } => {
            w.u2(*name_index);
            w.u2(*descriptor_index);
        }
        CpInfo::MethodHandle { reference_kind, reference_index } => {
            w.u1(*reference_kind);
            w.u2(*reference_index);
        }
        CpInfo::MethodType { descriptor_index } => w.u2(*descriptor_index),
        CpInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index }
        | CpInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
            w.u2(*bootstrap_method_attr_index);
            w.u2(*name_and_type_index);
        }
        CpInfo::Module { name_index } | CpInfo::Package { name_index } => w.u2(*name_index),
    }
}

fn parse_member(r: &mut Reader, cp: &ConstantPool) -> Result<MemberInfo, ClassFileError> {
    let access_flags = r.read_u2()?;
    let name_index = r.read_u2()?;
    let descriptor_index = r.read_u2()?;
    let attributes = parse_attributes(r, cp)?;
    Ok(MemberInfo { access_flags, name_index, descriptor_index, attributes })
}

fn write_member(w: &mut Writer, member: &MemberInfo) {
    w.u2(member.access_flags);
    w.u2(member.name_index);
    w.u2(member.descriptor_index);
    write_attributes(w, &member.attributes);
}

fn parse_attributes(r: &mut Reader, cp: &ConstantPool) -> Result<Vec<AttributeInfo>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = r.read_u2()?;
        let length = r.read_u4()? as usize;
        let info = r.read_bytes(length)?;
        let mut sub = Reader::new(info);

        // names that are not valid UTF-8 cannot be one of ours
        let name = cp.get_utf8(name_index).unwrap_or_default();
        let attr = match name.as_ref() {
            "Code" => AttributeInfo::Code(parse_code_attribute(&mut sub, cp, name_index)?),
            "StackMapTable" => AttributeInfo::StackMapTable(parse_stack_map_table(&mut sub, name_index)?),
            "Exceptions" => AttributeInfo::Exceptions { name_index, exception_index_table: sub.read_u2_table()? },
            "LineNumberTable" => {
                let num = sub.read_u2()? as usize;
                let mut entries = Vec::with_capacity(num);
                for _ in 0..num {
                    entries.push(LineNumberEntry { start_pc: sub.read_u2()?, line_number: sub.read_u2()? });
                }
                AttributeInfo::LineNumberTable { name_index, entries }
            }
            "LocalVariableTable" => {
                let num = sub.read_u2()? as usize;
                let mut entries = Vec::with_capacity(num);
                for _ in 0..num {
                    entries.push(LocalVariableTableEntry {
                        start_pc: sub.read_u2()?,
                        length: sub.read_u2()?,
                        name_index: sub.read_u2()?,
                        descriptor_index: sub.read_u2()?,
                        index: sub.read_u2()?,
                    });
                }
                AttributeInfo::LocalVariableTable { name_index, entries }
            }
            "LocalVariableTypeTable" => {
                let num = sub.read_u2()? as usize;
                let mut entries = Vec::with_capacity(num);
                for _ in 0..num {
                    entries.push(LocalVariableTypeTableEntry {
                        start_pc: sub.read_u2()?,
                        length: sub.read_u2()?,
                        name_index: sub.read_u2()?,
                        signature_index: sub.read_u2()?,
                        index: sub.read_u2()?,
                    });
                }
                AttributeInfo::LocalVariableTypeTable { name_index, entries }
            }
            _ => {
                sub.pos = info.len();
                AttributeInfo::Raw { name_index, info: info.to_vec() }
            }
        };

        if sub.remaining() != 0 {
            return Err(ClassFileError::InvalidAttribute(name.to_string()));
        }

        attrs.push(attr);
    }
    Ok(attrs)
}

fn write_attributes(w: &mut Writer, attrs: &[AttributeInfo]) {
    w.u2(attrs.len() as u16);
    for attr in attrs {
        let mut body = Writer::default();
        match attr {
            AttributeInfo::Code(code) => write_code_attribute(&mut body, code),
            AttributeInfo::StackMapTable(table) => {
                body.u2(table.entries.len() as u16);
                for frame in &table.entries {
                    write_stack_map_frame(&mut body, frame);
                }
            }
            AttributeInfo::Exceptions { exception_index_table, .. } => body.u2_table(exception_index_table),
            AttributeInfo::LineNumberTable { entries, .. } => {
                body.u2(entries.len() as u16);
                for e in entries {
                    body.u2(e.start_pc);
                    body.u2(e.line_number);
                }
            }
            AttributeInfo::LocalVariableTable { entries, .. } => {
                body.u2(entries.len() as u16);
                for e in entries {
                    body.u2(e.start_pc);
                    body.u2(e.length);
                    body.u2(e.name_index);
                    body.u2(e.descriptor_index);
                    body.u2(e.index);
                }
            }
            AttributeInfo::LocalVariableTypeTable { entries, .. } => {
                body.u2(entries.len() as u16);
                for e in entries {
                    body.u2(e.start_pc);
                    body.u2(e.length);
                    body.u2(e.name_index);
                    body.u2(e.signature_index);
                    body.u2(e.index);
                }
            }
            AttributeInfo::Raw { info, .. } => body.bytes(info),
        }
        w.u2(attr.name_index());
        w.u4(body.buf.len() as u32);
        w.bytes(&body.buf);
    }
}

fn parse_code_attribute(r: &mut Reader, cp: &ConstantPool, name_index: u16) -> Result<CodeAttribute, ClassFileError> {
    let max_stack = r.read_u2()?;
    let max_locals = r.read_u2()?;
    let code_length = r.read_u4()? as usize;
    let code = r.read_bytes(code_length)?.to_vec();
    let exception_table_length = r.read_u2()? as usize;
    let mut exception_table = Vec::with_capacity(exception_table_length);
    for _ in 0..exception_table_length {
        exception_table.push(ExceptionTableEntry {
            start_pc: r.read_u2()?,
            end_pc: r.read_u2()?,
            handler_pc: r.read_u2()?,
            catch_type: r.read_u2()?,
        });
    }
    let attributes = parse_attributes(r, cp)?;
    Ok(CodeAttribute { name_index, max_stack, max_locals, code, exception_table, attributes })
}

fn write_code_attribute(w: &mut Writer, code: &CodeAttribute) {
    w.u2(code.max_stack);
    w.u2(code.max_locals);
    w.u4(code.code.len() as u32);
    w.bytes(&code.code);
    w.u2(code.exception_table.len() as u16);
    for e in &code.exception_table {
        w.u2(e.start_pc);
        w.u2(e.end_pc);
        w.u2(e.handler_pc);
        w.u2(e.catch_type);
    }
    write_attributes(w, &code.attributes);
}

fn parse_stack_map_table(r: &mut Reader, name_index: u16) -> Result<StackMapTableAttribute, ClassFileError> {
    let num = r.read_u2()? as usize;
    let mut entries = Vec::with_capacity(num);
    for _ in 0..num {
        let frame_type = r.read_u1()?;
        let frame = match frame_type {
            0..=63 => StackMapFrame::Same { offset_delta: frame_type as u16 },
            64..=127 => {
                let stack = parse_verification_type_info(r)?;
                StackMapFrame::SameLocals1StackItem { offset_delta: (frame_type - 64) as u16, stack }
            }
            247 => {
                let offset_delta = r.read_u2()?;
                let stack = parse_verification_type_info(r)?;
                StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack }
            }
            248..=250 => {
                let offset_delta = r.read_u2()?;
                StackMapFrame::Chop { offset_delta, k: 251u8 - frame_type }
            }
            251 => StackMapFrame::SameExtended { offset_delta: r.read_u2()? },
            252..=254 => {
                let offset_delta = r.read_u2()?;
                let count = (frame_type - 251) as usize;
                let mut locals = Vec::with_capacity(count);
                for _ in 0..count {
                    locals.push(parse_verification_type_info(r)?);
                }
                StackMapFrame::Append { offset_delta, locals }
            }
            255 => {
                let offset_delta = r.read_u2()?;
                let num_locals = r.read_u2()? as usize;
                let mut locals = Vec::with_capacity(num_locals);
                for _ in 0..num_locals {
                    locals.push(parse_verification_type_info(r)?);
                }
                let num_stack = r.read_u2()? as usize;
                let mut stack = Vec::with_capacity(num_stack);
                for _ in 0..num_stack {
                    stack.push(parse_verification_type_info(r)?);
                }
                StackMapFrame::Full { offset_delta, locals, stack }
            }
            _ => return Err(ClassFileError::InvalidAttribute("StackMapTable".to_string())),
        };
        entries.push(frame);
    }
    Ok(StackMapTableAttribute { name_index, entries })
}

fn write_stack_map_frame(w: &mut Writer, frame: &StackMapFrame) {
    match frame {
        StackMapFrame::Same { offset_delta } => w.u1(*offset_delta as u8),
        StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
            w.u1(64 + *offset_delta as u8);
            write_verification_type_info(w, stack);
        }
        StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
            w.u1(247);
            w.u2(*offset_delta);
            write_verification_type_info(w, stack);
        }
        StackMapFrame::Chop { offset_delta, k } => {
            w.u1(251 - *k);
            w.u2(*offset_delta);
        }
        StackMapFrame::SameExtended { offset_delta } => {
            w.u1(251);
            w.u2(*offset_delta);
        }
        StackMapFrame::Append { offset_delta, locals } => {
            w.u1(251 + locals.len() as u8);
            w.u2(*offset_delta);
            for local in locals {
                write_verification_type_info(w, local);
            }
        }
        StackMapFrame::Full { offset_delta, locals, stack } => {
            w.u1(255);
            w.u2(*offset_delta);
            w.u2(locals.len() as u16);
            for local in locals {
                write_verification_type_info(w, local);
            }
            w.u2(stack.len() as u16);
            for item in stack {
                write_verification_type_info(w, item);
            }
        }
    }
}

fn parse_verification_type_info(r: &mut Reader) -> Result<VerificationTypeInfo, ClassFileError> {
    let tag = r.read_u1()?;
    let info = match tag {
        0 => VerificationTypeInfo::Top,
        1 => VerificationTypeInfo::Integer,
        2 => VerificationTypeInfo::Float,
        3 => VerificationTypeInfo::Double,
        4 => VerificationTypeInfo::Long,
        5 => VerificationTypeInfo::Null,
        6 => VerificationTypeInfo::UninitializedThis,
        7 => VerificationTypeInfo::Object(r.read_u2()?),
        8 => VerificationTypeInfo::Uninitialized(r.read_u2()?),
        _ => return Err(ClassFileError::InvalidAttribute("StackMapTable".to_string())),
    };
    Ok(info)
}

fn write_verification_type_info(w: &mut Writer, info: &VerificationTypeInfo) {
    match info {
        VerificationTypeInfo::Top => w.u1(0),
        VerificationTypeInfo::Integer => w.u1(1),
        VerificationTypeInfo::Float => w.u1(2),
        VerificationTypeInfo::Double => w.u1(3),
        VerificationTypeInfo::Long => w.u1(4),
        VerificationTypeInfo::Null => w.u1(5),
        VerificationTypeInfo::UninitializedThis => w.u1(6),
        VerificationTypeInfo::Object(index) => {
            w.u1(7);
            w.u2(*index);
        }
        VerificationTypeInfo::Uninitialized(offset) => {
            w.u1(8);
            w.u2(*offset);
        }
    }
}
