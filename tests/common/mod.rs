//! Hand-assembled class files for the integration tests.
//!
//! Bytes are written directly rather than through `argcov::classfile`, so
//! that reader and writer are checked against an independent encoding.

#![allow(dead_code)]

use argcov::bytecode::{self, Instruction, LoadKind};
use argcov::classfile::{ClassFile, CodeAttribute};
use argcov::signature;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;

pub const RETURN: u8 = 0xb1;
pub const IRETURN: u8 = 0xac;
pub const NOP: u8 = 0x00;
pub const GOTO: u8 = 0xa7;
pub const ICONST_0: u8 = 0x03;
pub const ILOAD_0: u8 = 0x1a;
pub const POP: u8 = 0x57;

pub struct CpBuilder {
    entries: Vec<Vec<u8>>,
    next: u16,
}

impl CpBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new(), next: 1 }
    }

    fn push(&mut self, entry: Vec<u8>, width: u16) -> u16 {
        let index = self.next;
        self.entries.push(entry);
        self.next += width;
        index
    }

    pub fn count(&self) -> u16 {
        self.next
    }

    /// `s` in the JVM's modified UTF-8, the way javac writes it.
    pub fn utf8(&mut self, s: &str) -> u16 {
        let mut bytes = Vec::new();
        for unit in s.encode_utf16() {
            match unit {
                0x0001..=0x007F => bytes.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => bytes.extend([0xC0 | (unit >> 6) as u8, 0x80 | (unit & 0x3F) as u8]),
                _ => bytes.extend([
                    0xE0 | (unit >> 12) as u8,
                    0x80 | ((unit >> 6) & 0x3F) as u8,
                    0x80 | (unit & 0x3F) as u8,
                ]),
            }
        }
        self.utf8_bytes(&bytes)
    }

    /// A `Utf8` entry holding exactly `bytes`.
    pub fn utf8_bytes(&mut self, bytes: &[u8]) -> u16 {
        let mut entry = vec![1];
        entry.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        entry.extend_from_slice(bytes);
        self.push(entry, 1)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = vec![7];
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry, 1)
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        let mut entry = vec![8];
        entry.extend_from_slice(&string_index.to_be_bytes());
        self.push(entry, 1)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry, 1)
    }

    /// Takes two pool slots.
    pub fn long(&mut self, value: i64) -> u16 {
        let mut entry = vec![5];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry, 2)
    }

    pub fn methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut nat = vec![12];
        nat.extend_from_slice(&name_index.to_be_bytes());
        nat.extend_from_slice(&descriptor_index.to_be_bytes());
        let nat_index = self.push(nat, 1);
        let mut entry = vec![10];
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&nat_index.to_be_bytes());
        self.push(entry, 1)
    }
}

pub fn u1(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn push_attr(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    u2(out, name_index);
    u4(out, info.len() as u32);
    out.extend_from_slice(info);
}

/// A method to be assembled. Without `code` the method is emitted with no
/// `Code` attribute (abstract or native).
pub struct Method {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Option<Vec<u8>>,
    pub max_stack: u16,
    /// `(start, end, handler)`; catch type is "any".
    pub exceptions: Vec<(u16, u16, u16)>,
    pub lines: Vec<(u16, u16)>,
    /// `(start, length, name, descriptor, slot)`.
    pub locals: Vec<(u16, u16, &'static str, &'static str, u16)>,
    /// Raw `stack_map_frame` entries.
    pub frames: Vec<Vec<u8>>,
}

impl Method {
    pub fn new(access: u16, name: &str, descriptor: &str, code: Vec<u8>) -> Self {
        Self {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: Some(code),
            max_stack: 1,
            exceptions: Vec::new(),
            lines: Vec::new(),
            locals: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn without_code(access: u16, name: &str, descriptor: &str) -> Self {
        Self { code: None, ..Self::new(access, name, descriptor, Vec::new()) }
    }

    fn max_locals(&self) -> u16 {
        let params = signature::parse(&self.descriptor).map(|p| signature::arg_slots(&p)).unwrap_or(0);
        params + u16::from(self.access & ACC_STATIC == 0)
    }
}

pub struct ClassBuilder {
    cp: CpBuilder,
    this_class: u16,
    super_class: u16,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
    attributes: Vec<u8>,
    attribute_count: u16,
}

impl ClassBuilder {
    /// `name` is the internal name, `com/acme/Service`.
    pub fn new(name: &str) -> Self {
        let mut cp = CpBuilder::new();
        let this_class = cp.class(name);
        let super_class = cp.class("java/lang/Object");
        Self {
            cp,
            this_class,
            super_class,
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
            attributes: Vec::new(),
            attribute_count: 0,
        }
    }

    pub fn cp(&mut self) -> &mut CpBuilder {
        &mut self.cp
    }

    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.cp.utf8(name);
        let descriptor_index = self.cp.utf8(descriptor);
        u2(&mut self.fields, access);
        u2(&mut self.fields, name_index);
        u2(&mut self.fields, descriptor_index);
        u2(&mut self.fields, 0);
        self.field_count += 1;
        self
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        let name_index = self.cp.utf8(&method.name);
        let descriptor_index = self.cp.utf8(&method.descriptor);
        let max_locals = method.max_locals();
        u2(&mut self.methods, method.access);
        u2(&mut self.methods, name_index);
        u2(&mut self.methods, descriptor_index);

        let Some(code) = &method.code else {
            u2(&mut self.methods, 0);
            self.method_count += 1;
            return self;
        };

        let mut info = Vec::new();
        u2(&mut info, method.max_stack);
        u2(&mut info, max_locals);
        u4(&mut info, code.len() as u32);
        info.extend_from_slice(code);
        u2(&mut info, method.exceptions.len() as u16);
        for (start, end, handler) in &method.exceptions {
            u2(&mut info, *start);
            u2(&mut info, *end);
            u2(&mut info, *handler);
            u2(&mut info, 0);
        }

        let mut sub = Vec::new();
        let mut sub_count = 0u16;
        if !method.lines.is_empty() {
            let name = self.cp.utf8("LineNumberTable");
            let mut table = Vec::new();
            u2(&mut table, method.lines.len() as u16);
            for (pc, line) in &method.lines {
                u2(&mut table, *pc);
                u2(&mut table, *line);
            }
            push_attr(&mut sub, name, &table);
            sub_count += 1;
        }
        if !method.locals.is_empty() {
            let name = self.cp.utf8("LocalVariableTable");
            let mut table = Vec::new();
            u2(&mut table, method.locals.len() as u16);
            for (start, length, local_name, descriptor, slot) in &method.locals {
                let n = self.cp.utf8(local_name);
                let d = self.cp.utf8(descriptor);
                u2(&mut table, *start);
                u2(&mut table, *length);
                u2(&mut table, n);
                u2(&mut table, d);
                u2(&mut table, *slot);
            }
            push_attr(&mut sub, name, &table);
            sub_count += 1;
        }
        if !method.frames.is_empty() {
            let name = self.cp.utf8("StackMapTable");
            let mut table = Vec::new();
            u2(&mut table, method.frames.len() as u16);
            for frame in &method.frames {
                table.extend_from_slice(frame);
            }
            push_attr(&mut sub, name, &table);
            sub_count += 1;
        }
        u2(&mut info, sub_count);
        info.extend_from_slice(&sub);

        let code_name = self.cp.utf8("Code");
        u2(&mut self.methods, 1);
        push_attr(&mut self.methods, code_name, &info);
        self.method_count += 1;
        self
    }

    /// Shorthand for a method whose body is a single `return`.
    pub fn empty_method(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        self.method(Method::new(access, name, descriptor, vec![RETURN]))
    }

    /// An attribute the reader does not model.
    pub fn raw_attribute(&mut self, name: &str, info: &[u8]) -> &mut Self {
        let name_index = self.cp.utf8(name);
        push_attr(&mut self.attributes, name_index, info);
        self.attribute_count += 1;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        u4(&mut bytes, 0xCAFEBABE);
        u2(&mut bytes, 0);
        u2(&mut bytes, 52);
        u2(&mut bytes, self.cp.count());
        for entry in &self.cp.entries {
            bytes.extend_from_slice(entry);
        }
        u2(&mut bytes, ACC_PUBLIC | ACC_SUPER);
        u2(&mut bytes, self.this_class);
        u2(&mut bytes, self.super_class);
        u2(&mut bytes, 0);
        u2(&mut bytes, self.field_count);
        bytes.extend_from_slice(&self.fields);
        u2(&mut bytes, self.method_count);
        bytes.extend_from_slice(&self.methods);
        u2(&mut bytes, self.attribute_count);
        bytes.extend_from_slice(&self.attributes);
        bytes
    }
}

/// The `Code` attribute of the first method called `name`.
pub fn method_code(bytes: &[u8], name: &str) -> CodeAttribute {
    let class = ClassFile::parse(bytes).expect("parse class");
    class
        .methods
        .iter()
        .find(|m| class.constant_pool.get_utf8(m.name_index).is_ok_and(|n| n == name))
        .and_then(|m| m.code().cloned())
        .unwrap_or_else(|| panic!("no code for {name}"))
}

/// Every local load in `code`, in order.
pub fn loads(code: &[u8]) -> Vec<(LoadKind, u16)> {
    bytecode::decode(code)
        .expect("decode")
        .into_iter()
        .filter_map(|(_, insn)| match insn {
            Instruction::Load(kind, slot) => Some((kind, slot)),
            _ => None,
        })
        .collect()
}

/// Length of the capture prefix: everything up to and including the
/// trailing `nop` padding after the last `invokestatic`.
pub fn prefix_len(code: &[u8]) -> usize {
    let insns = bytecode::decode(code).expect("decode");
    let last_invoke = insns
        .iter()
        .rposition(|(_, insn)| matches!(insn, Instruction::InvokeStatic(_)))
        .expect("capture call");
    let mut end = insns[last_invoke].0 as usize + 3;
    while end < code.len() && code[end] == NOP && end % 4 != 0 {
        end += 1;
    }
    end
}
