//! Method entry rewriting.
//!
//! Every accepted method gets a prefix that packs its arguments into an
//! `Object[]` and hands them to the collector:
//!
//! ```text
//! ldc "com.acme.Service"            // owner
//! ldc "handle(IJ)V"                 // member
//! ldc "(IJ)V"                       // signature
//! iconst_2
//! anewarray java/lang/Object
//! dup; iconst_0; iload_1; invokestatic Integer.valueOf; aastore
//! dup; iconst_1; lload_2; invokestatic Long.valueOf; aastore
//! invokestatic argcov/runtime/Collector.record
//! nop ...                           // up to a multiple of 4 bytes
//! <original code>
//! ```
//!
//! The prefix length is a multiple of 4, so `tableswitch` and
//! `lookupswitch` padding in the original code stays valid and the original
//! bytes are appended untouched. Tables that hold code offsets are shifted by
//! the prefix length.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::bytecode::{self, opcodes, Instruction, LoadKind};
use crate::classfile::{AttributeInfo, ClassFile, ClassFileError, CodeAttribute, ConstantPool, VerificationTypeInfo};
use crate::error::{Error, Result};
use crate::predicate::{AccessFlags, MemberInfo as Member, MemberPredicate};
use crate::signature::{self, ParamKind, ParameterDescriptor, PrimitiveKind};
use crate::store::MemberKey;

/// Internal name of the class that receives captured arguments.
pub const COLLECTOR_CLASS: &str = "argcov/runtime/Collector";
pub const RECORD_METHOD: &str = "record";
pub const RECORD_DESCRIPTOR: &str = "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;[Ljava/lang/Object;)V";

/// Largest `code_length` the JVM accepts.
pub const MAX_CODE_LENGTH: usize = 65535;

/// A member known to exist, whether or not it ever runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub owner: String,
    pub member: String,
    pub signature: String,
}

impl Declaration {
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.owner.clone(), self.member.clone())
    }
}

/// Receives template declarations while classes are transformed.
pub trait DeclarationSink {
    fn declare(&self, declaration: &Declaration);
}

/// Drops every declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardDeclarations;

impl DeclarationSink for DiscardDeclarations {
    fn declare(&self, _declaration: &Declaration) {}
}

#[derive(Debug)]
pub struct MemberFailure {
    /// `name + descriptor`.
    pub member: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ClassOutcome {
    /// Binary class name, `com.acme.Service`.
    pub owner: String,
    /// New class bytes, `None` if no method was rewritten.
    pub bytes: Option<Vec<u8>>,
    pub declarations: Vec<Declaration>,
    pub failures: Vec<MemberFailure>,
    pub instrumented: usize,
}

/// Constant pool indices the capture prefix refers to.
#[derive(Debug, Clone, Default)]
pub struct CaptureRefs {
    pub owner: u16,
    pub member: u16,
    pub signature: u16,
    pub object_class: u16,
    pub record: u16,
    pub value_of: HashMap<PrimitiveKind, u16>,
}

impl CaptureRefs {
    /// Interns everything the prefix for `params` needs.
    pub fn intern(
        cp: &mut ConstantPool,
        key: &MemberKey,
        descriptor: &str,
        params: &[ParameterDescriptor],
        collector: (&str, &str),
    ) -> Result<Self> {
        let mut value_of = HashMap::new();
        for kind in params.iter().filter_map(ParameterDescriptor::primitive) {
            if !value_of.contains_key(&kind) {
                let index = cp.methodref(kind.box_class(), "valueOf", kind.value_of_descriptor())?;
                value_of.insert(kind, index);
            }
        }
        Ok(Self {
            owner: cp.string(&key.owner)?,
            member: cp.string(&key.member)?,
            signature: cp.string(descriptor)?,
            object_class: cp.class("java/lang/Object")?,
            record: cp.methodref(collector.0, collector.1, RECORD_DESCRIPTOR)?,
            value_of,
        })
    }

    /// Net operand stack change of the `invokestatic` at `index`.
    fn invoke_effect(&self, index: u16) -> i32 {
        if index == self.record {
            return -4;
        }
        self.value_of
            .iter()
            .find(|(_, i)| **i == index)
            .map_or(0, |(kind, _)| if kind.is_wide() { -1 } else { 0 })
    }
}

pub fn load_kind(param: &ParameterDescriptor) -> LoadKind {
    match param.kind() {
        ParamKind::Primitive(PrimitiveKind::Long) => LoadKind::Long,
        ParamKind::Primitive(PrimitiveKind::Float) => LoadKind::Float,
        ParamKind::Primitive(PrimitiveKind::Double) => LoadKind::Double,
        ParamKind::Primitive(_) => LoadKind::Int,
        ParamKind::Object(_) | ParamKind::Array(_) => LoadKind::Reference,
    }
}

/// The capture sequence for `params`, before encoding and padding.
///
/// `refs` must hold a `valueOf` entry for every primitive kind in `params`.
pub fn capture_prefix(params: &[ParameterDescriptor], is_static: bool, refs: &CaptureRefs) -> Vec<Instruction> {
    let slots = signature::slot_sequence(params, if is_static { 0 } else { 1 });

    let mut out = Vec::with_capacity(6 + params.len() * 5);
    out.push(Instruction::ldc(refs.owner));
    out.push(Instruction::ldc(refs.member));
    out.push(Instruction::ldc(refs.signature));
    out.push(Instruction::push_int(params.len() as i32));
    out.push(Instruction::ANewArray(refs.object_class));

    for (index, (param, slot)) in params.iter().zip(&slots).enumerate() {
        out.push(Instruction::Dup);
        out.push(Instruction::push_int(index as i32));
        out.push(Instruction::Load(load_kind(param), *slot));
        if let Some(value_of) = param.primitive().and_then(|kind| refs.value_of.get(&kind)) {
            out.push(Instruction::InvokeStatic(*value_of));
        }
        out.push(Instruction::AaStore);
    }

    out.push(Instruction::InvokeStatic(refs.record));
    out
}

/// Shifts every code offset in `code` that lies in the original body.
fn shift_code_offsets(code: &mut CodeAttribute, shift: u16) {
    for entry in &mut code.exception_table {
        entry.start_pc += shift;
        entry.end_pc += shift;
        entry.handler_pc += shift;
    }

    for attr in &mut code.attributes {
        match attr {
            AttributeInfo::LineNumberTable { entries, .. } => {
                for e in entries {
                    e.start_pc += shift;
                }
            }
            // ranges opening at 0 (parameters) also cover the prefix
            AttributeInfo::LocalVariableTable { entries, .. } => {
                for e in entries {
                    if e.start_pc == 0 {
                        e.length += shift;
                    } else {
                        e.start_pc += shift;
                    }
                }
            }
            AttributeInfo::LocalVariableTypeTable { entries, .. } => {
                for e in entries {
                    if e.start_pc == 0 {
                        e.length += shift;
                    } else {
                        e.start_pc += shift;
                    }
                }
            }
            AttributeInfo::StackMapTable(table) => {
                for frame in &mut table.entries {
                    for info in frame.verification_types_mut() {
                        if let VerificationTypeInfo::Uninitialized(offset) = info {
                            *offset += shift;
                        }
                    }
                }
                if let Some(first) = table.entries.first_mut() {
                    let delta = first.offset_delta() + shift;
                    *first = first.clone().with_offset_delta(delta);
                }
            }
            _ => {}
        }
    }
}

struct Planned {
    index: usize,
    key: MemberKey,
    descriptor: String,
    params: Vec<ParameterDescriptor>,
    is_static: bool,
}

/// Rewrites classes according to a [`MemberPredicate`].
pub struct Instrumenter {
    predicate: Box<dyn MemberPredicate>,
    collector_owner: String,
    collector_method: String,
    field_coverage: bool,
}

impl std::fmt::Debug for Instrumenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumenter")
            .field("collector_owner", &self.collector_owner)
            .field("collector_method", &self.collector_method)
            .field("field_coverage", &self.field_coverage)
            .finish_non_exhaustive()
    }
}

impl Instrumenter {
    pub fn new(predicate: impl MemberPredicate + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            collector_owner: COLLECTOR_CLASS.to_string(),
            collector_method: RECORD_METHOD.to_string(),
            field_coverage: false,
        }
    }

    /// Static method that receives `(owner, member, signature, Object[])`.
    pub fn with_collector(mut self, owner: &str, method: &str) -> Self {
        self.collector_owner = owner.to_string();
        self.collector_method = method.to_string();
        self
    }

    /// Also declare accepted fields, for coverage through field watches.
    pub fn with_field_coverage(mut self, enabled: bool) -> Self {
        self.field_coverage = enabled;
        self
    }

    pub fn field_coverage(&self) -> bool {
        self.field_coverage
    }

    pub fn accepts(&self, member: &Member<'_>) -> bool {
        self.predicate.accept(member)
    }

    /// Transforms one class. A class that cannot be parsed is an error; a
    /// member that cannot be rewritten is reported in
    /// [`ClassOutcome::failures`] and the rest of the class is still processed.
    pub fn instrument_class(&self, bytes: &[u8], sink: &dyn DeclarationSink) -> Result<ClassOutcome> {
        let mut class = ClassFile::parse(bytes)?;
        let owner = class.name()?.replace('/', ".");
        let mut outcome = ClassOutcome { owner: owner.clone(), ..ClassOutcome::default() };

        if self.field_coverage {
            for field in &class.fields {
                let name = class.constant_pool.get_utf8(field.name_index)?;
                let descriptor = class.constant_pool.get_utf8(field.descriptor_index)?;
                let info = Member::new(AccessFlags::from_bits_retain(field.access_flags), &owner, &name, &descriptor);
                if !self.predicate.accept(&info) {
                    continue;
                }
                let key = MemberKey::field(&owner, &name, &descriptor);
                outcome.declarations.push(Declaration {
                    owner: key.owner,
                    member: key.member,
                    signature: descriptor.to_string(),
                });
            }
        }

        let mut plan = Vec::new();
        for (index, method) in class.methods.iter().enumerate() {
            let name = class.constant_pool.get_utf8(method.name_index)?;
            let descriptor = class.constant_pool.get_utf8(method.descriptor_index)?;
            let access = AccessFlags::from_bits_retain(method.access_flags);
            let info = Member::new(access, &owner, &name, &descriptor);
            if !self.predicate.accept(&info) || method.code().is_none() {
                continue;
            }
            let key = MemberKey::method(&owner, &name, &descriptor);
            let params = match signature::parse(&descriptor) {
                Ok(params) => params,
                Err(error) => {
                    warn!(owner = %owner, member = %key.member, %error, "skipping member");
                    outcome.failures.push(MemberFailure { member: key.member, error: error.into() });
                    continue;
                }
            };
            if params.is_empty() {
                continue;
            }
            plan.push(Planned {
                index,
                key,
                descriptor: descriptor.to_string(),
                params,
                is_static: access.contains(AccessFlags::STATIC),
            });
        }

        for planned in plan {
            match self.instrument_method(&mut class, &planned) {
                Ok(()) => {
                    outcome.instrumented += 1;
                    outcome.declarations.push(Declaration {
                        owner: planned.key.owner,
                        member: planned.key.member,
                        signature: planned.descriptor,
                    });
                }
                Err(error) => {
                    warn!(owner = %owner, member = %planned.key.member, %error, "skipping member");
                    outcome.failures.push(MemberFailure { member: planned.key.member, error });
                }
            }
        }

        for declaration in &outcome.declarations {
            sink.declare(declaration);
        }

        if outcome.instrumented > 0 {
            outcome.bytes = Some(class.to_bytes());
            debug!(owner = %owner, methods = outcome.instrumented, "instrumented class");
        }
        Ok(outcome)
    }

    fn instrument_method(&self, class: &mut ClassFile, planned: &Planned) -> Result<()> {
        let refs = CaptureRefs::intern(
            &mut class.constant_pool,
            &planned.key,
            &planned.descriptor,
            &planned.params,
            (&self.collector_owner, &self.collector_method),
        )?;
        let prefix = capture_prefix(&planned.params, planned.is_static, &refs);
        let depth = bytecode::max_stack_depth(&prefix, |index| refs.invoke_effect(index))?;

        let mut code_bytes = bytecode::encode(&prefix, 0);
        while code_bytes.len() % 4 != 0 {
            code_bytes.push(opcodes::NOP);
        }

        let method = &mut class.methods[planned.index];
        let code = method
            .code_mut()
            .ok_or_else(|| ClassFileError::InvalidAttribute("Code".to_string()))?;

        let size = code_bytes.len() + code.code.len();
        if size > MAX_CODE_LENGTH {
            return Err(Error::CodeTooLarge { member: planned.key.member.clone(), size });
        }

        let shift = code_bytes.len() as u16;
        code_bytes.extend_from_slice(&code.code);
        code.code = code_bytes;
        code.max_stack = code.max_stack.max(depth);
        shift_code_offsets(code, shift);
        Ok(())
    }
}
