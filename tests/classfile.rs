mod common;

use argcov::classfile::{AttributeInfo, ClassFile, ClassFileError, CpInfo, StackMapFrame, VerificationTypeInfo};
use common::*;

fn build_test_class() -> Vec<u8> {
    let mut class = ClassBuilder::new("com/acme/Service");
    class.cp().long(1 << 40);
    class.cp().integer(123);
    class.field(ACC_PRIVATE, "retries", "I").field(ACC_PUBLIC | ACC_STATIC, "name", "Ljava/lang/String;");

    let mut handle = Method::new(
        ACC_PUBLIC,
        "handle",
        "(ILjava/lang/String;)I",
        vec![ICONST_0, 0x99, 0x00, 0x05, NOP, ILOAD_0, IRETURN, ICONST_0, IRETURN],
    );
    handle.max_stack = 2;
    handle.exceptions = vec![(0, 5, 7)];
    handle.lines = vec![(0, 10), (5, 11), (7, 12)];
    handle.locals = vec![(0, 9, "this", "Lcom/acme/Service;", 0), (0, 9, "id", "I", 1), (5, 2, "tmp", "I", 3)];
    handle.frames = vec![
        vec![5],                            // same
        vec![64 + 2, 1],                    // same_locals_1_stack_item, Integer
        vec![252, 0x00, 0x01, 2],           // append Float
        vec![255, 0x00, 0x01, 0x00, 0x01, 8, 0x00, 0x03, 0x00, 0x00], // full, Uninitialized(3)
        vec![251, 0x00, 0x02],              // same_frame_extended with a small delta
    ];
    class.method(handle);
    class.method(Method::without_code(ACC_PUBLIC | ACC_ABSTRACT, "run", "(J)V"));
    class.raw_attribute("SourceFile", &[0x00, 0x01]);
    class.raw_attribute("UnknownAttr", b"data");
    class.build()
}

#[test]
fn parse_then_write_is_byte_identical() {
    let bytes = build_test_class();
    let class = ClassFile::parse(&bytes).expect("parse class file");
    assert_eq!(class.to_bytes(), bytes);
}

#[test]
fn models_code_tables() {
    let bytes = build_test_class();
    let class = ClassFile::parse(&bytes).unwrap();
    assert_eq!(class.name().unwrap(), "com/acme/Service");
    assert_eq!(class.fields.len(), 2);
    assert_eq!(class.methods.len(), 2);
    assert!(class.methods[1].code().is_none());

    let code = class.methods[0].code().unwrap();
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.code.len(), 9);
    assert_eq!(code.exception_table.len(), 1);
    assert_eq!(code.exception_table[0].handler_pc, 7);

    let frames = code
        .attributes
        .iter()
        .find_map(|a| match a {
            AttributeInfo::StackMapTable(t) => Some(&t.entries),
            _ => None,
        })
        .unwrap();
    assert_eq!(frames[0], StackMapFrame::Same { offset_delta: 5 });
    assert_eq!(
        frames[1],
        StackMapFrame::SameLocals1StackItem { offset_delta: 2, stack: VerificationTypeInfo::Integer }
    );
    assert_eq!(
        frames[3],
        StackMapFrame::Full {
            offset_delta: 1,
            locals: vec![VerificationTypeInfo::Uninitialized(3)],
            stack: vec![]
        }
    );
    assert_eq!(frames[4], StackMapFrame::SameExtended { offset_delta: 2 });

    assert!(code.attributes.iter().any(|a| matches!(a, AttributeInfo::LineNumberTable { entries, .. } if entries.len() == 3)));
    assert!(code.attributes.iter().any(|a| matches!(a, AttributeInfo::LocalVariableTable { entries, .. } if entries.len() == 3)));
    assert!(class.attributes.iter().all(|a| matches!(a, AttributeInfo::Raw { .. })));
}

#[test]
fn long_constants_take_two_slots() {
    let bytes = build_test_class();
    let class = ClassFile::parse(&bytes).unwrap();
    let long_index = (1..class.constant_pool.count())
        .find(|i| matches!(class.constant_pool.get(*i), Ok(CpInfo::Long(_))))
        .unwrap();
    assert_eq!(class.constant_pool.get(long_index).unwrap(), &CpInfo::Long(1 << 40));
    assert_eq!(
        class.constant_pool.get(long_index + 1),
        Err(ClassFileError::InvalidConstantPoolIndex(long_index + 1))
    );
}

#[test]
fn interning_reuses_entries() {
    let bytes = build_test_class();
    let mut class = ClassFile::parse(&bytes).unwrap();
    let before = class.constant_pool.count();
    let a = class.constant_pool.methodref("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;").unwrap();
    let after_first = class.constant_pool.count();
    let b = class.constant_pool.methodref("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;").unwrap();
    assert_eq!(a, b);
    assert!(after_first > before);
    assert_eq!(class.constant_pool.count(), after_first);

    // existing Utf8 entries are found, not duplicated
    let code_before = class.constant_pool.count();
    class.constant_pool.utf8("Code").unwrap();
    assert_eq!(class.constant_pool.count(), code_before);
}

#[test]
fn new_class_with_native_method() {
    let mut class = ClassFile::new_class("argcov/runtime/Collector", "java/lang/Object", 0x0021).unwrap();
    class.add_native_method(0x0109, "record", "([Ljava/lang/Object;)V").unwrap();
    let bytes = class.to_bytes();

    let parsed = ClassFile::parse(&bytes).unwrap();
    assert_eq!(parsed.name().unwrap(), "argcov/runtime/Collector");
    assert_eq!(parsed.constant_pool.class_name(parsed.super_class).unwrap(), "java/lang/Object");
    assert_eq!(parsed.major_version, 52);
    assert_eq!(parsed.methods.len(), 1);
    assert_eq!(parsed.methods[0].access_flags, 0x0109);
    assert!(parsed.methods[0].code().is_none());
    assert_eq!(parsed.to_bytes(), bytes);
}

#[test]
fn rejects_bad_input() {
    assert_eq!(ClassFile::parse(&[0xCA, 0xFE]).unwrap_err(), ClassFileError::UnexpectedEof);
    assert_eq!(
        ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]).unwrap_err(),
        ClassFileError::InvalidMagic(0xDEADBEEF)
    );

    let bytes = build_test_class();
    assert_eq!(ClassFile::parse(&bytes[..bytes.len() - 3]).unwrap_err(), ClassFileError::UnexpectedEof);

    let mut bad_tag = bytes.clone();
    bad_tag[10] = 2;
    assert_eq!(ClassFile::parse(&bad_tag).unwrap_err(), ClassFileError::InvalidConstantPoolTag(2));
}

#[test]
fn modified_utf8_names_are_decoded() {
    let mut builder = ClassBuilder::new("com/acme/Names");
    builder
        .empty_method(ACC_PUBLIC | ACC_STATIC, "nul\0name", "(I)V")
        .empty_method(ACC_PUBLIC | ACC_STATIC, "clef\u{1D11E}", "(I)V");
    let broken = builder.cp().utf8_bytes(&[b'a', 0xFF]);
    let truncated = builder.cp().utf8_bytes(&[0xE2, 0x82]);
    let bytes = builder.build();
    // NUL is written as two bytes, never as a zero byte
    assert!(bytes.windows(2).any(|w| w == [0xC0, 0x80]));

    let class = ClassFile::parse(&bytes).unwrap();
    let names: Vec<String> =
        class.methods.iter().map(|m| class.constant_pool.get_utf8(m.name_index).unwrap().into_owned()).collect();
    assert_eq!(names, vec!["nul\0name", "clef\u{1D11E}"]);
    assert_eq!(class.constant_pool.get_utf8(broken).unwrap_err(), ClassFileError::InvalidUtf8(broken));
    assert_eq!(class.constant_pool.get_utf8(truncated).unwrap_err(), ClassFileError::InvalidUtf8(truncated));
    assert_eq!(class.to_bytes(), bytes);

    // the writer encodes the same way
    let mut written = ClassFile::parse(&bytes).unwrap();
    let index = written.constant_pool.utf8("nul\0name").unwrap();
    assert_eq!(index, class.methods[0].name_index);
}
