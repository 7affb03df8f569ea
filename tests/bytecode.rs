use argcov::bytecode::{self, opcodes, BytecodeError, Instruction, LoadKind};

#[test]
fn load_encodings_pick_the_shortest_form() {
    let cases = [
        (Instruction::Load(LoadKind::Int, 0), vec![0x1a]),
        (Instruction::Load(LoadKind::Long, 1), vec![0x1f]),
        (Instruction::Load(LoadKind::Float, 2), vec![0x24]),
        (Instruction::Load(LoadKind::Double, 3), vec![0x29]),
        (Instruction::Load(LoadKind::Reference, 3), vec![opcodes::ALOAD_3]),
        (Instruction::Load(LoadKind::Int, 4), vec![opcodes::ILOAD, 4]),
        (Instruction::Load(LoadKind::Reference, 255), vec![opcodes::ALOAD, 255]),
        (Instruction::Load(LoadKind::Long, 256), vec![opcodes::WIDE, opcodes::LLOAD, 0x01, 0x00]),
    ];
    for (insn, bytes) in cases {
        assert_eq!(bytecode::encode(std::slice::from_ref(&insn), 0), bytes, "{insn:?}");
        assert_eq!(bytecode::decode(&bytes).unwrap(), vec![(0, insn)]);
    }
}

#[test]
fn int_constants() {
    assert_eq!(Instruction::push_int(-1), Instruction::IConst(-1));
    assert_eq!(Instruction::push_int(5), Instruction::IConst(5));
    assert_eq!(Instruction::push_int(6), Instruction::BiPush(6));
    assert_eq!(Instruction::push_int(-128), Instruction::BiPush(-128));
    assert_eq!(Instruction::push_int(300), Instruction::SiPush(300));
    assert_eq!(bytecode::encode(&[Instruction::IConst(0)], 0), vec![0x03]);
}

#[test]
fn ldc_widens_past_255() {
    assert_eq!(Instruction::ldc(255), Instruction::Ldc(255));
    assert_eq!(Instruction::ldc(256), Instruction::LdcW(256));
    assert_eq!(bytecode::encode(&[Instruction::ldc(300)], 0), vec![opcodes::LDC_W, 0x01, 0x2c]);
}

#[test]
fn switch_padding_depends_on_position() {
    let switch = Instruction::TableSwitch { default: 20, low: 0, high: 1, offsets: vec![16, 18] };
    // opcode at 0: three pad bytes; at 3: none
    assert_eq!(bytecode::encode(std::slice::from_ref(&switch), 0).len(), 1 + 3 + 12 + 8);
    assert_eq!(bytecode::encode(std::slice::from_ref(&switch), 3).len(), 1 + 12 + 8);

    let mut code = vec![opcodes::NOP; 3];
    code.extend(bytecode::encode(std::slice::from_ref(&switch), 3));
    let decoded = bytecode::decode(&code).unwrap();
    assert_eq!(decoded.last().unwrap(), &(3, switch));
}

#[test]
fn lookupswitch_round_trips_at_aligned_offset() {
    let switch = Instruction::LookupSwitch { default: 40, pairs: vec![(1, 24), (10, 32)] };
    let mut code = bytecode::encode(&[Instruction::Nop, Instruction::Nop, Instruction::Nop, Instruction::Nop], 0);
    code.extend(bytecode::encode(std::slice::from_ref(&switch), 4));
    let decoded = bytecode::decode(&code).unwrap();
    assert_eq!(decoded[4], (4, switch.clone()));
    assert_eq!(bytecode::encode(&decoded.iter().map(|(_, i)| i.clone()).collect::<Vec<_>>(), 0), code);
}

#[test]
fn untyped_opcodes_keep_their_operands() {
    // getstatic #7; invokevirtual #9; return
    let code = [0xb2, 0x00, 0x07, 0xb6, 0x00, 0x09, opcodes::RETURN];
    let decoded = bytecode::decode(&code).unwrap();
    assert_eq!(
        decoded,
        vec![
            (0, Instruction::Other { opcode: 0xb2, operands: vec![0x00, 0x07] }),
            (3, Instruction::Other { opcode: 0xb6, operands: vec![0x00, 0x09] }),
            (6, Instruction::Other { opcode: opcodes::RETURN, operands: vec![] }),
        ]
    );
}

#[test]
fn wide_iinc_is_kept_whole() {
    let code = [opcodes::WIDE, opcodes::IINC, 0x01, 0x00, 0xff, 0xff];
    let decoded = bytecode::decode(&code).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(bytecode::encode(&[decoded[0].1.clone()], 0), code);
}

#[test]
fn truncated_and_invalid_code() {
    assert_eq!(bytecode::decode(&[opcodes::SIPUSH, 0x01]), Err(BytecodeError::UnexpectedEnd { pc: 0 }));
    assert_eq!(
        bytecode::decode(&[opcodes::NOP, 0xcb]),
        Err(BytecodeError::InvalidOpcode { pc: 1, opcode: 0xcb })
    );
}

#[test]
fn stack_depth_of_a_capture_sequence() {
    // three ldc, array, one boxed long element, record
    let prefix = vec![
        Instruction::Ldc(1),
        Instruction::Ldc(2),
        Instruction::Ldc(3),
        Instruction::IConst(1),
        Instruction::ANewArray(4),
        Instruction::Dup,
        Instruction::IConst(0),
        Instruction::Load(LoadKind::Long, 0),
        Instruction::InvokeStatic(5),
        Instruction::AaStore,
        Instruction::InvokeStatic(6),
    ];
    let effect = |index| match index {
        5 => -1,
        6 => -4,
        _ => 0,
    };
    // 4 (owner, member, sig, array) + dup + index + 2 words of long
    assert_eq!(bytecode::max_stack_depth(&prefix, effect).unwrap(), 8);
}

#[test]
fn stack_depth_rejects_unknown_and_underflow() {
    assert_eq!(
        bytecode::max_stack_depth(&[Instruction::Other { opcode: 0x60, operands: vec![] }], |_| 0),
        Err(BytecodeError::UnknownStackEffect { opcode: 0x60 })
    );
    assert_eq!(bytecode::max_stack_depth(&[Instruction::AaStore], |_| 0), Err(BytecodeError::StackUnderflow));
}
