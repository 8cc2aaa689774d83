//! # Protocol Tests
//!
//! Opcode encoding table, grouping, and message reply construction.

use coherence_core::common::{BlockAddr, CoherenceError, NodeId};
use coherence_core::protocol::{Message, Opcode, OpcodeGroup};
use rstest::rstest;

#[rstest]
#[case(Opcode::GetS, 0x0)]
#[case(Opcode::GetM, 0x1)]
#[case(Opcode::PutM, 0x2)]
#[case(Opcode::PutS, 0x3)]
#[case(Opcode::PutE, 0x4)]
#[case(Opcode::InvAck, 0x5)]
#[case(Opcode::NackD, 0x6)]
#[case(Opcode::NackC, 0x7)]
#[case(Opcode::RespPutM, 0x8)]
#[case(Opcode::FwdGetS, 0x9)]
#[case(Opcode::Inv, 0xA)]
#[case(Opcode::Data, 0xB)]
#[case(Opcode::DataS, 0xC)]
#[case(Opcode::PutAck, 0xD)]
#[case(Opcode::NackB, 0xE)]
fn test_encoding_table(#[case] opcode: Opcode, #[case] code: u8) {
    assert_eq!(opcode.code(), code);
    assert_eq!(Opcode::from_code(code), Ok(opcode));
}

#[test]
fn test_unknown_code() {
    assert_eq!(Opcode::from_code(0xF), Err(CoherenceError::UnknownOpcode(0xF)));
}

#[test]
fn test_groups_are_disjoint() {
    let count = |group| Opcode::ALL.iter().filter(|op| op.group() == group).count();
    assert_eq!(count(OpcodeGroup::Request), 4);
    assert_eq!(count(OpcodeGroup::Response), 5);
    assert_eq!(count(OpcodeGroup::Forward), 2);
    assert_eq!(count(OpcodeGroup::Grant), 3);
    assert_eq!(count(OpcodeGroup::Reject), 1);
}

#[test]
fn test_data_carriers() {
    let carriers: Vec<_> = Opcode::ALL.into_iter().filter(|op| op.carries_data()).collect();
    assert_eq!(
        carriers,
        vec![Opcode::PutM, Opcode::RespPutM, Opcode::Data, Opcode::DataS]
    );
}

#[test]
fn test_reply_swaps_endpoints_and_keeps_requestor() {
    let fwd = Message::new(Opcode::FwdGetS, BlockAddr(0x100), NodeId::DIRECTORY, NodeId(3))
        .with_requestor(NodeId(7));
    let reply = fwd.reply(Opcode::PutE);

    assert_eq!(reply.src, NodeId(3));
    assert_eq!(reply.dst, NodeId::DIRECTORY);
    assert_eq!(reply.requestor, NodeId(7));
    assert_eq!(reply.addr, BlockAddr(0x100));
    assert_eq!(reply.data, 0);
}

#[test]
fn test_display() {
    let msg = Message::new(Opcode::Data, BlockAddr(0x40), NodeId::DIRECTORY, NodeId(2)).with_data(5);
    assert_eq!(msg.to_string(), "Data 0x40 dir->n2 data=0x5");

    let req = Message::new(Opcode::GetS, BlockAddr(0x40), NodeId(2), NodeId::DIRECTORY);
    assert_eq!(req.to_string(), "GetS 0x40 n2->dir");
}
