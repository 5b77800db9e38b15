//! Dirty tracking

mod common;

use avm2_abc::{AbcFile, EncodeOptions, NamespaceKind, Operand};
use common::game_bytes;

#[test]
fn test_fresh_decode_is_untouched() {
    let bytes = game_bytes();
    let decoded = AbcFile::decode(&bytes).unwrap();
    assert!(!decoded.is_tampered());
    assert!(!decoded.summary().tampered);
    assert!(decoded.methods().all(|(_, m)| !m.is_tampered()));
}

#[test]
fn test_disassembly_tampers() {
    let bytes = game_bytes();
    let mut decoded = AbcFile::decode(&bytes).unwrap();
    let update = decoded.method_by_name("update").unwrap();

    decoded.disassemble_method(update).unwrap();
    assert!(decoded.method(update).unwrap().is_tampered());
    assert!(decoded.is_tampered());

    // Nothing changed, so the rebuild matches the input
    assert_eq!(decoded.encode(&EncodeOptions::default()).unwrap(), bytes);
    assert!(!decoded.is_tampered());
}

#[test]
fn test_mutable_access_tampers() {
    let mut decoded = AbcFile::decode(&game_bytes()).unwrap();
    let main = decoded.class_by_name("game.Main").unwrap();
    decoded.class_mut(main).unwrap().flags.is_final = true;
    assert!(decoded.is_tampered());

    let bytes = decoded.encode(&EncodeOptions::default()).unwrap();
    let again = AbcFile::decode(&bytes).unwrap();
    let id = again.class_by_name("game.Main").unwrap();
    assert!(again.class(id).unwrap().flags.is_final);
}

#[test]
fn test_creating_names_does_not_tamper() {
    let mut decoded = AbcFile::decode(&game_bytes()).unwrap();
    let ns = decoded.create_namespace(NamespaceKind::Package, "extra");
    decoded.create_qname(ns, "Unused").unwrap();
    assert!(!decoded.is_tampered());
}

#[test]
fn test_edited_constant_replaces_pool_entry() {
    let mut decoded = AbcFile::decode(&game_bytes()).unwrap();
    let update = decoded.method_by_name("update").unwrap();
    decoded.disassemble_method(update).unwrap();
    {
        let body = decoded.method_mut(update).unwrap().body_mut().unwrap();
        let push = body
            .instructions_mut()
            .unwrap()
            .iter_mut()
            .find(|i| i.operands() == [Operand::string("tick")])
            .unwrap();
        push.set_operand(0, Operand::string("tock")).unwrap();
    }

    let bytes = decoded.encode(&EncodeOptions::default()).unwrap();
    let strings: Vec<&str> = decoded.pool().strings().iter().map(|s| &**s).collect();
    assert!(strings.contains(&"tock"));
    assert!(!strings.contains(&"tick"));

    let again = AbcFile::decode(&bytes).unwrap();
    assert!(again.pool().strings().iter().any(|s| &**s == "tock"));
}

#[test]
fn test_mark_tampered_forces_rebuild() {
    let bytes = game_bytes();
    let mut decoded = AbcFile::decode(&bytes).unwrap();
    decoded.mark_tampered().unwrap();
    assert!(decoded.is_tampered());
    assert!(decoded.methods().all(|(_, m)| m.body().is_none_or(|b| b.is_disassembled())));

    let rebuilt = decoded
        .encode(&EncodeOptions::default().with_main_class("game.Main"))
        .unwrap();
    assert_eq!(rebuilt, bytes);
}
