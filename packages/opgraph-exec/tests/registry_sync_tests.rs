//! Store mutations made outside the interpreter are mirrored by its registry

mod common;

use common::*;
use opgraph_exec::{DuplicatePolicy, ErrorCategory, ExecError, OpDesc, Place, ProgramDesc, VarDesc};
use opgraph_scope::{Tensor, Variable};
use pretty_assertions::assert_eq;

#[test]
fn test_store_created_variable_is_reused() {
    let (interp, _) = interpreter();
    let side = interp.scope().var("side");
    side.set(Tensor::from_slice(&[4.0, -4.0]));
    let side_id = interp.registry().id_of("side").unwrap();

    let desc = ProgramDesc::new()
        .var(VarDesc::new("side").persistable(true))
        .var(VarDesc::new("y"))
        .op(OpDesc::new("relu")
            .input("X", &["side"])
            .output("Out", &["y"])
            .on(Place::accelerator(0)));
    let program = interp.compile(&desc, &[], &["y"]).unwrap();

    assert_eq!(interp.registry().id_of("side").unwrap(), side_id);
    assert!(interp.registry().desc(side_id).unwrap().unwrap().persistable);
    let out = interp.run(&program, &[]).unwrap();
    assert_eq!(out.fetch("y").unwrap().data(), &[4.0, 0.0]);
}

#[test]
fn test_shared_handle_is_visible_outside() {
    let (interp, _) = interpreter();
    let external = Variable::new();
    let id = interp.share_var("external", external.clone()).unwrap();
    assert!(!interp.registry().is_collectable(id).unwrap());

    let desc = program_with_vars(&["tmp"])
        .op(traced(0, &[], &["tmp"]).at(Place::accelerator(1), 0))
        .op(traced(1, &["tmp"], &["external"]));
    let program = interp.compile(&desc, &[], &[]).unwrap();
    interp.run(&program, &[]).unwrap();

    assert_eq!(external.get(), Some(Tensor::scalar(2.0)));
    assert!(interp.scope().find_var("external").unwrap().ptr_eq(&external));
}

#[test]
fn test_store_erase_vacates_id() {
    let (interp, _) = interpreter();
    let program = interp
        .compile(&program_with_vars(&["a"]).op(traced(0, &[], &["a"])), &[], &["a"])
        .unwrap();
    let a = interp.registry().id_of("a").unwrap();
    let live_before = interp.registry().len();

    assert_eq!(interp.scope().erase_vars(&["a"]), 1);

    assert!(!interp.registry().exists_name("a"));
    assert!(!interp.registry().exists_id(a));
    assert_eq!(interp.registry().len(), live_before - 1);
    let err = interp.registry().get(a).unwrap_err();
    assert!(matches!(err, ExecError::NotFound(_)));
    assert_eq!(err.category(), ErrorCategory::Recoverable);

    // ids are never reused
    let again = interp.registry().register("a", None).unwrap();
    assert_ne!(again, a);
    assert_eq!(interp.registry().issued(), again.index() + 1);

    // the program still runs on its own handle, but its fetch id is gone
    let err = interp.run(&program, &[]).unwrap_err();
    assert!(matches!(err, ExecError::NotFound(_)));
}

#[test]
fn test_store_rename_keeps_id() {
    let (interp, _) = interpreter();
    let id = interp.registry().register("before", Some(VarDesc::new("before"))).unwrap();

    interp.scope().rename("before", "after").unwrap();

    assert_eq!(interp.registry().id_of("after").unwrap(), id);
    assert_eq!(interp.registry().name_of(id).unwrap(), "after");
    assert!(matches!(
        interp.registry().id_of("before"),
        Err(ExecError::NotFound(_))
    ));

    let desc = ProgramDesc::new().op(traced(0, &[], &["after"]));
    let program = interp.compile(&desc, &[], &["after"]).unwrap();
    assert_eq!(program.fetches().get("after"), Some(&id));
}

#[test]
fn test_store_clear_detaches_all() {
    let (interp, _) = interpreter();
    interp
        .compile(&program_with_vars(&["a", "b"]).op(traced(0, &["a"], &["b"])), &[], &[])
        .unwrap();
    assert_eq!(interp.registry().len(), 2);

    interp.scope().clear();

    assert!(interp.registry().is_empty());
    assert_eq!(interp.registry().issued(), 2);
    assert!(interp.registry().entries().is_empty());
}

#[test]
fn test_never_issued_id_is_a_precondition_violation() {
    let (interp, _) = interpreter();
    let err = interp
        .registry()
        .get(opgraph_exec::VarId::new(99))
        .unwrap_err();
    assert!(matches!(err, ExecError::PreconditionViolation(_)));
}

#[test]
fn test_reject_policy_refuses_recompilation() {
    let config = test_config().registration(DuplicatePolicy::Reject);
    let (interp, _) = interpreter_with(config);
    let desc = program_with_vars(&["a"]).op(traced(0, &[], &["a"]));

    interp.compile(&desc, &[], &["a"]).unwrap();
    let err = interp.compile(&desc, &[], &["a"]).unwrap_err();

    assert!(matches!(err, ExecError::PreconditionViolation(_)));
    assert!(err.to_string().contains("already registered"));
}
