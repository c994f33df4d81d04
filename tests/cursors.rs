//! Cursor navigation and forwarding across rewrite chains.

mod common;

use common::*;
use exo_core::{CursorKind, SchedError};

#[test]
fn navigation_round_trips() {
    let p = rank_k_reduce_6x16();
    let i_loop = p.find("for i in _: _").unwrap();
    assert_eq!(i_loop.kind(), CursorKind::Stmt);

    let j_loop = p.find("for j in _: _").unwrap();
    assert_eq!(j_loop.parent().unwrap().to_text().unwrap(), i_loop.to_text().unwrap());

    let gap = i_loop.before().unwrap();
    assert_eq!(gap.kind(), CursorKind::Gap);
    let back = gap.after().unwrap();
    assert_eq!(back.to_text().unwrap(), i_loop.to_text().unwrap());

    let block = i_loop.as_block().unwrap();
    assert_eq!(block.kind(), CursorKind::Block);
    assert_eq!(block.len().unwrap(), 1);
    assert_eq!(block.get(0).unwrap().to_text().unwrap(), i_loop.to_text().unwrap());
}

#[test]
fn navigation_out_of_bounds_is_an_error() {
    let p = rank_k_reduce_6x16();
    let i_loop = p.find("for i in _: _").unwrap();
    // the i-loop is the only statement of the body
    assert!(matches!(
        i_loop.next(1),
        Err(SchedError::InvalidCursor(_))
    ));
    assert!(matches!(
        i_loop.parent(),
        Err(SchedError::InvalidCursor(_))
    ));
}

#[test]
fn cursors_forward_through_rewrites() {
    let p = idempotent_loop();
    let loop_cursor = p.find("for i in _: _").unwrap();

    // insert a pass ahead of the loop: the cursor shifts by one
    let gap = p.find("x : _").unwrap().before().unwrap();
    let p2 = p.insert_pass(&gap).unwrap();
    let moved = p2.forward(&loop_cursor).unwrap();
    assert_eq!(moved.to_text().unwrap(), loop_cursor.to_text().unwrap());

    // a second rewrite composes with the first
    let p3 = p2.delete_pass().unwrap();
    let back = p3.forward(&loop_cursor).unwrap();
    assert_eq!(back.to_text().unwrap(), loop_cursor.to_text().unwrap());
    // the forwarded position agrees with a fresh pattern search
    assert_eq!(
        back.to_text().unwrap(),
        p3.find("for i in _: _").unwrap().to_text().unwrap()
    );
}

#[test]
fn deleted_positions_invalidate() {
    let p = idempotent_loop();
    let gap = p.find("x : _").unwrap().before().unwrap();
    let p2 = p.insert_pass(&gap).unwrap();
    let pass_cursor = p2.find("_").unwrap();
    let p3 = p2.delete_pass().unwrap();
    assert!(matches!(
        p3.forward(&pass_cursor),
        Err(SchedError::InvalidCursor(_))
    ));
}

#[test]
fn foreign_cursors_are_rejected() {
    let p = idempotent_loop();
    let q = rank_k_reduce_6x16();
    let c = q.find("for i in _: _").unwrap();
    assert!(matches!(p.forward(&c), Err(SchedError::InvalidCursor(_))));
}

#[test]
fn provenance_equivalence() {
    let p = idempotent_loop();
    let p2 = p.remove_loop("for i in _: _").unwrap();
    assert!(p.eqv(&p2));
    assert!(p2.eqv(&p));
    assert!(!p.eqv(&rank_k_reduce_6x16()));
}

#[test]
fn divided_loop_body_forwards_into_the_nest() {
    let p = rank_k_reduce_6x16();
    let reduce_stmt = p.find("C[_] += _").unwrap();
    let p2 = p
        .divide_loop("k", 2, ("ko", "ki"), "guard", false)
        .unwrap();
    let fwd = p2.forward(&reduce_stmt).unwrap();
    // the statement still renders as a reduction into C
    assert!(fwd.to_text().unwrap().starts_with("C["));
}
