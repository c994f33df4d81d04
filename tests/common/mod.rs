//! Shared kernel builders for the integration tests.
//!
//! The surface parser is out of scope for this crate, so tests construct
//! their starting procedures through the IR builder.
#![allow(dead_code)]

use exo_core::ir::build::*;
use exo_core::ir::{LoopType, Proc, ProcArg, SrcInfo, Sym, SymGen};
use exo_core::Procedure;

pub fn arg(name: &Sym, ty: LoopType) -> ProcArg {
    ProcArg {
        name: name.clone(),
        ty,
        mem: None,
        srcinfo: SrcInfo::default(),
    }
}

/// `for i in seq(0, N): for j in seq(0, M): C[i, j] += A[i] * B[j]`
pub fn outer_product() -> Procedure {
    let mut r#gen = SymGen::starting_at(1);
    let n = r#gen.fresh("N");
    let m = r#gen.fresh("M");
    let a = r#gen.fresh("A");
    let b = r#gen.fresh("B");
    let c = r#gen.fresh("C");
    let i = r#gen.fresh("i");
    let j = r#gen.fresh("j");
    let proc = Proc {
        name: "outer_product".to_string(),
        args: vec![
            arg(&n, LoopType::Size),
            arg(&m, LoopType::Size),
            arg(&a, tensor(LoopType::F32, vec![read(&n, LoopType::Size)])),
            arg(&b, tensor(LoopType::F32, vec![read(&m, LoopType::Size)])),
            arg(
                &c,
                tensor(
                    LoopType::F32,
                    vec![read(&n, LoopType::Size), read(&m, LoopType::Size)],
                ),
            ),
        ],
        preds: vec![],
        body: vec![seq_for(
            &i,
            read(&n, LoopType::Size),
            vec![seq_for(
                &j,
                read(&m, LoopType::Size),
                vec![reduce(
                    &c,
                    LoopType::F32,
                    vec![read(&i, LoopType::Index), read(&j, LoopType::Index)],
                    mul(
                        read_idx(&a, LoopType::F32, vec![read(&i, LoopType::Index)]),
                        read_idx(&b, LoopType::F32, vec![read(&j, LoopType::Index)]),
                    ),
                )],
            )],
        )],
        instr: None,
        srcinfo: SrcInfo::default(),
    };
    Procedure::from_ir(proc)
}

/// The 6×16 rank-k reduce kernel:
/// `for i in seq(0, 6): for j in seq(0, 16): for k in seq(0, K):`
/// `    C[i, j] += A[i, k] * B[k, j]`
pub fn rank_k_reduce_6x16() -> Procedure {
    let mut r#gen = SymGen::starting_at(1);
    let kk = r#gen.fresh("K");
    let a = r#gen.fresh("A");
    let b = r#gen.fresh("B");
    let c = r#gen.fresh("C");
    let i = r#gen.fresh("i");
    let j = r#gen.fresh("j");
    let k = r#gen.fresh("k");
    let proc = Proc {
        name: "rank_k_reduce_6x16".to_string(),
        args: vec![
            arg(&kk, LoopType::Size),
            arg(
                &a,
                tensor(LoopType::F32, vec![int(6), read(&kk, LoopType::Size)]),
            ),
            arg(
                &b,
                tensor(LoopType::F32, vec![read(&kk, LoopType::Size), int(16)]),
            ),
            arg(&c, tensor(LoopType::F32, vec![int(6), int(16)])),
        ],
        preds: vec![],
        body: vec![seq_for(
            &i,
            int(6),
            vec![seq_for(
                &j,
                int(16),
                vec![seq_for(
                    &k,
                    read(&kk, LoopType::Size),
                    vec![reduce(
                        &c,
                        LoopType::F32,
                        vec![read(&i, LoopType::Index), read(&j, LoopType::Index)],
                        mul(
                            read_idx(
                                &a,
                                LoopType::F32,
                                vec![read(&i, LoopType::Index), read(&k, LoopType::Index)],
                            ),
                            read_idx(
                                &b,
                                LoopType::F32,
                                vec![read(&k, LoopType::Index), read(&j, LoopType::Index)],
                            ),
                        ),
                    )],
                )],
            )],
        )],
        instr: None,
        srcinfo: SrcInfo::default(),
    };
    Procedure::from_ir(proc)
}

/// `vadd4(A, B, C): for k in seq(0, 4): C[k] = A[k] + B[k]`
pub fn vadd4() -> Procedure {
    let mut r#gen = SymGen::starting_at(1);
    let a = r#gen.fresh("A");
    let b = r#gen.fresh("B");
    let c = r#gen.fresh("C");
    let k = r#gen.fresh("k");
    let vec4 = |s: &Sym| arg(s, tensor(LoopType::F32, vec![int(4)]));
    Procedure::from_ir(Proc {
        name: "vadd4".to_string(),
        args: vec![vec4(&a), vec4(&b), vec4(&c)],
        preds: vec![],
        body: vec![seq_for(
            &k,
            int(4),
            vec![assign(
                &c,
                LoopType::F32,
                vec![read(&k, LoopType::Index)],
                add(
                    read_idx(&a, LoopType::F32, vec![read(&k, LoopType::Index)]),
                    read_idx(&b, LoopType::F32, vec![read(&k, LoopType::Index)]),
                ),
            )],
        )],
        instr: None,
        srcinfo: SrcInfo::default(),
    })
}

/// `for t in seq(0, 4): Z[t] = X[t] + Y[t]` over three length-4 buffers.
pub fn vadd_block() -> Procedure {
    let mut r#gen = SymGen::starting_at(1);
    let x = r#gen.fresh("X");
    let y = r#gen.fresh("Y");
    let z = r#gen.fresh("Z");
    let t = r#gen.fresh("t");
    let vec4 = |s: &Sym| arg(s, tensor(LoopType::F32, vec![int(4)]));
    Procedure::from_ir(Proc {
        name: "caller".to_string(),
        args: vec![vec4(&x), vec4(&y), vec4(&z)],
        preds: vec![],
        body: vec![seq_for(
            &t,
            int(4),
            vec![assign(
                &z,
                LoopType::F32,
                vec![read(&t, LoopType::Index)],
                add(
                    read_idx(&x, LoopType::F32, vec![read(&t, LoopType::Index)]),
                    read_idx(&y, LoopType::F32, vec![read(&t, LoopType::Index)]),
                ),
            )],
        )],
        instr: None,
        srcinfo: SrcInfo::default(),
    })
}

/// `for i in seq(0, n): x = 0.0`
pub fn idempotent_loop() -> Procedure {
    let mut r#gen = SymGen::starting_at(1);
    let n = r#gen.fresh("n");
    let x = r#gen.fresh("x");
    let i = r#gen.fresh("i");
    Procedure::from_ir(Proc {
        name: "zero_scalar".to_string(),
        args: vec![arg(&n, LoopType::Size)],
        preds: vec![],
        body: vec![
            alloc(&x, LoopType::R),
            seq_for(
                &i,
                read(&n, LoopType::Size),
                vec![assign(&x, LoopType::R, vec![], float(0.0))],
            ),
        ],
        instr: None,
        srcinfo: SrcInfo::default(),
    })
}
