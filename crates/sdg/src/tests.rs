use ir::{Location, LocationKind, Module};
use pta::PointerAnalysis;

use crate::{DataflowFlags, DgNodeKind, SystemDependenceGraph};

fn build_sdg(src: &str) -> (Module, SystemDependenceGraph) {
    let module = Module::parse(src).unwrap();
    module.verify().unwrap();
    let mut pa = PointerAnalysis::build(&module, "main").unwrap();
    pa.run().unwrap();
    let (sdg, _) = crate::build(&module, &pa, DataflowFlags::default());
    check_mirrors(&sdg);
    (module, sdg)
}

/// The mirror invariants: every forward edge has its reverse and vice versa.
fn check_mirrors(sdg: &SystemDependenceGraph) {
    for (a, row) in &sdg.edges.data {
        for b in row {
            assert!(sdg.edges.rev_data.contains(b, a), "data edge {a:?} -> {b:?} not mirrored");
        }
    }
    for (b, row) in &sdg.edges.rev_data {
        for a in row {
            assert!(sdg.edges.data.contains(a, b), "rev data edge {b:?} -> {a:?} not mirrored");
        }
    }
    for (a, row) in &sdg.edges.block_control {
        for b in row {
            assert!(
                sdg.edges.rev_block_control.contains(b, a),
                "control edge {a:?} -> {b:?} not mirrored"
            );
        }
    }
    for (b, row) in &sdg.edges.rev_block_control {
        for a in row {
            assert!(
                sdg.edges.block_control.contains(a, b),
                "rev control edge {b:?} -> {a:?} not mirrored"
            );
        }
    }
}

fn loc_inst(bb: usize, idx: usize) -> Location {
    Location { block: bb.into(), kind: LocationKind::Instruction(idx.into()) }
}

#[test]
fn diamond_control_dependence() {
    let (module, sdg) = build_sdg(
        r#"
    {
    func @main(%0 : i1) -> i32 {
    bb0:
        br %0, bb1, bb2;
    bb1:
        goto bb3;
    bb2:
        goto bb3;
    bb3:
        ret [i32 0];
    }
    }"#,
    );
    let main = module.function_by_name("main").unwrap();
    let graph = sdg.graph_of(main).unwrap();
    let blocks = &sdg.graphs[graph].blocks;

    // both arms are control-dependent on the branch block, the join is not
    assert!(sdg.edges.block_control.contains(blocks[0], blocks[1]));
    assert!(sdg.edges.block_control.contains(blocks[0], blocks[2]));
    assert!(!sdg.edges.block_control.contains(blocks[0], blocks[3]));

    // the post-dominator of the branch is the join
    assert_eq!(sdg.blocks[blocks[0]].ipdom(), Some(blocks[3]));
    assert_eq!(sdg.blocks[blocks[1]].ipdom(), Some(blocks[3]));
    assert_eq!(sdg.blocks[blocks[2]].ipdom(), Some(blocks[3]));
}

#[test]
fn loop_condition_controls_body() {
    let (module, sdg) = build_sdg(
        r#"
    {
    func @main(%0 : i1) -> i32 {
    bb0:
        goto bb1;
    bb1:
        br %0, bb2, bb3;
    bb2:
        goto bb1;
    bb3:
        ret [i32 0];
    }
    }"#,
    );
    let main = module.function_by_name("main").unwrap();
    let graph = sdg.graph_of(main).unwrap();
    let blocks = &sdg.graphs[graph].blocks;

    assert!(sdg.edges.block_control.contains(blocks[1], blocks[2]));
    assert!(!sdg.edges.block_control.contains(blocks[1], blocks[3]));
    assert_eq!(sdg.blocks[blocks[2]].ipdom(), Some(blocks[1]));
    assert_eq!(sdg.blocks[blocks[1]].ipdom(), Some(blocks[3]));
}

#[test]
fn synthetic_exit_roots_the_postdom_tree() {
    let (module, sdg) = build_sdg(
        r#"
    {
    func @main(%0 : i1) -> i32 {
    bb0:
        br %0, bb1, bb2;
    bb1:
        ret [i32 1];
    bb2:
        ret [i32 2];
    }
    }"#,
    );
    let main = module.function_by_name("main").unwrap();
    let graph = sdg.graph_of(main).unwrap();

    let exit = sdg.graphs[graph].exit_block.unwrap();
    assert_eq!(sdg.blocks[exit].block, None);
    assert_eq!(sdg.blocks[exit].predecessors.len(), 2);

    let blocks = &sdg.graphs[graph].blocks;
    assert_eq!(sdg.blocks[blocks[0]].ipdom(), Some(exit));
    assert!(sdg.edges.block_control.contains(blocks[0], blocks[1]));
    assert!(sdg.edges.block_control.contains(blocks[0], blocks[2]));
}

#[test]
fn store_load_data_dependence() {
    let (module, sdg) = build_sdg(
        r#"
    {
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        store [i32 1, %0];
        let %1 := load.i32 [%0];
        ret [%1];
    }
    }"#,
    );
    let main = module.function_by_name("main").unwrap();

    let store = sdg.node_of(main, loc_inst(0, 1)).unwrap();
    let load = sdg.node_of(main, loc_inst(0, 2)).unwrap();
    assert!(sdg.edges.data.contains(store, load), "store must reach the load");

    // the alloc feeds both the store and the load through its value
    let alloc = sdg.node_of(main, loc_inst(0, 0)).unwrap();
    assert!(sdg.edges.data.contains(alloc, store));
    assert!(sdg.edges.data.contains(alloc, load));

    // the returned value depends on the load
    let term = sdg
        .node_of(main, Location { block: 0usize.into(), kind: LocationKind::Terminator })
        .unwrap();
    assert!(sdg.edges.data.contains(load, term));
}

#[test]
fn strong_update_kills_previous_store() {
    let (module, sdg) = build_sdg(
        r#"
    {
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        store [i32 1, %0];
        store [i32 2, %0];
        let %1 := load.i32 [%0];
        ret [%1];
    }
    }"#,
    );
    let main = module.function_by_name("main").unwrap();

    let first = sdg.node_of(main, loc_inst(0, 1)).unwrap();
    let second = sdg.node_of(main, loc_inst(0, 2)).unwrap();
    let load = sdg.node_of(main, loc_inst(0, 3)).unwrap();

    assert!(sdg.edges.data.contains(second, load));
    assert!(!sdg.edges.data.contains(first, load), "the overwritten store must be killed");
}

#[test]
fn call_links_actuals_formals_and_returns() {
    let (module, sdg) = build_sdg(
        r#"
    {
    func @id(%0 : i32) -> i32 {
    bb0:
        ret [%0];
    }
    func @main() -> i32 {
    bb0:
        let %0 := call.i32 [@id, i32 7];
        ret [%0];
    }
    }"#,
    );
    let main = module.function_by_name("main").unwrap();
    let id = module.function_by_name("id").unwrap();
    let id_graph = sdg.graph_of(id).unwrap();

    let call = sdg.node_of(main, loc_inst(0, 0)).unwrap();
    let (actual_in, actual_out) = match &sdg.nodes[call].kind {
        DgNodeKind::Call(data) => (data.params.input.clone(), data.params.output.unwrap()),
        other => panic!("expected a call node, got {other:?}"),
    };

    let formal_in = sdg.graphs[id_graph].params.input[0];
    let formal_out = sdg.graphs[id_graph].params.output.unwrap();

    // actual-in -> formal-in
    assert!(sdg.edges.data.contains(actual_in[0], formal_in));
    // return terminator -> formal-out -> actual-out -> call
    let ret = sdg
        .node_of(id, Location { block: 0usize.into(), kind: LocationKind::Terminator })
        .unwrap();
    assert!(sdg.edges.data.contains(ret, formal_out));
    assert!(sdg.edges.data.contains(formal_out, actual_out));
    assert!(sdg.edges.data.contains(actual_out, call));

    // the formal-in feeds the use of the parameter inside the callee
    assert!(sdg.edges.data.contains(formal_in, ret));

    // call -> callee entry control edge
    let entry = sdg.graphs[id_graph].entry_node;
    assert!(sdg.edges.control.contains(call, entry));
}

#[test]
fn isolating_a_self_loop_block_reconnects_neighbours() {
    // bb1 has a self-loop and two other successors
    let (module, mut sdg) = build_sdg(
        r#"
    {
    func @main(%0 : i32) -> i32 {
    bb0:
        goto bb1;
    bb1:
        switch %0, [bb1, bb2], bb3;
    bb2:
        ret [i32 2];
    bb3:
        ret [i32 3];
    }
    }"#,
    );
    let main = module.function_by_name("main").unwrap();
    let graph = sdg.graph_of(main).unwrap();
    let blocks = sdg.graphs[graph].blocks.clone();

    sdg.isolate_block(blocks[1]);

    // no edges of any kind remain on the isolated block
    assert!(sdg.blocks[blocks[1]].successors.is_empty());
    assert!(sdg.blocks[blocks[1]].predecessors.is_empty());
    assert!(sdg.edges.rev_block_control.iter(blocks[1]).next().is_none());
    assert!(sdg.edges.block_control.iter(blocks[1]).next().is_none());

    // the predecessor reaches the non-self successors directly, keeping its
    // own label
    let succs = &sdg.blocks[blocks[0]].successors;
    assert!(succs.contains(&(blocks[2], 0)));
    assert!(succs.contains(&(blocks[3], 0)));
    assert!(!succs.iter().any(|(target, _)| *target == blocks[1]));
    assert!(sdg.blocks[blocks[2]].predecessors.contains(&blocks[0]));
    assert!(sdg.blocks[blocks[3]].predecessors.contains(&blocks[0]));
}
