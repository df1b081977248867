use expect_test::expect;

use crate::{Block, DominatorTree, Func, Module};

#[test]
fn parse_print_round_trip() {
    let src = r#"
    {
    global @g : i32 = i32 0;
    decl @use(i32) -> void;
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        store [i32 1, %0]; !line 3;
        let %1 := load.i32 [%0];
        let %2 := cmp [%1, i32 0];
        br %2, bb1, bb2;
    bb1:
        goto bb3;
    bb2:
        goto bb3;
    bb3:
        phi %3 : i32 := [(bb1, i32 1), (bb2, i32 2)];
        call.void [@use, %3];
        ret [i32 0];
    }
    }"#;

    let module = Module::parse(src).unwrap();
    module.verify().unwrap();

    let printed = module.print();
    let expected = expect![[r#"
        {
        global @g : i32 = i32 0;
        decl @use(i32) -> void;
        func @main() -> i32 {
        bb0:
            let %0 := alloc [i32]; !name "a";
            store [i32 1, %0]; !line 3;
            let %1 := load.i32 [%0];
            let %2 := cmp [%1, i32 0];
            br %2, bb1, bb2;
        bb1:
            goto bb3;
        bb2:
            goto bb3;
        bb3:
            phi %3 : i32 := [(bb1, i32 1), (bb2, i32 2)];
            call.void [@use, %3];
            ret [i32 0];
        }
        }"#]];
    expected.assert_eq(&printed);

    // the printed form parses back to the same text
    let reparsed = Module::parse(&printed).unwrap();
    assert_eq!(reparsed.print(), printed);
}

#[test]
fn parse_rejects_duplicate_function() {
    let src = "{ func @f() -> void { bb0: ret; } func @f() -> void { bb0: ret; } }";
    assert!(Module::parse(src).is_err());
}

#[test]
fn verify_rejects_undefined_value() {
    let src = "{ func @f() -> i32 { bb0: ret [%7]; } }";
    let module = Module::parse(src).unwrap();
    let err = module.verify().unwrap_err();
    assert!(err.errors[0].contains("undefined value"));
}

#[test]
fn verify_rejects_bad_phi() {
    // bb2 is not a predecessor of bb1
    let src = r#"
    {
    func @f(%0 : i1) -> i32 {
    bb0:
        goto bb1;
    bb1:
        phi %1 : i32 := [(bb2, i32 1)];
        ret [%1];
    bb2:
        goto bb1;
    }
    }"#;
    // make bb2 unreachable but structurally present: bb2 -> bb1 makes it a
    // pred, so re-point the phi at bb0 instead
    let src = src.replace("(bb2, i32 1)", "(bb0, i32 1)");
    let module = Module::parse(&src).unwrap();
    let err = module.verify().unwrap_err();
    assert!(err.errors.iter().any(|e| e.contains("misses predecessor")));
}

#[test]
fn dominator_tree_diamond() {
    let src = r#"
    {
    func @f(%0 : i1) -> void {
    bb0:
        br %0, bb1, bb2;
    bb1:
        goto bb3;
    bb2:
        goto bb3;
    bb3:
        ret;
    }
    }"#;
    let module = Module::parse(src).unwrap();
    let func = &module.functions[Func::from(0usize)];
    let tree = DominatorTree::compute(func);

    let bb = |i: usize| Block::from(i);
    assert_eq!(tree.idom(bb(0)), None);
    assert_eq!(tree.idom(bb(1)), Some(bb(0)));
    assert_eq!(tree.idom(bb(2)), Some(bb(0)));
    assert_eq!(tree.idom(bb(3)), Some(bb(0)));
    assert!(tree.dominates(bb(0), bb(3)));
    assert!(!tree.dominates(bb(1), bb(3)));

    assert_eq!(tree.dom_tree_bfs_order()[0], bb(0));
}

#[test]
fn dominator_tree_loop() {
    let src = r#"
    {
    func @f(%0 : i1) -> void {
    bb0:
        goto bb1;
    bb1:
        br %0, bb2, bb3;
    bb2:
        goto bb1;
    bb3:
        ret;
    }
    }"#;
    let module = Module::parse(src).unwrap();
    let func = &module.functions[Func::from(0usize)];
    let tree = DominatorTree::compute(func);

    let bb = |i: usize| Block::from(i);
    assert_eq!(tree.idom(bb(1)), Some(bb(0)));
    assert_eq!(tree.idom(bb(2)), Some(bb(1)));
    assert_eq!(tree.idom(bb(3)), Some(bb(1)));

    let order = tree.dom_tree_bfs_order();
    assert_eq!(order[0], bb(0));
    assert_eq!(order[1], bb(1));
}
