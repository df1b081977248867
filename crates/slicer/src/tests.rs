use expect_test::expect;
use ir::{Module, Op, Terminator};

use crate::{run, ModuleStats, Opts, Report};

fn slice_with(src: &str, opts: Opts) -> (Module, Report) {
    let mut module = Module::parse(src).unwrap();
    module.verify().unwrap();
    let report = run(&mut module, &opts).unwrap();
    if let Some(err) = &report.verify_error {
        panic!("sliced module failed verification:\n{err}\n{}", module.print());
    }
    (module, report)
}

fn slice(src: &str, criteria: &str) -> (Module, Report) {
    slice_with(src, Opts { criteria: criteria.to_owned(), ..Opts::default() })
}

fn count_ops(module: &Module, pred: impl Fn(&Op) -> bool) -> usize {
    module
        .functions
        .iter()
        .flat_map(|func| func.blocks.iter())
        .flat_map(|block| block.instructions.iter())
        .filter(|inst| pred(&inst.op))
        .count()
}

fn has_conditional_branch(module: &Module) -> bool {
    module.functions.iter().flat_map(|func| func.blocks.iter()).any(|block| {
        matches!(
            block.terminator,
            Some(Terminator::Br { .. }) | Some(Terminator::Switch { .. })
        )
    })
}

#[test]
fn straight_line_slice_keeps_everything() {
    let (_, report) = slice(
        r#"
    {
    decl @print(i32) -> void;
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        let %1 := alloc [i32]; !name "b";
        let %2 := alloc [i32]; !name "c";
        store [i32 1, %0]; !line 1;
        store [i32 2, %1]; !line 2;
        let %3 := load.i32 [%0]; !line 3;
        let %4 := load.i32 [%1]; !line 3;
        let %5 := add [%3, %4]; !line 3;
        store [%5, %2]; !line 3;
        let %6 := load.i32 [%2]; !line 4;
        call.void [@print, %6]; !line 4;
        ret [i32 0];
    }
    }"#,
        "print",
    );

    // every instruction feeds the criterion; nothing may disappear
    assert_eq!(report.stats_after, Some(report.stats_before));
}

#[test]
fn dead_branch_is_removed() {
    let (module, _) = slice(
        r#"
    {
    decl @print(i32) -> void;
    func @main(%0 : i1) -> i32 {
    bb0:
        let %1 := alloc [i32]; !name "x";
        br %0, bb1, bb2;
    bb1:
        store [i32 1, %1];
        goto bb3;
    bb2:
        store [i32 2, %1];
        goto bb3;
    bb3:
        call.void [@print, i32 0];
        ret [i32 0];
    }
    }"#,
        "print",
    );

    // the criterion ignores x, so both branches and the condition go away
    assert!(!has_conditional_branch(&module));
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Store)), 0);

    let expected = expect![[r#"
        {
        decl @print(i32) -> void;
        func @main(%0 : i1) -> i32 {
        bb0:
            goto bb1;
        bb1:
            call.void [@print, i32 0];
            ret [i32 0];
        }
        }"#]];
    expected.assert_eq(&module.print());
}

#[test]
fn pointer_alias_keeps_the_store() {
    let (module, report) = slice(
        r#"
    {
    decl @use(i32) -> void;
    func @main(%0 : i1) -> i32 {
    bb0:
        let %1 := alloc [i32]; !name "a";
        let %2 := alloc [i32]; !name "b";
        br %0, bb1, bb2;
    bb1:
        goto bb3;
    bb2:
        goto bb3;
    bb3:
        phi %3 : *i32 := [(bb1, %1), (bb2, %2)];
        store [i32 7, %3]; !line 5;
        let %4 := load.i32 [%1]; !line 6;
        call.void [@use, %4]; !line 6;
        ret [i32 0];
    }
    }"#,
        "use",
    );

    // `*p = 7` may write `a`, so the store, the phi, both allocs and the
    // branch all stay
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Store)), 1);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Alloc(_))), 2);
    assert!(has_conditional_branch(&module));
    assert_eq!(report.stats_after, Some(report.stats_before));
}

#[test]
fn recursive_call_keeps_the_cycle() {
    let (module, _) = slice(
        r#"
    {
    func @fact(%0 : i32) -> i32 {
    bb0:
        let %1 := cmp [%0, i32 1];
        br %1, bb1, bb2;
    bb1:
        ret [i32 1];
    bb2:
        let %2 := sub [%0, i32 1];
        let %3 := call.i32 [@fact, %2];
        let %4 := mul [%0, %3];
        ret [%4];
    }
    func @main() -> i32 {
    bb0:
        let %0 := call.i32 [@fact, i32 5];
        ret [%0];
    }
    }"#,
        "ret",
    );

    // the recursion forms a cycle in the SDG; marking terminates and the
    // whole body survives
    let fact = module.function_by_name("fact").unwrap();
    let fact = &module.functions[fact];
    assert!(!fact.is_declaration());
    assert_eq!(fact.blocks.len(), 3);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Call(_))), 2);
    assert!(has_conditional_branch(&module));
}

#[test]
fn function_pointer_targets_survive() {
    let (module, _) = slice(
        r#"
    {
    decl @use(i32) -> void;
    func @f(%0 : *i32) -> void {
    bb0:
        store [i32 1, %0];
        ret;
    }
    func @g(%0 : *i32) -> void {
    bb0:
        ret;
    }
    func @main(%0 : i1) -> i32 {
    bb0:
        let %1 := alloc [i32]; !name "x";
        br %0, bb1, bb2;
    bb1:
        goto bb3;
    bb2:
        goto bb3;
    bb3:
        phi %2 : *i8 := [(bb1, @f), (bb2, @g)];
        call.void [%2, %1];
        let %3 := load.i32 [%1]; !line 9;
        call.void [@use, %3]; !line 9;
        ret [i32 0];
    }
    }"#,
        "use",
    );

    // f may write x through the alias, so the indirect call and both
    // possible targets stay callable
    let f = module.function_by_name("f").unwrap();
    let g = module.function_by_name("g").unwrap();
    assert!(!module.functions[f].is_declaration());
    assert!(!module.functions[g].is_declaration());

    let f = &module.functions[f];
    let has_store = f
        .blocks
        .iter()
        .flat_map(|block| block.instructions.iter())
        .any(|inst| matches!(inst.op, Op::Store));
    assert!(has_store, "the aliasing store in @f must survive");
}

#[test]
fn line_variable_criterion_matches_stores() {
    let (module, _) = slice(
        r#"
    {
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        let %1 := alloc [i32]; !name "b";
        store [i32 1, %0]; !line 3;
        store [i32 2, %1]; !line 4;
        ret [i32 0];
    }
    }"#,
        "3:a",
    );

    // only the store of `a` (and its alloc) is in the slice
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Store)), 1);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Alloc(_))), 1);
}

#[test]
fn secondary_criteria_extend_the_slice() {
    let src = r#"
    {
    decl @log(i32) -> void;
    decl @print(i32) -> void;
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        store [i32 1, %0];
        let %1 := load.i32 [%0];
        call.void [@log, %1];
        call.void [@print, i32 0];
        ret [i32 0];
    }
    }"#;

    // without the secondary criterion the whole `a` chain is dead code
    let (module, _) = slice(src, "print");
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Call(_))), 1);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Load(_))), 0);

    // the secondary criterion pulls the earlier `log` call and its inputs in
    let (module, _) = slice_with(
        src,
        Opts {
            criteria: "print".to_owned(),
            secondary_criteria: "log".to_owned(),
            ..Opts::default()
        },
    );
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Call(_))), 2);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Load(_))), 1);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Store)), 1);
}

#[test]
fn criterion_miss_emits_an_empty_entry() {
    let (module, report) = slice(
        r#"
    {
    decl @print(i32) -> void;
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32];
        store [i32 1, %0];
        ret [i32 0];
    }
    }"#,
        "nosuchthing",
    );

    assert!(report.criterion_missed);
    let expected = expect![[r#"
        {
        func @main() -> i32 {
        bb0:
            ret [i32 0];
        }
        }"#]];
    expected.assert_eq(&module.print());
}

#[test]
fn remove_unused_only_drops_dead_functions() {
    let src = r#"
    {
    global @unused : i32 = i32 1;
    func @dead() -> void {
    bb0:
        ret;
    }
    func @main() -> i32 {
    bb0:
        ret [i32 0];
    }
    }"#;
    let (module, report) = slice_with(
        src,
        Opts { remove_unused_only: true, ..Opts::default() },
    );

    assert!(module.function_by_name("dead").is_none());
    assert!(module.global_by_name("unused").is_none());
    assert_eq!(
        report.stats_after,
        Some(ModuleStats { globals: 0, functions: 1, blocks: 1, instructions: 1 })
    );
}

#[test]
fn forward_slice_marks_dependents() {
    let (module, _) = slice_with(
        r#"
    {
    decl @print(i32) -> void;
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        let %1 := alloc [i32]; !name "b";
        store [i32 1, %0]; !line 2;
        let %2 := load.i32 [%0]; !line 3;
        call.void [@print, %2]; !line 4;
        store [i32 5, %1]; !line 5;
        ret [i32 0];
    }
    }"#,
        Opts { criteria: "2:a".to_owned(), forward: true, ..Opts::default() },
    );

    // forward from the store of `a`: its load and the print survive, the
    // unrelated store of `b` does not
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Load(_))), 1);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Store)), 1);
    assert_eq!(count_ops(&module, |op| matches!(op, Op::Call(_))), 1);
}

#[test]
fn annotate_and_dot_are_emitted() {
    let (_, report) = slice_with(
        r#"
    {
    func @main() -> i32 {
    bb0:
        let %0 := alloc [i32]; !name "a";
        store [i32 1, %0]; !line 3;
        let %1 := load.i32 [%0]; !line 4;
        ret [%1];
    }
    }"#,
        Opts {
            criteria: "4:a".to_owned(),
            annotate: crate::AnnotationOpts::parse("dd,pta,slice"),
            dump_dg: true,
            ..Opts::default()
        },
    );

    let annotated = report.annotated.expect("annotated listing requested");
    assert!(annotated.contains("; dd:"));
    assert!(annotated.contains("; pta:"));

    let dot = report.dot.expect("dot dump requested");
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("main"));
}
