use ir::Module;

use crate::{validate, PgNodeKind, Pointer, PointerAnalysis};

fn parsed(src: &str) -> Module {
    Module::parse(src).unwrap()
}

fn run_on(module: &Module) -> PointerAnalysis<'_> {
    let mut pa = PointerAnalysis::build(module, "main").unwrap();
    pa.run().unwrap();
    let report = validate(pa.graph());
    assert!(report.is_ok(), "{report}");
    pa
}

#[test]
fn alias_through_phi() {
    let module = parsed(
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
        store [i32 7, %3];
        let %4 := load.i32 [%1];
        call.void [@use, %4];
        ret [i32 0];
    }
    }"#,
    );
    let pa = run_on(&module);

    let main = module.function_by_name("main").unwrap();
    let a = pa.node_of_value(main, 1usize.into()).unwrap();
    let b = pa.node_of_value(main, 2usize.into()).unwrap();
    let p = pa.points_to_of_value(main, 3usize.into()).unwrap();

    assert!(p.contains(&Pointer::new(a, 0)));
    assert!(p.contains(&Pointer::new(b, 0)));
    assert_eq!(p.len(), 2);

    assert_eq!(pa.object_name(a), Some("a"));
    assert_eq!(pa.object_name(b), Some("b"));
}

#[test]
fn gep_is_field_sensitive() {
    let module = parsed(
        r#"
    {
    func @main() -> i32 {
    bb0:
        let %0 := alloc [{*i32, *i32}];
        let %1 := alloc [i32]; !name "x";
        let %2 := alloc [i32]; !name "y";
        let %3 := gep [%0, i64 0];
        let %4 := gep [%0, i64 8];
        store [%1, %3];
        store [%2, %4];
        let %5 := load.*i32 [%3];
        let %6 := load.*i32 [%4];
        ret [i32 0];
    }
    }"#,
    );
    let pa = run_on(&module);

    let main = module.function_by_name("main").unwrap();
    let x = pa.node_of_value(main, 1usize.into()).unwrap();
    let y = pa.node_of_value(main, 2usize.into()).unwrap();

    let first = pa.points_to_of_value(main, 5usize.into()).unwrap();
    assert!(first.contains(&Pointer::new(x, 0)));
    assert!(!first.points_to_target(y));

    let second = pa.points_to_of_value(main, 6usize.into()).unwrap();
    assert!(second.contains(&Pointer::new(y, 0)));
    assert!(!second.points_to_target(x));
}

#[test]
fn function_pointer_call_resolves_both_targets() {
    let module = parsed(
        r#"
    {
    func @f() -> *i32 {
    bb0:
        let %0 := alloc [i32]; !name "fa";
        ret [%0];
    }
    func @g() -> *i32 {
    bb0:
        let %0 := alloc [i32]; !name "ga";
        ret [%0];
    }
    func @main(%0 : i1) -> i32 {
    bb0:
        br %0, bb1, bb2;
    bb1:
        goto bb3;
    bb2:
        goto bb3;
    bb3:
        phi %1 : *i8 := [(bb1, @f), (bb2, @g)];
        let %2 := call.*i32 [%1];
        ret [i32 0];
    }
    }"#,
    );
    let pa = run_on(&module);

    let main = module.function_by_name("main").unwrap();
    let f = module.function_by_name("f").unwrap();
    let g = module.function_by_name("g").unwrap();

    let callees = pa.functions_pointed_by(pa.points_to_of_value(main, 1usize.into()).unwrap());
    assert_eq!(callees, vec![f, g]);

    // the returned allocations of both targets flow into the call result
    let result = pa.points_to_of_value(main, 2usize.into()).unwrap();
    let fa = pa.node_of_value(f, 0usize.into()).unwrap();
    let ga = pa.node_of_value(g, 0usize.into()).unwrap();
    assert!(result.contains(&Pointer::new(fa, 0)));
    assert!(result.contains(&Pointer::new(ga, 0)));
}

#[test]
fn recursion_terminates() {
    let module = parsed(
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
    );
    let pa = run_on(&module);
    let fact = module.function_by_name("fact").unwrap();
    assert!(pa.subgraph_of(fact).is_some());
}

#[test]
fn zero_initialized_memory_loads_null() {
    let module = parsed(
        r#"
    {
    global @cache : *i32 = zero;
    func @main() -> i32 {
    bb0:
        let %0 := load.*i32 [@cache];
        ret [i32 0];
    }
    }"#,
    );
    let pa = run_on(&module);
    let main = module.function_by_name("main").unwrap();
    let loaded = pa.points_to_of_value(main, 0usize.into()).unwrap();
    assert!(loaded.contains(&Pointer::new(pa.graph().nullptr, 0)));
}

#[test]
fn malloc_becomes_a_heap_object() {
    let module = parsed(
        r#"
    {
    decl @malloc(i64) -> *i8;
    func @main() -> i32 {
    bb0:
        let %0 := call.*i8 [@malloc, i64 8];
        ret [i32 0];
    }
    }"#,
    );
    let pa = run_on(&module);
    let main = module.function_by_name("main").unwrap();
    let node = pa.node_of_value(main, 0usize.into()).unwrap();
    assert!(matches!(pa.graph().node(node).kind, PgNodeKind::Alloc { heap: true, .. }));
}

#[test]
fn sentinels_stay_immutable() {
    let module = parsed(
        r#"
    {
    func @main() -> i32 {
    bb0:
        let %0 := alloc [*i32];
        store [null, %0];
        let %1 := load.*i32 [%0];
        ret [i32 0];
    }
    }"#,
    );
    let pa = run_on(&module);
    let pg = pa.graph();
    assert_eq!(pg.points_to(pg.nullptr).len(), 1);
    assert!(pg.points_to(pg.nullptr).contains(&Pointer::new(pg.nullptr, 0)));
    assert_eq!(pg.points_to(pg.unknown_memory).len(), 1);

    // the load observes the stored null
    let main = module.function_by_name("main").unwrap();
    let loaded = pa.points_to_of_value(main, 1usize.into()).unwrap();
    assert!(loaded.contains(&Pointer::new(pg.nullptr, 0)));
}
