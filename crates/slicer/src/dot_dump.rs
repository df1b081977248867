//! Dot rendering of the SDG: either every node with its data and control
//! edges, or basic blocks only with CFG and control edges.

use ir::{LocationKind, Module};
use sdg::{DgBlockId, DgNode, SystemDependenceGraph};

#[derive(Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Data,
    Control,
    Cfg,
}

type Edge<N> = (N, N, EdgeKind);

struct NodeGraph<'a> {
    module: &'a Module,
    sdg: &'a SystemDependenceGraph,
}

impl<'a> dot::Labeller<'a, DgNode, Edge<DgNode>> for NodeGraph<'a> {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new("sdg").unwrap()
    }

    fn node_id(&'a self, n: &DgNode) -> dot::Id<'a> {
        dot::Id::new(format!("{n:?}")).unwrap()
    }

    fn node_label(&'a self, n: &DgNode) -> dot::LabelText<'a> {
        let data = &self.sdg.nodes[*n];
        let func = &self.module.functions[self.sdg.graphs[data.graph].func].name;
        let what = match data.loc {
            Some(loc) => match loc.kind {
                LocationKind::Phi(idx) => format!("{:?} {idx:?}", loc.block),
                LocationKind::Instruction(idx) => format!("{:?} {idx:?}", loc.block),
                LocationKind::Terminator => format!("{:?} terminator", loc.block),
            },
            None => match &data.kind {
                sdg::DgNodeKind::Entry => "entry".to_owned(),
                sdg::DgNodeKind::Argument(kind) => format!("{kind:?}"),
                _ => "node".to_owned(),
            },
        };
        dot::LabelText::label(format!("{func}: {what}"))
    }

    fn edge_style(&'a self, e: &Edge<DgNode>) -> dot::Style {
        match e.2 {
            EdgeKind::Data => dot::Style::Solid,
            EdgeKind::Control => dot::Style::Dashed,
            EdgeKind::Cfg => dot::Style::Dotted,
        }
    }
}

impl<'a> dot::GraphWalk<'a, DgNode, Edge<DgNode>> for NodeGraph<'a> {
    fn nodes(&'a self) -> dot::Nodes<'a, DgNode> {
        self.sdg.nodes.keys().collect::<Vec<_>>().into()
    }

    fn edges(&'a self) -> dot::Edges<'a, Edge<DgNode>> {
        let mut edges = Vec::new();
        for (def, row) in &self.sdg.edges.data {
            for use_ in row {
                edges.push((def, use_, EdgeKind::Data));
            }
        }
        for (controller, row) in &self.sdg.edges.control {
            for dependent in row {
                edges.push((controller, dependent, EdgeKind::Control));
            }
        }
        edges.into()
    }

    fn source(&'a self, edge: &Edge<DgNode>) -> DgNode {
        edge.0
    }

    fn target(&'a self, edge: &Edge<DgNode>) -> DgNode {
        edge.1
    }
}

struct BlockGraph<'a> {
    module: &'a Module,
    sdg: &'a SystemDependenceGraph,
}

impl<'a> dot::Labeller<'a, DgBlockId, Edge<DgBlockId>> for BlockGraph<'a> {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new("sdg_blocks").unwrap()
    }

    fn node_id(&'a self, n: &DgBlockId) -> dot::Id<'a> {
        dot::Id::new(format!("{n:?}")).unwrap()
    }

    fn node_label(&'a self, n: &DgBlockId) -> dot::LabelText<'a> {
        let data = &self.sdg.blocks[*n];
        let func = &self.module.functions[self.sdg.graphs[data.graph].func].name;
        let what = match data.block {
            Some(bb) => format!("{bb:?}"),
            None => "exit".to_owned(),
        };
        dot::LabelText::label(format!("{func}: {what}"))
    }

    fn edge_style(&'a self, e: &Edge<DgBlockId>) -> dot::Style {
        match e.2 {
            EdgeKind::Data => dot::Style::Solid,
            EdgeKind::Control => dot::Style::Dashed,
            EdgeKind::Cfg => dot::Style::Dotted,
        }
    }
}

impl<'a> dot::GraphWalk<'a, DgBlockId, Edge<DgBlockId>> for BlockGraph<'a> {
    fn nodes(&'a self) -> dot::Nodes<'a, DgBlockId> {
        self.sdg.blocks.keys().collect::<Vec<_>>().into()
    }

    fn edges(&'a self) -> dot::Edges<'a, Edge<DgBlockId>> {
        let mut edges = Vec::new();
        for (block, data) in self.sdg.blocks.iter_enumerated() {
            for &(succ, _) in &data.successors {
                edges.push((block, succ, EdgeKind::Cfg));
            }
        }
        for (controller, row) in &self.sdg.edges.block_control {
            for dependent in row {
                edges.push((controller, dependent, EdgeKind::Control));
            }
        }
        edges.into()
    }

    fn source(&'a self, edge: &Edge<DgBlockId>) -> DgBlockId {
        edge.0
    }

    fn target(&'a self, edge: &Edge<DgBlockId>) -> DgBlockId {
        edge.1
    }
}

pub(crate) fn render(module: &Module, sdg: &SystemDependenceGraph, bb_only: bool) -> String {
    let mut out = Vec::new();
    if bb_only {
        dot::render(&BlockGraph { module, sdg }, &mut out).expect("writing to a Vec cannot fail");
    } else {
        dot::render(&NodeGraph { module, sdg }, &mut out).expect("writing to a Vec cannot fail");
    }
    String::from_utf8(out).expect("dot output is ascii")
}
