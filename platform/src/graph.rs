use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ops::{Kind, OpLib};
use crate::value::Value;
use common::id_type;

id_type!(NodeId);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node has a nil id")]
    NilNode,
    #[error("Duplicate node id: {node_id}")]
    DuplicateNode { node_id: NodeId },
    #[error("Node {node_id} argument '{arg}' references a node not in the graph")]
    DanglingRef { node_id: NodeId, arg: String },
    #[error("Unknown operator: {op}")]
    UnknownOp { op: String },
    #[error("Operator {op} has no argument named '{arg}'")]
    UnknownArg { op: String, arg: String },
    #[error("Operator {op} is missing required argument '{arg}'")]
    MissingArg { op: String, arg: String },
    #[error("Operator {op} argument '{arg}' expects {expected}, got {found}")]
    KindMismatch {
        op: String,
        arg: String,
        expected: Kind,
        found: Kind,
    },
    #[error("Cycle detected at node {node_id}")]
    CycleDetected { node_id: NodeId },
}

pub type GraphResult<T> = Result<T, GraphError>;

/// One remote operator invocation with named arguments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub op: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<(String, Arg)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Const(Value),
    Node(NodeId),
    /// An ordered list of node references; order is significant for
    /// consumers such as `Collection.fromImages`.
    Nodes(Vec<NodeId>),
}

impl Arg {
    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Arg::Const(value) => Some(value),
            _ => None,
        }
    }
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Arg::Node(node_id) => Some(*node_id),
            _ => None,
        }
    }
    pub fn as_nodes(&self) -> Option<&[NodeId]> {
        match self {
            Arg::Nodes(node_ids) => Some(node_ids),
            _ => None,
        }
    }

    fn referenced(&self) -> &[NodeId] {
        match self {
            Arg::Const(_) => &[],
            Arg::Node(node_id) => std::slice::from_ref(node_id),
            Arg::Nodes(node_ids) => node_ids,
        }
    }
}

// A generic `impl<T: Into<Value>> From<T> for Arg` would collide with the
// reflexive From impl, so the conversions are spelled out.
macro_rules! arg_from_value {
    ($($ty:ty),+) => {
        $(impl From<$ty> for Arg {
            fn from(value: $ty) -> Self {
                Arg::Const(value.into())
            }
        })+
    };
}

arg_from_value!(bool, i32, i64, u32, f64, &str, String, Vec<Value>);

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Const(value)
    }
}

impl From<NodeId> for Arg {
    fn from(node_id: NodeId) -> Self {
        Arg::Node(node_id)
    }
}

/// An accumulated description of remote operations. Append-only; nothing
/// executes until the graph is handed to a client `evaluate` or `export`
/// call.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct ExprGraph {
    nodes: Vec<Node>,
}

impl ExprGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        self.nodes.as_slice()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append an operator invocation and return its node id.
    pub fn invoke<It>(&mut self, op: &str, args: It) -> NodeId
    where
        It: IntoIterator<Item = (&'static str, Arg)>,
    {
        let node = Node {
            id: NodeId::unique(),
            op: op.to_string(),
            args: args
                .into_iter()
                .map(|(name, arg)| (name.to_string(), arg))
                .collect(),
        };
        let id = node.id;
        self.nodes.push(node);
        id
    }

    pub fn by_id(&self, id: NodeId) -> Option<&Node> {
        assert!(!id.is_nil());
        self.nodes.iter().find(|node| node.id == id)
    }

    /// All node ids reachable from `root`, root included.
    fn reachable(&self, root: NodeId) -> HashSet<NodeId> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.by_id(id) else {
                continue;
            };
            for (_, arg) in node.args.iter() {
                stack.extend_from_slice(arg.referenced());
            }
        }
        seen
    }

    pub fn validate(&self, op_lib: &OpLib) -> GraphResult<()> {
        let mut ids: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
        for node in self.nodes.iter() {
            if node.id.is_nil() {
                return Err(GraphError::NilNode);
            }
            if !ids.insert(node.id) {
                return Err(GraphError::DuplicateNode { node_id: node.id });
            }
        }

        let op_by_id: HashMap<NodeId, &str> = self
            .nodes
            .iter()
            .map(|node| (node.id, node.op.as_str()))
            .collect();

        for node in self.nodes.iter() {
            let spec = op_lib.get(&node.op).ok_or_else(|| GraphError::UnknownOp {
                op: node.op.clone(),
            })?;

            for (name, arg) in node.args.iter() {
                let Some(input) = spec.inputs.iter().find(|input| input.name == *name) else {
                    return Err(GraphError::UnknownArg {
                        op: node.op.clone(),
                        arg: name.clone(),
                    });
                };
                for target in arg.referenced() {
                    if !ids.contains(target) {
                        return Err(GraphError::DanglingRef {
                            node_id: node.id,
                            arg: name.clone(),
                        });
                    }
                    let target_op = op_by_id[target];
                    if let Some(target_spec) = op_lib.get(target_op) {
                        let found = target_spec.output;
                        if input.kind != Kind::Any && found != Kind::Any && found != input.kind {
                            return Err(GraphError::KindMismatch {
                                op: node.op.clone(),
                                arg: name.clone(),
                                expected: input.kind,
                                found,
                            });
                        }
                    }
                }
            }

            for input in spec.inputs.iter().filter(|input| input.required) {
                if !node.args.iter().any(|(name, _)| *name == input.name) {
                    return Err(GraphError::MissingArg {
                        op: node.op.clone(),
                        arg: input.name.clone(),
                    });
                }
            }
        }

        self.check_cycles()
    }

    // Two-color DFS over argument references. The invoke() API cannot create
    // cycles (a node only references already-appended nodes), but graphs can
    // also be deserialized.
    fn check_cycles(&self) -> GraphResult<()> {
        let index_by_id: HashMap<NodeId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id, index))
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            InProgress,
            Done,
        }
        let mut states = vec![State::Unvisited; self.nodes.len()];

        enum Visit {
            Enter(usize),
            Leave(usize),
        }

        for start in 0..self.nodes.len() {
            if states[start] != State::Unvisited {
                continue;
            }
            let mut stack = vec![Visit::Enter(start)];
            while let Some(visit) = stack.pop() {
                match visit {
                    Visit::Enter(index) => {
                        match states[index] {
                            State::Done => continue,
                            State::InProgress => {
                                return Err(GraphError::CycleDetected {
                                    node_id: self.nodes[index].id,
                                });
                            }
                            State::Unvisited => {}
                        }
                        states[index] = State::InProgress;
                        stack.push(Visit::Leave(index));
                        for (_, arg) in self.nodes[index].args.iter() {
                            for target in arg.referenced() {
                                if let Some(&target_index) = index_by_id.get(target) {
                                    match states[target_index] {
                                        State::Unvisited => stack.push(Visit::Enter(target_index)),
                                        State::InProgress => {
                                            return Err(GraphError::CycleDetected {
                                                node_id: *target,
                                            });
                                        }
                                        State::Done => {}
                                    }
                                }
                            }
                        }
                    }
                    Visit::Leave(index) => states[index] = State::Done,
                }
            }
        }

        Ok(())
    }

    /// Serialize the subgraph reachable from `root` into the wire format the
    /// platform's compute endpoint accepts.
    pub fn to_wire(&self, root: NodeId) -> serde_json::Value {
        let reachable = self.reachable(root);

        let mut nodes = serde_json::Map::new();
        for node in self.nodes.iter().filter(|node| reachable.contains(&node.id)) {
            let mut args = serde_json::Map::new();
            for (name, arg) in node.args.iter() {
                let encoded = match arg {
                    Arg::Const(value) => serde_json::json!({ "const": value }),
                    Arg::Node(target) => serde_json::json!({ "ref": target.to_string() }),
                    Arg::Nodes(targets) => serde_json::json!({
                        "refs": targets.iter().map(|id| id.to_string()).collect::<Vec<_>>()
                    }),
                };
                args.insert(name.clone(), encoded);
            }
            nodes.insert(
                node.id.to_string(),
                serde_json::json!({ "op": node.op, "args": args }),
            );
        }

        serde_json::json!({ "nodes": nodes, "root": root.to_string() })
    }
}

// Typed handles over graph nodes. They keep the domain layer reading like
// raster/vector algebra while the graph itself stays homogeneous.
macro_rules! node_ref {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub NodeId);

        impl $name {
            pub fn node(&self) -> NodeId {
                self.0
            }
        }

        impl From<$name> for Arg {
            fn from(r: $name) -> Arg {
                Arg::Node(r.0)
            }
        }
    };
}

node_ref!(ImageRef);
node_ref!(CollectionRef);
node_ref!(TableRef);
node_ref!(RegionRef);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OpLib;

    fn small_graph() -> (ExprGraph, NodeId, NodeId) {
        let mut graph = ExprGraph::new();
        let table = graph.invoke("Table.load", [("asset", "users/a/pts".into())]);
        let filtered = graph.invoke(
            "Table.filterEq",
            [
                ("table", table.into()),
                ("property", "LANDCOVER".into()),
                ("value", 3i64.into()),
            ],
        );
        (graph, table, filtered)
    }

    #[test]
    fn invoke_appends_and_resolves() {
        let (graph, table, filtered) = small_graph();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.by_id(table).unwrap().op, "Table.load");
        assert_eq!(
            graph.by_id(filtered).unwrap().args[0].1,
            Arg::Node(table)
        );
    }

    #[test]
    fn validate_accepts_well_formed_graph() {
        let (graph, _, _) = small_graph();
        graph.validate(&OpLib::standard()).unwrap();
    }

    #[test]
    fn validate_rejects_unknown_op() {
        let mut graph = ExprGraph::new();
        graph.invoke("Table.explode", []);
        let err = graph.validate(&OpLib::standard()).unwrap_err();
        assert!(matches!(err, GraphError::UnknownOp { .. }));
    }

    #[test]
    fn validate_rejects_missing_required_arg() {
        let mut graph = ExprGraph::new();
        graph.invoke("Table.load", []);
        let err = graph.validate(&OpLib::standard()).unwrap_err();
        assert!(matches!(err, GraphError::MissingArg { .. }));
    }

    #[test]
    fn validate_rejects_dangling_ref() {
        let mut graph = ExprGraph::new();
        graph.invoke(
            "Table.filterEq",
            [
                ("table", Arg::Node(NodeId::unique())),
                ("property", "LANDCOVER".into()),
                ("value", 1i64.into()),
            ],
        );
        let err = graph.validate(&OpLib::standard()).unwrap_err();
        assert!(matches!(err, GraphError::DanglingRef { .. }));
    }

    #[test]
    fn validate_rejects_kind_mismatch() {
        let mut graph = ExprGraph::new();
        let table = graph.invoke("Table.load", [("asset", "users/a/pts".into())]);
        let image = graph.invoke("Image.load", [("asset", "users/a/img".into())]);
        // geometry expects a Region, not a Table
        graph.invoke(
            "Image.clip",
            [("image", image.into()), ("geometry", table.into())],
        );
        let err = graph.validate(&OpLib::standard()).unwrap_err();
        assert!(matches!(err, GraphError::KindMismatch { .. }));
    }

    #[test]
    fn validate_rejects_cycle() {
        // invoke() cannot build a cycle, so splice one in by hand the way a
        // malformed serialized graph would contain it.
        let (mut graph, table, filtered) = small_graph();
        let node = graph
            .nodes
            .iter_mut()
            .find(|node| node.id == table)
            .unwrap();
        node.args.push(("value".to_string(), Arg::Node(filtered)));

        let err = graph.check_cycles().unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn wire_format_contains_only_reachable_nodes() {
        let (mut graph, _, filtered) = small_graph();
        let orphan = graph.invoke("Table.load", [("asset", "users/a/other".into())]);

        let wire = graph.to_wire(filtered);
        let nodes = wire["nodes"].as_object().unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(!nodes.contains_key(&orphan.to_string()));
        assert_eq!(wire["root"], filtered.to_string());
    }

    #[test]
    fn serialization_roundtrip() -> anyhow::Result<()> {
        let (graph, _, filtered) = small_graph();
        let json = serde_json::to_string(&graph)?;
        let restored: ExprGraph = serde_json::from_str(&json)?;
        assert_eq!(restored.len(), graph.len());
        assert_eq!(restored.to_wire(filtered), graph.to_wire(filtered));
        Ok(())
    }
}
