//! The document wire format: nodes, blocks, instructions
//! and terminators, as they are parsed off the JSON-serializable surface.
//!
//! `Document` owns every node by id; nothing here borrows across nodes,
//! so the evaluator and lowering pass can hold an immutable `&Document`
//! for the whole run.

use crate::expr::Expr;
use crate::value::Capabilities;
use anyhow::Context;
use compact_str::CompactString;
use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};

pub type NodeId = CompactString;
pub type BlockId = CompactString;
pub type VarId = CompactString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Void,
}

/// A named pure definition at the AIR layer (`airDefs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirDef {
    pub params: Vec<CompactString>,
    pub body: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Node {
    ExprNode {
        id: NodeId,
        #[serde(default)]
        typ: Option<CompactString>,
        expr: Expr,
    },
    BlockNode {
        id: NodeId,
        #[serde(default)]
        typ: Option<CompactString>,
        blocks: IndexMap<BlockId, Block>,
        entry: BlockId,
    },
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::ExprNode { id, .. } => id,
            Node::BlockNode { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Instruction {
    Assign {
        target: VarId,
        expr: Expr,
    },
    Op {
        target: VarId,
        ns: CompactString,
        name: CompactString,
        #[serde(rename = "argIds")]
        arg_ids: Vec<VarId>,
    },
    Call {
        target: VarId,
        callee: VarId,
        #[serde(rename = "argIds")]
        arg_ids: Vec<VarId>,
    },
    Phi {
        target: VarId,
        sources: Vec<PhiSource>,
    },
    Effect {
        #[serde(default)]
        target: Option<VarId>,
        op: CompactString,
        #[serde(rename = "argIds", default)]
        arg_ids: Vec<VarId>,
    },
    AssignRef {
        target: VarId,
        #[serde(rename = "valueId")]
        value_id: VarId,
    },
    // PIR
    Spawn {
        target: VarId,
        #[serde(rename = "entryId")]
        entry_id: NodeId,
        #[serde(rename = "argIds", default)]
        arg_ids: Vec<VarId>,
    },
    ChannelOp {
        op: ChannelOpKind,
        #[serde(default)]
        target: Option<VarId>,
        channel: VarId,
        #[serde(rename = "valueId", default)]
        value_id: Option<VarId>,
    },
    Await {
        target: VarId,
        #[serde(rename = "futureId")]
        future_id: VarId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelOpKind {
    Send,
    Recv,
    TrySend,
    TryRecv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhiSource {
    pub block: BlockId,
    pub id: VarId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Terminator {
    Jump {
        to: BlockId,
    },
    Branch {
        cond: VarId,
        then: BlockId,
        #[serde(rename = "else")]
        else_: BlockId,
    },
    Return {
        #[serde(rename = "valueId", default)]
        value_id: Option<VarId>,
    },
    Exit {
        #[serde(default)]
        code: Option<VarId>,
    },
    // PIR
    Fork {
        branches: Vec<ForkBranch>,
        continuation: BlockId,
    },
    Join {
        tasks: Vec<VarId>,
        #[serde(default)]
        results: Vec<JoinResult>,
        to: BlockId,
    },
    Suspend {
        future: VarId,
        #[serde(rename = "resumeBlock")]
        resume_block: BlockId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkBranch {
    pub block: BlockId,
    #[serde(rename = "taskId")]
    pub task_id: CompactString,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResult {
    pub task: VarId,
    #[serde(rename = "refCell")]
    pub ref_cell: VarId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<u8>,
    #[serde(default)]
    pub function_sigs: IndexMap<CompactString, CompactString>,
    #[serde(default)]
    pub air_defs: IndexMap<CompactString, AirDef>,
    pub nodes: IndexMap<NodeId, Node>,
    pub result: NodeId,
}

impl Document {
    /// Parses the stable, JSON-serializable wire format off
    /// `input`. This is the one place the core crate reaches for
    /// `anyhow`/`serde_json` directly — everything past this boundary
    /// works with an already-parsed `Document` and reports failures as
    /// `Value::Error` or `WeftError`, not `anyhow::Error`.
    pub fn parse(input: &str) -> anyhow::Result<Document> {
        serde_json::from_str(input).context("failed to parse document JSON")
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
            .map(Capabilities::from_bits_truncate)
            .unwrap_or_default()
    }

    pub fn is_pir(&self) -> bool {
        self.version.major == 2
    }
}
