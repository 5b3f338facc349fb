//! The external JSON document format (§6) and its in-memory node graph
//! (§3.3, §3.4).
//!
//! This plays the role the teacher's `pest`-based `parser/` module played
//! for RTFS's own surface syntax: turning externally-supplied text into
//! the crate's internal tree. Programs here already arrive as JSON IR, so
//! the "parser" is a `serde` derive rather than a grammar.

use serde::Deserialize;

use crate::error::EvalError;

pub type NodeId = String;

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, rename = "functionSigs")]
    pub function_sigs: Vec<serde_json::Value>,
    #[serde(default, rename = "airDefs")]
    pub air_defs: Vec<AirDef>,
    pub nodes: Vec<Node>,
    pub result: NodeId,
}

impl Document {
    pub fn from_json(text: &str) -> Result<Document, EvalError> {
        let doc: Document = serde_json::from_str(text)?;
        doc.validate_shallow()?;
        Ok(doc)
    }

    /// The only check this crate performs before evaluation even has a
    /// chance to run: an unsupported major version, which leaves no
    /// document shape it could evaluate against at all. Everything else
    /// that is merely JSON-well-formed-yet-locally-invalid (duplicate node
    /// ids, a `result` id that doesn't exist) is deferred to `evaluate()`,
    /// which surfaces it as a catchable `Value::Error(ValidationError)` at
    /// the point of use rather than aborting before a caller's `try` ever
    /// gets a chance to see it. Deeper structural validation (acyclicity,
    /// phi-source well-formedness) is the external validator's job.
    fn validate_shallow(&self) -> Result<(), EvalError> {
        let major = self
            .version
            .split('.')
            .next()
            .and_then(|s| s.parse::<u32>().ok());
        match major {
            Some(_) => Ok(()),
            None => Err(EvalError::UnsupportedVersion(self.version.clone())),
        }
    }

    /// Duplicate node ids in document order, if any — checked at
    /// evaluation time rather than parse time; see `validate_shallow`.
    pub fn duplicate_node_ids(&self) -> Vec<NodeId> {
        let mut seen = std::collections::HashSet::new();
        let mut dups = Vec::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                dups.push(node.id.clone());
            }
        }
        dups
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirDef {
    pub namespace: String,
    pub name: String,
    pub params: Vec<String>,
    pub body: ExprRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub body: NodeBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NodeBody {
    Block { blocks: Vec<Block>, entry: String },
    Expr { expr: ExprRef },
}

/// A reference in expression/instruction position: either a node id to be
/// resolved lazily (§4.1's node-reference resolution) or an inline
/// sub-expression evaluated in the current environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExprRef {
    NodeId(NodeId),
    Inline(Box<Expr>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<ExprRef>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParMode {
    #[default]
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    #[serde(rename = "lit")]
    Lit {
        #[serde(rename = "type")]
        value_type: String,
        value: serde_json::Value,
    },
    #[serde(rename = "var")]
    Var { name: String },
    #[serde(rename = "ref")]
    Ref { id: NodeId },
    #[serde(rename = "call")]
    Call {
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<ExprRef>,
    },
    #[serde(rename = "if")]
    If {
        cond: Box<ExprRef>,
        then: Box<ExprRef>,
        #[serde(rename = "else")]
        else_branch: Option<Box<ExprRef>>,
    },
    #[serde(rename = "let")]
    Let {
        name: String,
        value: Box<ExprRef>,
        body: Box<ExprRef>,
    },
    #[serde(rename = "airRef")]
    AirRef {
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<ExprRef>,
    },
    #[serde(rename = "predicate")]
    Predicate {
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<ExprRef>,
    },

    // CIR
    #[serde(rename = "lambda")]
    Lambda {
        params: Vec<ParamSpec>,
        body: Box<ExprRef>,
    },
    #[serde(rename = "callExpr")]
    CallExpr {
        #[serde(rename = "fn")]
        func: Box<ExprRef>,
        #[serde(default)]
        args: Vec<ExprRef>,
    },
    #[serde(rename = "fix")]
    Fix {
        #[serde(rename = "fn")]
        func: Box<ExprRef>,
    },

    // EIR
    #[serde(rename = "seq")]
    Seq {
        first: Box<ExprRef>,
        then: Box<ExprRef>,
    },
    #[serde(rename = "assign")]
    Assign {
        target: String,
        value: Box<ExprRef>,
    },
    #[serde(rename = "while")]
    While {
        cond: Box<ExprRef>,
        body: Box<ExprRef>,
    },
    #[serde(rename = "for")]
    For {
        var: String,
        init: Box<ExprRef>,
        cond: Box<ExprRef>,
        update: Box<ExprRef>,
        body: Box<ExprRef>,
    },
    #[serde(rename = "iter")]
    Iter {
        var: String,
        iterable: Box<ExprRef>,
        body: Box<ExprRef>,
    },
    #[serde(rename = "effect")]
    Effect {
        op: String,
        #[serde(default)]
        args: Vec<ExprRef>,
    },
    #[serde(rename = "refCell")]
    RefCellExpr { target: String },
    #[serde(rename = "deref")]
    Deref { target: String },
    #[serde(rename = "try")]
    Try {
        #[serde(rename = "tryBody")]
        try_body: Box<ExprRef>,
        #[serde(rename = "catchParam")]
        catch_param: String,
        #[serde(rename = "catchBody")]
        catch_body: Box<ExprRef>,
        #[serde(default)]
        fallback: Option<Box<ExprRef>>,
    },

    // PIR
    #[serde(rename = "par")]
    Par {
        branches: Vec<ExprRef>,
        #[serde(default)]
        mode: ParMode,
    },
    #[serde(rename = "spawn")]
    Spawn { task: Box<ExprRef> },
    #[serde(rename = "await")]
    Await {
        future: Box<ExprRef>,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        fallback: Option<Box<ExprRef>>,
        #[serde(default, rename = "returnIndex")]
        return_index: bool,
    },
    #[serde(rename = "channel")]
    Channel {
        #[serde(rename = "type")]
        declared_type: Option<String>,
        #[serde(default, rename = "bufferSize")]
        buffer_size: usize,
    },
    #[serde(rename = "send")]
    Send {
        channel: Box<ExprRef>,
        value: Box<ExprRef>,
    },
    #[serde(rename = "recv")]
    Recv { channel: Box<ExprRef> },
    #[serde(rename = "select")]
    Select {
        futures: Vec<ExprRef>,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        fallback: Option<Box<ExprRef>>,
        #[serde(default, rename = "returnIndex")]
        return_index: bool,
    },
    #[serde(rename = "race")]
    Race { tasks: Vec<ExprRef> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhiSource {
    pub block: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Instruction {
    #[serde(rename = "assign")]
    Assign { target: String, expr: ExprRef },
    #[serde(rename = "op")]
    Op {
        target: String,
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<ExprRef>,
    },
    #[serde(rename = "phi")]
    Phi {
        target: String,
        sources: Vec<PhiSource>,
    },
    #[serde(rename = "effect")]
    Effect {
        op: String,
        #[serde(default)]
        args: Vec<ExprRef>,
    },
    #[serde(rename = "assignRef")]
    AssignRef { target: String, source: String },
    #[serde(rename = "call")]
    Call {
        target: String,
        callee: ExprRef,
        #[serde(default)]
        args: Vec<ExprRef>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForkBranch {
    pub block: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Terminator {
    #[serde(rename = "jump")]
    Jump { to: String },
    #[serde(rename = "branch")]
    Branch {
        cond: ExprRef,
        then: String,
        #[serde(rename = "else")]
        else_branch: String,
    },
    #[serde(rename = "return")]
    Return { value: Option<ExprRef> },
    #[serde(rename = "exit")]
    Exit { code: Option<ExprRef> },
    #[serde(rename = "fork")]
    Fork {
        branches: Vec<ForkBranch>,
        continuation: String,
    },
    #[serde(rename = "join")]
    Join {
        tasks: Vec<String>,
        results: Option<Vec<String>>,
        to: String,
    },
    #[serde(rename = "suspend")]
    Suspend {
        future: ExprRef,
        #[serde(rename = "resumeBlock")]
        resume_block: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_chain_document() {
        let json = r#"{
            "version": "1.0.0",
            "nodes": [
                {"id": "a", "expr": {"kind": "lit", "type": "int", "value": 10}},
                {"id": "b", "expr": {"kind": "lit", "type": "int", "value": 32}},
                {"id": "sum", "expr": {"kind": "call", "ns": "core", "name": "add", "args": ["a", "b"]}}
            ],
            "result": "sum"
        }"#;
        let doc = Document::from_json(json).expect("parses");
        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(doc.result, "sum");
    }

    #[test]
    fn parses_but_flags_duplicate_ids_for_the_evaluator_to_reject() {
        let json = r#"{
            "version": "1.0.0",
            "nodes": [
                {"id": "a", "expr": {"kind": "lit", "type": "int", "value": 1}},
                {"id": "a", "expr": {"kind": "lit", "type": "int", "value": 2}}
            ],
            "result": "a"
        }"#;
        let doc = Document::from_json(json).expect("parses: duplicate ids are a value-level error, not a parse error");
        assert_eq!(doc.duplicate_node_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn parses_but_leaves_an_unknown_result_id_for_the_evaluator_to_reject() {
        let json = r#"{
            "version": "1.0.0",
            "nodes": [{"id": "a", "expr": {"kind": "lit", "type": "int", "value": 1}}],
            "result": "missing"
        }"#;
        let doc = Document::from_json(json).expect("parses: an unknown result id is a value-level error, not a parse error");
        assert!(doc.find(&doc.result).is_none());
    }

    #[test]
    fn parses_block_node() {
        let json = r#"{
            "version": "2.0.0",
            "nodes": [{
                "id": "fn0",
                "entry": "b0",
                "blocks": [
                    {"id": "b0", "instructions": [], "terminator": {"kind": "return", "value": null}}
                ]
            }],
            "result": "fn0"
        }"#;
        let doc = Document::from_json(json).expect("parses");
        match &doc.nodes[0].body {
            NodeBody::Block { entry, blocks } => {
                assert_eq!(entry, "b0");
                assert_eq!(blocks.len(), 1);
            }
            NodeBody::Expr { .. } => panic!("expected block node"),
        }
    }
}
