//! Test descriptor tree.
//!
//! Tests are stored in an arena in declaration order. A single cursor names
//! the test whose expectations are being recorded. The bootstrap runs test
//! bodies one at a time, so the cursor never has to be a stack.

use serde::{Deserialize, Serialize};

/// Descriptor of the implicit top-level node.
pub const ROOT_DESCRIPTOR: &str = "root";

/// Id of the root node.
pub const ROOT_ID: u32 = 0;

/// Outcome of one expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectStatus {
    /// The assertion held.
    Pass,
    /// The assertion did not hold.
    Fail,
    /// The matcher was misused, or the test body threw.
    Error,
}

impl std::str::FromStr for ExpectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(ExpectStatus::Pass),
            "fail" => Ok(ExpectStatus::Fail),
            "error" => Ok(ExpectStatus::Error),
            other => Err(format!("unknown expectation status '{other}'")),
        }
    }
}

/// One recorded expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectResult {
    /// Outcome.
    pub status: ExpectStatus,
    /// Human-readable message.
    pub message: String,
}

impl ExpectResult {
    /// Shorthand constructor.
    pub fn new(status: ExpectStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// A node of the result tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDescriptor {
    /// Name given to the test.
    pub descriptor: String,
    /// Expectations in recording order.
    pub expect_results: Vec<ExpectResult>,
    /// Nested tests in declaration order.
    pub children: Vec<TestDescriptor>,
}

impl TestDescriptor {
    /// Find a direct child by name.
    pub fn child(&self, descriptor: &str) -> Option<&TestDescriptor> {
        self.children.iter().find(|c| c.descriptor == descriptor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Declared,
    Running,
    Done,
}

#[derive(Debug)]
struct Node {
    descriptor: String,
    parent: Option<u32>,
    state: NodeState,
    results: Vec<ExpectResult>,
    children: Vec<u32>,
}

/// Errors from misusing the runner through ops.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RunnerError {
    /// No node with this id.
    #[error("unknown test id {0}")]
    UnknownTest(u32),
}

/// Arena-backed test tree with a single current-test cursor.
#[derive(Debug)]
pub struct TestRunner {
    nodes: Vec<Node>,
    current: u32,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    /// A tree holding only the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                descriptor: ROOT_DESCRIPTOR.into(),
                parent: None,
                state: NodeState::Running,
                results: Vec::new(),
                children: Vec::new(),
            }],
            current: ROOT_ID,
        }
    }

    fn node_mut(&mut self, id: u32) -> Result<&mut Node, RunnerError> {
        self.nodes
            .get_mut(id as usize)
            .ok_or(RunnerError::UnknownTest(id))
    }

    /// Append a test under `parent`. Its position is fixed now.
    pub fn declare(&mut self, descriptor: &str, parent: u32) -> Result<u32, RunnerError> {
        let id = self.nodes.len() as u32;
        self.node_mut(parent)?.children.push(id);
        self.nodes.push(Node {
            descriptor: descriptor.to_string(),
            parent: Some(parent),
            state: NodeState::Declared,
            results: Vec::new(),
            children: Vec::new(),
        });
        Ok(id)
    }

    /// Make `id` the current test.
    pub fn enter(&mut self, id: u32) -> Result<(), RunnerError> {
        self.node_mut(id)?.state = NodeState::Running;
        self.current = id;
        tracing::trace!(test = id, "test body started");
        Ok(())
    }

    /// Finish `id` and move the cursor to its nearest running ancestor.
    pub fn exit(&mut self, id: u32) -> Result<(), RunnerError> {
        let mut next = self.node_mut(id)?.parent;
        self.node_mut(id)?.state = NodeState::Done;
        while let Some(candidate) = next {
            let node = &self.nodes[candidate as usize];
            if node.state == NodeState::Running {
                break;
            }
            next = node.parent;
        }
        self.current = next.unwrap_or(ROOT_ID);
        tracing::trace!(test = id, current = self.current, "test body finished");
        Ok(())
    }

    /// The test expectations are currently attributed to.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Append a result to the current test.
    pub fn record(&mut self, result: ExpectResult) {
        let current = self.current;
        self.nodes[current as usize].results.push(result);
    }

    /// Append a result to a specific test.
    pub fn record_in(&mut self, id: u32, result: ExpectResult) -> Result<(), RunnerError> {
        self.node_mut(id)?.results.push(result);
        Ok(())
    }

    /// Build the owned result tree.
    pub fn into_tree(mut self) -> TestDescriptor {
        fn build(nodes: &mut [Node], id: u32) -> TestDescriptor {
            let children = std::mem::take(&mut nodes[id as usize].children);
            let kids = children.into_iter().map(|c| build(nodes, c)).collect();
            let node = &mut nodes[id as usize];
            TestDescriptor {
                descriptor: std::mem::take(&mut node.descriptor),
                expect_results: std::mem::take(&mut node.results),
                children: kids,
            }
        }
        build(&mut self.nodes, ROOT_ID)
    }
}
