//! Locally exposed functions.
//!
//! A handler receives the positional arguments of a call and either fails
//! right away, returns a value right away, or hands back a future that
//! settles later. The dispatch engine replies accordingly.

use crate::tree::Tree;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a handler produced for one invocation.
pub enum Outcome {
    Ready(Value),
    Pending(BoxFuture<'static, anyhow::Result<Value>>),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Outcome::Pending(_) => f.write_str("Pending"),
        }
    }
}

type Handler = dyn Fn(Vec<Value>) -> anyhow::Result<Outcome> + Send + Sync;

/// A callable leaf of the local function tree.
#[derive(Clone)]
pub struct LocalFunction {
    handler: Arc<Handler>,
    arity: Option<usize>,
}

/// The tree of functions an endpoint exposes to its peer.
pub type FunctionTree = Tree<LocalFunction>;

impl LocalFunction {
    /// Wrap a handler that settles immediately.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_outcome(move |args| f(args).map(Outcome::Ready))
    }

    /// Wrap a handler whose result becomes available later.
    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::from_outcome(move |args| Ok(Outcome::Pending(f(args).boxed())))
    }

    /// Wrap a handler that decides per call whether to fail, reply or defer.
    pub fn from_outcome<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(f),
            arity: None,
        }
    }

    /// Declare how many arguments the function expects. Announced to the peer
    /// during discovery; never enforced.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn invoke(&self, args: Vec<Value>) -> anyhow::Result<Outcome> {
        (self.handler)(args)
    }
}

impl fmt::Debug for LocalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFunction")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl From<LocalFunction> for Tree<LocalFunction> {
    fn from(function: LocalFunction) -> Self {
        Tree::Leaf(function)
    }
}
