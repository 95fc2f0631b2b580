use crate::module::{Module, ModuleLoader};
use crate::source::Span;
use crate::types::{Node, PrimitiveFunc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use thiserror::Error;

/// Binding `recur` resolves to find its target. Cannot be produced by the reader.
pub const RECUR_TARGET: &str = "#<recur-target>";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Unbound symbol: '{0}'")]
    UnboundSymbol(String, Span), // Symbol name, span where lookup happened
}

/// Shared handle to a frame. Frames are owned jointly by child frames and
/// the closures captured in them.
pub type Env = Rc<RefCell<Environment>>;

pub struct Environment {
    // Fixed at creation, never reassigned.
    outer: Option<Env>,
    bindings: HashMap<String, Node>,
    // Set on a module's top frame while (and after) it loads.
    module: Option<Weak<Module>>,
    // Set on root frames; the owner (e.g. `Interpreter`) keeps the loader alive.
    loader: Option<Weak<dyn ModuleLoader>>,
}

impl Environment {
    /// Creates a new, top-level (global) environment.
    pub fn new() -> Env {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
            module: None,
            loader: None,
        }))
    }

    /// A root frame with the standard library registered.
    pub fn new_global_populated() -> Env {
        let env_ptr = Environment::new();
        crate::primitives::register_all(&mut env_ptr.borrow_mut());
        env_ptr
    }

    /// Creates a new environment enclosed within an outer one.
    pub fn new_enclosed(outer_env: Env) -> Env {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer_env),
            bindings: HashMap::new(),
            module: None,
            loader: None,
        }))
    }

    /// Defines a variable in the *current* environment frame.
    /// Replaces the value if the variable already exists in this frame.
    pub fn define(&mut self, name: String, value_node: Node) {
        self.bindings.insert(name, value_node);
    }

    /// Looks up a variable's value.
    /// Checks the current environment first, then walks up the outer environment chain.
    /// `lookup_span` is the location where the variable was referenced, used for error reporting.
    pub fn get(&self, name: &str, lookup_span: Span) -> Result<Node, EnvError> {
        if let Some(value_node) = self.bindings.get(name) {
            return Ok(value_node.clone());
        }
        let mut current = self.outer.clone();
        // Walk outward iteratively so long chains don't grow the stack.
        while let Some(env_ptr) = current {
            let env = env_ptr.borrow();
            if let Some(value_node) = env.bindings.get(name) {
                return Ok(value_node.clone());
            }
            current = env.outer.clone();
        }
        Err(EnvError::UnboundSymbol(name.to_string(), lookup_span))
    }

    /// Whether `name` is bound in this frame (outer frames are not consulted).
    pub fn is_defined_locally(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Helper to add a primitive procedure to the environment.
    pub fn add_primitive(&mut self, name: &str, func: PrimitiveFunc) {
        let node = Node::new_primitive(func, name, Span::default());
        self.define(name.to_string(), node);
    }

    pub fn set_module(&mut self, module: Weak<Module>) {
        self.module = Some(module);
    }

    /// The module whose top-level frame encloses this one, if any.
    pub fn current_module(&self) -> Option<Rc<Module>> {
        if let Some(module) = self.module.as_ref().and_then(Weak::upgrade) {
            return Some(module);
        }
        self.outer
            .as_ref()
            .and_then(|outer| outer.borrow().current_module())
    }

    pub fn set_module_loader(&mut self, loader: Weak<dyn ModuleLoader>) {
        self.loader = Some(loader);
    }

    /// The loader installed on the nearest enclosing root that still has a live one.
    pub fn module_loader(&self) -> Option<Rc<dyn ModuleLoader>> {
        if let Some(loader) = self.loader.as_ref().and_then(Weak::upgrade) {
            return Some(loader);
        }
        self.outer
            .as_ref()
            .and_then(|outer| outer.borrow().module_loader())
    }

    /// Drops every binding in this frame. Used when the owning scope is torn down
    /// to break closure <-> frame reference cycles.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    fn add_identifiers(&self, mut identifiers: HashSet<String>) -> HashSet<String> {
        for identifier in self.bindings.keys() {
            identifiers.insert(identifier.to_string());
        }
        match self.outer {
            Some(ref outer_env_ptr) => outer_env_ptr.borrow().add_identifiers(identifiers),
            None => identifiers,
        }
    }

    /// Gets all user-visible identifiers bound in this environment chain
    pub fn get_identifiers(&self) -> HashSet<String> {
        let mut identifiers = self.add_identifiers(HashSet::new());
        identifiers.remove(RECUR_TARGET);
        identifiers
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_outer", &self.outer.is_some())
            .finish()
    }
}
