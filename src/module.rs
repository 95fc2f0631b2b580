use crate::environment::{Env, Environment};
use crate::evaluator::evaluate;
use crate::parser::parse_program;
use crate::source::Span;
use crate::types::Node;
use indexmap::{IndexMap, IndexSet};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// File extension of module source files.
pub const MODULE_EXTENSION: &str = "lpy";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModuleError {
    #[error("Module '{module}' not found in load paths: [{}]", display_paths(.search_paths))]
    NotFound {
        module: String,
        search_paths: Vec<PathBuf>,
    },
    #[error("Circular dependency detected: module '{module}' is already being loaded")]
    CircularDependency { module: String },
    #[error("Could not read module '{module}': {message}")]
    Read { module: String, message: String },
    #[error("Could not parse module '{module}': {message}")]
    Parse { module: String, message: String },
    #[error("Error while loading module '{module}': {message}")]
    Evaluation { module: String, message: String },
    #[error("Symbol '{symbol}' is not exported by module '{module}'")]
    NotExported { module: String, symbol: String },
    #[error("No module loader available to import '{module}'")]
    NoLoader { module: String },
}

impl ModuleError {
    /// Name of the module the failure concerns.
    pub fn module(&self) -> &str {
        match self {
            ModuleError::NotFound { module, .. }
            | ModuleError::CircularDependency { module }
            | ModuleError::Read { module, .. }
            | ModuleError::Parse { module, .. }
            | ModuleError::Evaluation { module, .. }
            | ModuleError::NotExported { module, .. }
            | ModuleError::NoLoader { module } => module,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A loaded module: its private top-level frame and the names it made public.
pub struct Module {
    pub name: String,
    pub path: Option<PathBuf>,
    pub env: Env,
    exports: RefCell<IndexSet<String>>,
}

impl Module {
    pub fn new(name: &str, path: Option<PathBuf>, env: Env) -> Self {
        Module {
            name: name.to_string(),
            path,
            env,
            exports: RefCell::new(IndexSet::new()),
        }
    }

    pub fn add_export(&self, symbol: &str) {
        self.exports.borrow_mut().insert(symbol.to_string());
    }

    pub fn is_exported(&self, symbol: &str) -> bool {
        self.exports.borrow().contains(symbol)
    }

    /// Exported names with their current values, in export order.
    /// Names exported but never defined are skipped.
    pub fn get_all_exports(&self) -> IndexMap<String, Node> {
        let env = self.env.borrow();
        self.exports
            .borrow()
            .iter()
            .filter_map(|name| {
                env.get(name, Span::default())
                    .ok()
                    .map(|value| (name.clone(), value))
            })
            .collect()
    }

    pub fn get_exported_value(&self, symbol: &str) -> Result<Node, ModuleError> {
        let not_exported = || ModuleError::NotExported {
            module: self.name.clone(),
            symbol: symbol.to_string(),
        };
        if !self.is_exported(symbol) {
            return Err(not_exported());
        }
        self.env
            .borrow()
            .get(symbol, Span::default())
            .map_err(|_| not_exported())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("exports", &self.exports.borrow())
            .finish()
    }
}

/// Resolves module names to evaluated modules.
///
/// `load_module` takes the loader by `Rc` so that it can hand itself to the
/// environments of the modules it loads, letting their own `import` forms reach it.
pub trait ModuleLoader: fmt::Debug {
    fn load_module(self: Rc<Self>, name: &str) -> Result<Rc<Module>, ModuleError>;

    /// Forgets every cached module and clears their frames.
    fn unload_all(&self);
}

/// Loaded modules plus the set of modules whose evaluation is in progress.
#[derive(Debug, Default)]
struct ModuleCache {
    modules: RefCell<HashMap<String, Rc<Module>>>,
    loading: RefCell<HashSet<String>>,
}

impl ModuleCache {
    fn load(
        &self,
        name: &str,
        loader: Rc<dyn ModuleLoader>,
        read_source: impl FnOnce() -> Result<(String, Option<PathBuf>), ModuleError>,
    ) -> Result<Rc<Module>, ModuleError> {
        if let Some(module) = self.modules.borrow().get(name) {
            tracing::debug!(module = name, "module cache hit");
            return Ok(module.clone());
        }
        if self.loading.borrow().contains(name) {
            return Err(ModuleError::CircularDependency {
                module: name.to_string(),
            });
        }

        let (source, path) = read_source()?;
        self.loading.borrow_mut().insert(name.to_string());
        let result = evaluate_module(name, path, &source, &loader);
        self.loading.borrow_mut().remove(name);

        let module = result?;
        self.modules
            .borrow_mut()
            .insert(name.to_string(), module.clone());
        tracing::debug!(module = name, "module loaded");
        Ok(module)
    }

    fn clear(&self) {
        for (_, module) in self.modules.borrow_mut().drain() {
            module.env.borrow_mut().clear();
        }
        self.loading.borrow_mut().clear();
    }
}

/// Evaluates `source` as module `name` in a fresh child of a freshly populated root.
fn evaluate_module(
    name: &str,
    path: Option<PathBuf>,
    source: &str,
    loader: &Rc<dyn ModuleLoader>,
) -> Result<Rc<Module>, ModuleError> {
    let root = Environment::new_global_populated();
    root.borrow_mut().set_module_loader(Rc::downgrade(loader));
    let env = Environment::new_enclosed(root);
    let module = Rc::new(Module::new(name, path, env.clone()));
    env.borrow_mut().set_module(Rc::downgrade(&module));

    let forms = parse_program(source).map_err(|e| ModuleError::Parse {
        module: name.to_string(),
        message: e.to_string(),
    })?;
    for form in &forms {
        evaluate(form, &env).map_err(|e| ModuleError::Evaluation {
            module: name.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(module)
}

/// Loads `a/b` from `<load path>/a/b.lpy`, trying load paths in order.
#[derive(Debug)]
pub struct FileModuleLoader {
    load_paths: Vec<PathBuf>,
    cache: ModuleCache,
}

impl FileModuleLoader {
    pub fn new(load_paths: Vec<PathBuf>) -> Self {
        FileModuleLoader {
            load_paths,
            cache: ModuleCache::default(),
        }
    }

    pub fn load_paths(&self) -> &[PathBuf] {
        &self.load_paths
    }

    /// Finds the file backing module `name`.
    pub fn find_module_file(&self, name: &str) -> Result<PathBuf, ModuleError> {
        let mut relative: PathBuf = name.split('/').collect();
        relative.set_extension(MODULE_EXTENSION);
        self.load_paths
            .iter()
            .map(|load_path| load_path.join(&relative))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ModuleError::NotFound {
                module: name.to_string(),
                search_paths: self.load_paths.clone(),
            })
    }

    fn read_source(&self, name: &str) -> Result<(String, Option<PathBuf>), ModuleError> {
        let path = self.find_module_file(name)?;
        tracing::debug!(module = name, path = %path.display(), "resolved module file");
        let source = std::fs::read_to_string(&path).map_err(|e| ModuleError::Read {
            module: name.to_string(),
            message: format!("{}: {}", display_path(&path), e),
        })?;
        Ok((source, Some(path)))
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

impl ModuleLoader for FileModuleLoader {
    fn load_module(self: Rc<Self>, name: &str) -> Result<Rc<Module>, ModuleError> {
        let loader: Rc<dyn ModuleLoader> = self.clone();
        self.cache.load(name, loader, || self.read_source(name))
    }

    fn unload_all(&self) {
        self.cache.clear();
    }
}

/// Serves modules from in-memory sources, keyed by module name.
#[derive(Debug, Default)]
pub struct MemoryModuleLoader {
    sources: RefCell<HashMap<String, String>>,
    cache: ModuleCache,
}

impl MemoryModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the source of module `name`.
    pub fn add_source(&self, name: &str, source: &str) {
        self.sources
            .borrow_mut()
            .insert(name.to_string(), source.to_string());
    }
}

impl ModuleLoader for MemoryModuleLoader {
    fn load_module(self: Rc<Self>, name: &str) -> Result<Rc<Module>, ModuleError> {
        let loader: Rc<dyn ModuleLoader> = self.clone();
        let source = self.sources.borrow().get(name).cloned();
        self.cache.load(name, loader, || match source {
            Some(source) => Ok((source, None)),
            None => Err(ModuleError::NotFound {
                module: name.to_string(),
                search_paths: Vec::new(),
            }),
        })
    }

    fn unload_all(&self) {
        self.cache.clear();
    }
}
