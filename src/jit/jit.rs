//! The reference executor: an IR interpreter with a symbol table.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::error::{ExecError, ExecResult};
use super::value::Value;
use crate::ast::{BinaryOp, UnaryOp};
use crate::codegen::{IrExpr, IrFunction, IrInitializer, IrModule, IrStmt, ModuleId};
use crate::sema::CAPTURE_FN;
use crate::transaction::TransactionId;

/// Default limit on nested calls before execution is aborted.
pub const DEFAULT_CALL_DEPTH: usize = 256;

/// What a symbol name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Global,
    VTable,
    /// Provided by the executor itself.
    Builtin,
}

/// Executor interface consumed by the incremental parser.
pub trait Executor {
    /// Register the symbols of a module produced by transaction `owner`.
    fn add_module(&mut self, owner: TransactionId, module: IrModule) -> ExecResult<()>;

    /// Preload a library artifact. Its symbols can be overridden by
    /// modules and it is never removed.
    fn load_library(&mut self, module: IrModule) -> ExecResult<()>;

    /// Run every static initializer that has not run yet, in load order.
    fn run_static_initializers_once(&mut self) -> ExecResult<()>;

    fn resolve_symbol(&self, name: &str) -> Option<SymbolKind>;

    /// Call a function taking no arguments on behalf of `owner`.
    fn run_function(&mut self, owner: TransactionId, name: &str) -> ExecResult<Option<Value>>;

    /// The value most recently routed through the capture hook.
    fn take_captured(&mut self) -> Option<Value>;

    /// Run, newest first, the `atexit` callbacks registered by `owner`,
    /// then forget them. Returns how many ran.
    fn run_and_remove_static_destructors(&mut self, owner: TransactionId) -> ExecResult<usize>;

    /// Deregister a module's symbols. Returns false if it was not loaded.
    fn remove_module(&mut self, id: ModuleId) -> bool;
}

#[derive(Debug)]
struct LoadedModule {
    owner: TransactionId,
    symbols: Vec<String>,
}

#[derive(Debug, Default)]
struct SymbolTable {
    functions: HashMap<String, (Option<ModuleId>, Arc<IrFunction>)>,
    globals: HashMap<String, (Option<ModuleId>, Value)>,
    vtables: HashMap<String, Option<ModuleId>>,
}

impl SymbolTable {
    fn owner_of(&self, symbol: &str) -> Option<Option<ModuleId>> {
        self.functions
            .get(symbol)
            .map(|(m, _)| *m)
            .or_else(|| self.globals.get(symbol).map(|(m, _)| *m))
            .or_else(|| self.vtables.get(symbol).copied())
    }

    fn define(&mut self, owner: Option<ModuleId>, module: &IrModule) {
        for func in &module.functions {
            self.functions
                .insert(func.name.clone(), (owner, Arc::new(func.clone())));
        }
        for global in &module.globals {
            self.globals
                .insert(global.name.clone(), (owner, Value::from(global.zero)));
        }
        for vtable in &module.vtables {
            self.vtables.insert(vtable.clone(), owner);
        }
    }

    fn remove(&mut self, symbol: &str) {
        self.functions.remove(symbol);
        self.globals.remove(symbol);
        self.vtables.remove(symbol);
    }
}

enum Flow {
    Normal,
    Return(Option<Value>),
}

struct Frame {
    slots: Vec<Value>,
}

/// IR interpreter standing in for a JIT.
///
/// Symbols defined by loaded modules shadow library symbols of the same
/// name. Externs are not bound when a module is added; every reference is
/// looked up when it executes.
pub struct Jit {
    modules: HashMap<ModuleId, LoadedModule>,
    symbols: SymbolTable,
    library: SymbolTable,
    pending_inits: VecDeque<(ModuleId, IrInitializer)>,
    destructors: Vec<(Option<TransactionId>, String)>,
    output: Arc<Mutex<String>>,
    captured: Option<Value>,
    current_owner: Option<TransactionId>,
    depth: usize,
    max_depth: usize,
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

impl Jit {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            symbols: SymbolTable::default(),
            library: SymbolTable::default(),
            pending_inits: VecDeque::new(),
            destructors: Vec::new(),
            output: Arc::new(Mutex::new(String::new())),
            captured: None,
            current_owner: None,
            depth: 0,
            max_depth: DEFAULT_CALL_DEPTH,
        }
    }

    pub fn with_call_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Shared handle to the `print` buffer.
    pub fn output_handle(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.output)
    }

    pub fn take_output(&self) -> String {
        std::mem::take(&mut *self.output.lock())
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn owner_of(&self, id: ModuleId) -> Option<TransactionId> {
        self.modules.get(&id).map(|m| m.owner)
    }

    /// Current value of a global, if any module or the library defines it.
    pub fn global_value(&self, name: &str) -> Option<Value> {
        self.symbols
            .globals
            .get(name)
            .or_else(|| self.library.globals.get(name))
            .map(|(_, v)| *v)
    }

    pub fn pending_destructors(&self) -> usize {
        self.destructors.len()
    }

    // ==================== Symbols ====================

    fn function(&self, name: &str) -> ExecResult<Arc<IrFunction>> {
        self.symbols
            .functions
            .get(name)
            .or_else(|| self.library.functions.get(name))
            .map(|(_, f)| Arc::clone(f))
            .ok_or_else(|| match self.resolve_symbol(name) {
                Some(_) => ExecError::NotAFunction(name.to_string()),
                None => ExecError::UnresolvedSymbol(name.to_string()),
            })
    }

    fn read_global(&self, name: &str) -> ExecResult<Value> {
        self.global_value(name)
            .ok_or_else(|| ExecError::UnresolvedSymbol(name.to_string()))
    }

    fn write_global(&mut self, name: &str, value: Value) -> ExecResult<()> {
        let slot = match self.symbols.globals.get_mut(name) {
            Some(slot) => slot,
            None => self
                .library
                .globals
                .get_mut(name)
                .ok_or_else(|| ExecError::UnresolvedSymbol(name.to_string()))?,
        };
        slot.1 = value;
        Ok(())
    }

    // ==================== Evaluation ====================

    fn call(&mut self, name: &str, args: Vec<Value>) -> ExecResult<Option<Value>> {
        if name == CAPTURE_FN && !self.symbols.functions.contains_key(name) {
            trace!(value = ?args.first(), "captured value");
            self.captured = args.first().copied();
            return Ok(None);
        }
        let func = self.function(name)?;
        if args.len() != func.params {
            return Err(ExecError::Arity {
                name: name.to_string(),
                expected: func.params,
                found: args.len(),
            });
        }
        if self.depth >= self.max_depth {
            return Err(ExecError::StackOverflow(self.max_depth));
        }
        let mut frame = Frame {
            slots: vec![Value::Int(0); func.slots.max(args.len())],
        };
        for (slot, arg) in frame.slots.iter_mut().zip(args) {
            *slot = arg;
        }
        self.depth += 1;
        let result = self.exec_block(&mut frame, &func.body);
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(None),
        }
    }

    fn exec_block(&mut self, frame: &mut Frame, stmts: &[IrStmt]) -> ExecResult<Flow> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec(frame, stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, frame: &mut Frame, stmt: &IrStmt) -> ExecResult<Flow> {
        match stmt {
            IrStmt::Expr(e) => {
                self.eval(frame, e)?;
                Ok(Flow::Normal)
            }
            IrStmt::Let(slot, e) => {
                let value = self.value(frame, e)?;
                store(frame, *slot, value);
                Ok(Flow::Normal)
            }
            IrStmt::Return(e) => match e {
                Some(e) => Ok(Flow::Return(Some(self.value(frame, e)?))),
                None => Ok(Flow::Return(None)),
            },
            IrStmt::If(cond, then, otherwise) => {
                if self.value(frame, cond)?.as_bool()? {
                    self.exec_block(frame, then)
                } else {
                    self.exec_block(frame, otherwise)
                }
            }
            IrStmt::While(cond, body) => {
                while self.value(frame, cond)?.as_bool()? {
                    if let Flow::Return(value) = self.exec_block(frame, body)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Normal)
            }
            IrStmt::Block(stmts) => self.exec_block(frame, stmts),
        }
    }

    /// Evaluate an expression that must produce a value.
    fn value(&mut self, frame: &mut Frame, expr: &IrExpr) -> ExecResult<Value> {
        match self.eval(frame, expr)? {
            Some(value) => Ok(value),
            None => match expr {
                IrExpr::Call(name, _) => Err(ExecError::MissingReturn(name.clone())),
                _ => Err(ExecError::TypeError {
                    expected: "value",
                    found: "void",
                }),
            },
        }
    }

    fn eval(&mut self, frame: &mut Frame, expr: &IrExpr) -> ExecResult<Option<Value>> {
        let value = match expr {
            IrExpr::Const(c) => Value::from(*c),
            IrExpr::Local(slot) => frame.slots.get(*slot).copied().unwrap_or(Value::Int(0)),
            IrExpr::Global(name) | IrExpr::Lookup(name) => self.read_global(name)?,
            IrExpr::Unary(op, operand) => {
                let v = self.value(frame, operand)?;
                match op {
                    UnaryOp::Neg => Value::Int(v.as_int()?.wrapping_neg()),
                    UnaryOp::Not => Value::Bool(!v.as_bool()?),
                }
            }
            IrExpr::Binary(op, lhs, rhs) => self.binary(frame, *op, lhs, rhs)?,
            IrExpr::StoreLocal(slot, value) => {
                let v = self.value(frame, value)?;
                store(frame, *slot, v);
                v
            }
            IrExpr::StoreGlobal(name, value) => {
                let v = self.value(frame, value)?;
                self.write_global(name, v)?;
                v
            }
            IrExpr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|a| self.value(frame, a))
                    .collect::<ExecResult<Vec<_>>>()?;
                return self.call(name, args);
            }
            IrExpr::Print(value) => {
                let v = self.value(frame, value)?;
                self.output.lock().push_str(&format!("{}\n", v));
                return Ok(None);
            }
            IrExpr::AtExit(name) => {
                self.function(name)?;
                trace!(function = %name, owner = ?self.current_owner, "registered atexit callback");
                self.destructors.push((self.current_owner, name.clone()));
                return Ok(None);
            }
        };
        Ok(Some(value))
    }

    fn binary(&mut self, frame: &mut Frame, op: BinaryOp, lhs: &IrExpr, rhs: &IrExpr) -> ExecResult<Value> {
        if op.is_logical() {
            let l = self.value(frame, lhs)?.as_bool()?;
            let short_circuits = if op == BinaryOp::And { !l } else { l };
            if short_circuits {
                return Ok(Value::Bool(l));
            }
            return Ok(Value::Bool(self.value(frame, rhs)?.as_bool()?));
        }
        let l = self.value(frame, lhs)?;
        let r = self.value(frame, rhs)?;
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => int_op(op, a, b),
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinaryOp::Eq => Ok(Value::Bool(a == b)),
                BinaryOp::NotEq => Ok(Value::Bool(a != b)),
                _ => Err(ExecError::TypeError {
                    expected: "int",
                    found: "bool",
                }),
            },
            (a, b) => Err(ExecError::TypeError {
                expected: a.type_name(),
                found: b.type_name(),
            }),
        }
    }

    fn run_initializer(&mut self, init: &IrInitializer) -> ExecResult<()> {
        let mut frame = Frame { slots: Vec::new() };
        let value = self.value(&mut frame, &init.value)?;
        self.write_global(&init.global, value)
    }

    fn with_owner<T>(&mut self, owner: Option<TransactionId>, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = std::mem::replace(&mut self.current_owner, owner);
        let result = f(self);
        self.current_owner = previous;
        result
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> ExecResult<Value> {
    Ok(match op {
        BinaryOp::Add => Value::Int(a.wrapping_add(b)),
        BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(ExecError::DivisionByZero),
        BinaryOp::Div => Value::Int(a.wrapping_div(b)),
        BinaryOp::Rem => Value::Int(a.wrapping_rem(b)),
        BinaryOp::Eq => Value::Bool(a == b),
        BinaryOp::NotEq => Value::Bool(a != b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::LtEq => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::GtEq => Value::Bool(a >= b),
        BinaryOp::And | BinaryOp::Or => {
            return Err(ExecError::TypeError {
                expected: "bool",
                found: "int",
            })
        }
    })
}

fn store(frame: &mut Frame, slot: usize, value: Value) {
    if slot >= frame.slots.len() {
        frame.slots.resize(slot + 1, Value::Int(0));
    }
    frame.slots[slot] = value;
}

impl Executor for Jit {
    fn add_module(&mut self, owner: TransactionId, module: IrModule) -> ExecResult<()> {
        for symbol in module.defined_symbols() {
            if let Some(Some(existing)) = self.symbols.owner_of(symbol) {
                return Err(ExecError::DuplicateSymbol {
                    symbol: symbol.to_string(),
                    owner: existing,
                });
            }
        }
        for name in &module.externs {
            if self.resolve_symbol(name).is_none() {
                trace!(symbol = %name, module = %module.id, "extern left for lazy resolution");
            }
        }
        self.symbols.define(Some(module.id), &module);
        for init in &module.initializers {
            self.pending_inits.push_back((module.id, init.clone()));
        }
        debug!(module = %module.id, tx = %owner, functions = module.functions.len(), "added module");
        self.modules.insert(
            module.id,
            LoadedModule {
                owner,
                symbols: module.defined_symbols().map(str::to_string).collect(),
            },
        );
        Ok(())
    }

    fn load_library(&mut self, module: IrModule) -> ExecResult<()> {
        for symbol in module.defined_symbols() {
            if self.library.owner_of(symbol).is_some() {
                return Err(ExecError::DuplicateSymbol {
                    symbol: symbol.to_string(),
                    owner: module.id,
                });
            }
        }
        self.library.define(None, &module);
        self.with_owner(None, |jit| {
            module.initializers.iter().try_for_each(|init| jit.run_initializer(init))
        })?;
        debug!(module = %module.id, functions = module.functions.len(), "loaded library artifact");
        Ok(())
    }

    fn run_static_initializers_once(&mut self) -> ExecResult<()> {
        while let Some((module, init)) = self.pending_inits.pop_front() {
            let owner = self.modules.get(&module).map(|m| m.owner);
            trace!(%module, global = %init.global, "running static initializer");
            self.with_owner(owner, |jit| jit.run_initializer(&init))?;
        }
        Ok(())
    }

    fn resolve_symbol(&self, name: &str) -> Option<SymbolKind> {
        let lookup = |table: &SymbolTable| {
            if table.functions.contains_key(name) {
                Some(SymbolKind::Function)
            } else if table.globals.contains_key(name) {
                Some(SymbolKind::Global)
            } else if table.vtables.contains_key(name) {
                Some(SymbolKind::VTable)
            } else {
                None
            }
        };
        lookup(&self.symbols)
            .or_else(|| lookup(&self.library))
            .or_else(|| (name == CAPTURE_FN).then_some(SymbolKind::Builtin))
    }

    fn run_function(&mut self, owner: TransactionId, name: &str) -> ExecResult<Option<Value>> {
        self.depth = 0;
        self.with_owner(Some(owner), |jit| jit.call(name, Vec::new()))
    }

    fn take_captured(&mut self) -> Option<Value> {
        self.captured.take()
    }

    fn run_and_remove_static_destructors(&mut self, owner: TransactionId) -> ExecResult<usize> {
        let mut mine = Vec::new();
        self.destructors.retain(|(o, name)| {
            if *o == Some(owner) {
                mine.push(name.clone());
                false
            } else {
                true
            }
        });
        let mut first_error = None;
        for name in mine.iter().rev() {
            trace!(function = %name, tx = %owner, "running static destructor");
            self.depth = 0;
            if let Err(err) = self.with_owner(Some(owner), |jit| jit.call(name, Vec::new())) {
                warn!(function = %name, tx = %owner, error = %err, "static destructor failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(mine.len()),
        }
    }

    fn remove_module(&mut self, id: ModuleId) -> bool {
        let Some(loaded) = self.modules.remove(&id) else {
            return false;
        };
        for symbol in &loaded.symbols {
            self.symbols.remove(symbol);
        }
        self.pending_inits.retain(|(module, _)| *module != id);
        debug!(module = %id, tx = %loaded.owner, "removed module");
        true
    }
}
