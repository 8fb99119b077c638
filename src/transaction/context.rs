//! The transaction record.
//!
//! A transaction describes one unit of incremental compilation: the
//! declaration groups a fragment produced, the transactions nested inside
//! it, and what it contributed to code generation. Records live in a
//! [`super::TransactionPool`] and are addressed by [`TransactionId`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::group::{DeclGroup, DeclGroupKind};
use super::options::CompilationOptions;
use super::state::{IssuedDiags, TransactionState};
use crate::codegen::ModuleId;
use crate::sema::DeclId;

/// Generational handle to a pooled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    index: u32,
    generation: u32,
}

impl TransactionId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}.{}", self.index, self.generation)
    }
}

/// Identity used to correlate log lines for one use of a record.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    pub ulid: String,
    pub opened_at: DateTime<Utc>,
}

impl TransactionMetadata {
    fn fresh() -> Self {
        Self {
            ulid: Ulid::new().to_string().to_lowercase(),
            opened_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    decl_groups: Vec<DeclGroup>,
    deserialized_groups: Vec<DeclGroup>,
    nested: Vec<TransactionId>,
    parent: Option<TransactionId>,
    next: Option<TransactionId>,
    issued_diags: IssuedDiags,
    options: CompilationOptions,
    wrapper: Option<DeclId>,
    module: Option<ModuleId>,
    metadata: TransactionMetadata,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, options: CompilationOptions) -> Self {
        Self {
            id,
            state: TransactionState::Collecting,
            decl_groups: Vec::new(),
            deserialized_groups: Vec::new(),
            nested: Vec::new(),
            parent: None,
            next: None,
            issued_diags: IssuedDiags::None,
            options,
            wrapper: None,
            module: None,
            metadata: TransactionMetadata::fresh(),
        }
    }

    /// Put a recycled record back into its initial state, keeping buffers.
    pub(crate) fn reset(&mut self, id: TransactionId, options: CompilationOptions) {
        self.id = id;
        self.state = TransactionState::Collecting;
        self.decl_groups.clear();
        self.deserialized_groups.clear();
        self.nested.clear();
        self.parent = None;
        self.next = None;
        self.issued_diags = IssuedDiags::None;
        self.options = options;
        self.wrapper = None;
        self.module = None;
        self.metadata = TransactionMetadata::fresh();
    }

    pub(crate) fn clear(&mut self) {
        self.reset(self.id, CompilationOptions::default());
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn options(&self) -> &CompilationOptions {
        &self.options
    }

    pub fn issued_diags(&self) -> IssuedDiags {
        self.issued_diags
    }

    pub fn merge_diags(&mut self, diags: IssuedDiags) {
        self.issued_diags = self.issued_diags.merge(diags);
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.metadata
    }

    // ==================== Groups ====================

    pub fn append_group(&mut self, group: DeclGroup) {
        if !group.is_empty() {
            self.decl_groups.push(group);
        }
    }

    pub fn append_deserialized_group(&mut self, group: DeclGroup) {
        if !group.is_empty() {
            self.deserialized_groups.push(group);
        }
    }

    pub fn groups(&self) -> &[DeclGroup] {
        &self.decl_groups
    }

    pub fn groups_mut(&mut self) -> &mut Vec<DeclGroup> {
        &mut self.decl_groups
    }

    pub fn deserialized_groups(&self) -> &[DeclGroup] {
        &self.deserialized_groups
    }

    /// Every declaration in the transaction's own groups, in order.
    pub fn decls(&self) -> impl Iterator<Item = DeclId> + '_ {
        self.decl_groups
            .iter()
            .chain(self.deserialized_groups.iter())
            .flat_map(|g| g.decls.iter().copied())
    }

    pub fn contains_decl(&self, decl: DeclId) -> bool {
        self.decls().any(|d| d == decl)
    }

    /// No groups of either kind and no nested transactions.
    pub fn is_empty(&self) -> bool {
        self.decl_groups.is_empty() && self.deserialized_groups.is_empty() && self.nested.is_empty()
    }

    // ==================== Links ====================

    pub fn nested(&self) -> &[TransactionId] {
        &self.nested
    }

    pub(crate) fn add_nested(&mut self, child: TransactionId) {
        self.nested.push(child);
    }

    pub(crate) fn remove_nested(&mut self, child: TransactionId) -> bool {
        let before = self.nested.len();
        self.nested.retain(|c| *c != child);
        before != self.nested.len()
    }

    pub fn parent(&self) -> Option<TransactionId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<TransactionId>) {
        self.parent = parent;
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// The transaction committed after this one, in global order.
    pub fn next(&self) -> Option<TransactionId> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<TransactionId>) {
        self.next = next;
    }

    // ==================== Code ====================

    pub fn wrapper(&self) -> Option<DeclId> {
        self.wrapper
    }

    pub fn set_wrapper(&mut self, wrapper: Option<DeclId>) {
        self.wrapper = wrapper;
    }

    pub fn module(&self) -> Option<ModuleId> {
        self.module
    }

    pub(crate) fn set_module(&mut self, module: Option<ModuleId>) {
        self.module = module;
    }
}

/// Serializable view of a transaction tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub ulid: String,
    pub opened_at: DateTime<Utc>,
    pub state: TransactionState,
    pub issued_diags: IssuedDiags,
    pub groups: Vec<DeclGroupKind>,
    pub deserialized_groups: usize,
    pub wrapper: Option<DeclId>,
    pub module: Option<ModuleId>,
    pub nested: Vec<TransactionSummary>,
}

impl TransactionSummary {
    pub(crate) fn of(tx: &Transaction, nested: Vec<TransactionSummary>) -> Self {
        Self {
            id: tx.id,
            ulid: tx.metadata.ulid.clone(),
            opened_at: tx.metadata.opened_at,
            state: tx.state,
            issued_diags: tx.issued_diags,
            groups: tx.decl_groups.iter().map(|g| g.kind).collect(),
            deserialized_groups: tx.deserialized_groups.len(),
            wrapper: tx.wrapper,
            module: tx.module,
            nested,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
