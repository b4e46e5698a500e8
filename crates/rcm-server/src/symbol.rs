//! Function symbol table.
//!
//! Symbols live in fixed-size tables. Table 0 holds the static symbols given
//! at server creation; tables 1..=8 are allocated on demand with doubling
//! capacities (32, 64, ..., 4096).
//!
//! A function index is a `u32`:
//! ```text
//!  31 | 30 ........ 16 | 15 .... 12 | 11 ........ 0
//!  S  | generation key | table      | slot
//! ```
//! Static indices set `S` and carry only the slot. Dynamic indices embed the
//! slot's generation key, so an index captured before a symbol was removed
//! stops resolving even when the slot is reused.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{RcmError, Result};

/// A callable registered under a symbol name.
///
/// The function reads and may rewrite the packet payload in place; the
/// return value is copied into the packet result (negative means failure).
pub type MsgFn = Arc<dyn Fn(&mut BytesMut) -> i32 + Send + Sync>;

/// Largest static table.
pub const MAX_STATIC_SYMBOLS: usize = SLOT_MASK as usize + 1;

/// Number of dynamic tables that can be allocated.
pub const MAX_DYNAMIC_TABLES: usize = 8;

const STATIC_FLAG: u32 = 0x8000_0000;
const KEY_SHIFT: u32 = 16;
const KEY_MASK: u32 = 0x7FFF;
const TABLE_SHIFT: u32 = 12;
const TABLE_MASK: u32 = 0xF;
const SLOT_MASK: u32 = 0xFFF;
const FIRST_TABLE_SIZE: usize = 32;

/// Keys count down from here; 0 means "unset" and is never issued.
const KEY_MAX: u16 = KEY_MASK as u16;

/// A named function for the static symbol table.
#[derive(Clone)]
pub struct FxnDesc {
    pub name: String,
    pub fxn: MsgFn,
}

impl FxnDesc {
    pub fn new<F>(name: impl Into<String>, fxn: F) -> Self
    where
        F: Fn(&mut BytesMut) -> i32 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            fxn: Arc::new(fxn),
        }
    }
}

impl fmt::Debug for FxnDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FxnDesc")
            .field("name", &self.name)
            .field("fxn", &format_args!("<fn>"))
            .finish()
    }
}

enum Slot {
    Empty,
    Occupied { name: String, fxn: MsgFn, key: u16 },
}

impl Slot {
    fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

struct Tables {
    statics: Vec<FxnDesc>,
    /// `dynamic[i]` is table `i + 1`.
    dynamic: Vec<Vec<Slot>>,
    by_name: HashMap<String, u32>,
    next_key: u16,
}

impl Tables {
    fn issue_key(&mut self) -> u16 {
        let key = self.next_key;
        self.next_key = if key <= 1 { KEY_MAX } else { key - 1 };
        key
    }

    fn first_free_slot(&mut self) -> Result<(usize, usize)> {
        for (table, slots) in self.dynamic.iter().enumerate() {
            if let Some(slot) = slots.iter().position(Slot::is_empty) {
                return Ok((table, slot));
            }
        }

        if self.dynamic.len() == MAX_DYNAMIC_TABLES {
            return Err(RcmError::SymbolTableFull);
        }
        let size = FIRST_TABLE_SIZE << self.dynamic.len();
        self.dynamic
            .push(std::iter::repeat_with(|| Slot::Empty).take(size).collect());
        debug!(table = self.dynamic.len(), size, "allocated symbol table");
        Ok((self.dynamic.len() - 1, 0))
    }
}

/// Thread-safe symbol table. One lock covers add, remove and resolve.
pub struct SymbolTable {
    tables: Mutex<Tables>,
}

impl SymbolTable {
    /// Build a table whose static part holds `fxns` in order.
    pub fn new(fxns: Vec<FxnDesc>) -> Result<Self> {
        if fxns.len() > MAX_STATIC_SYMBOLS {
            return Err(RcmError::InvalidArgument(format!(
                "too many static symbols ({}, max {MAX_STATIC_SYMBOLS})",
                fxns.len()
            )));
        }

        let mut by_name = HashMap::with_capacity(fxns.len());
        for (slot, desc) in fxns.iter().enumerate() {
            if desc.name.is_empty() {
                return Err(RcmError::InvalidArgument(
                    "symbol name must not be empty".to_string(),
                ));
            }
            if by_name
                .insert(desc.name.clone(), static_index(slot))
                .is_some()
            {
                return Err(RcmError::InvalidArgument(format!(
                    "duplicate static symbol '{}'",
                    desc.name
                )));
            }
        }

        Ok(Self {
            tables: Mutex::new(Tables {
                statics: fxns,
                dynamic: Vec::new(),
                by_name,
                next_key: KEY_MAX,
            }),
        })
    }

    /// Register a dynamic symbol and return its function index.
    pub fn add(&self, name: &str, fxn: MsgFn) -> Result<u32> {
        if name.is_empty() {
            return Err(RcmError::InvalidArgument(
                "symbol name must not be empty".to_string(),
            ));
        }

        let mut tables = self.tables.lock();
        if tables.by_name.contains_key(name) {
            return Err(RcmError::InvalidArgument(format!(
                "symbol '{name}' already registered"
            )));
        }

        let (table, slot) = tables.first_free_slot()?;
        let key = tables.issue_key();
        tables.dynamic[table][slot] = Slot::Occupied {
            name: name.to_string(),
            fxn,
            key,
        };

        let index = dynamic_index(key, table + 1, slot);
        tables.by_name.insert(name.to_string(), index);
        debug!(name, index = format_args!("{index:#010x}"), "added symbol");
        Ok(index)
    }

    /// Remove a dynamic symbol, freeing its slot for reuse.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let index = *tables
            .by_name
            .get(name)
            .ok_or_else(|| RcmError::SymbolNotFound(name.to_string()))?;
        if is_static_index(index) {
            return Err(RcmError::SymbolIsStatic(name.to_string()));
        }

        let (table, slot) = table_and_slot(index);
        let removed = std::mem::replace(&mut tables.dynamic[table - 1][slot], Slot::Empty);
        debug_assert!(matches!(&removed, Slot::Occupied { name: stored, .. } if stored == name));
        tables.by_name.remove(name);
        debug!(name, index = format_args!("{index:#010x}"), "removed symbol");
        Ok(())
    }

    /// Resolve a function index to its callable.
    pub fn resolve(&self, index: u32) -> Result<MsgFn> {
        let tables = self.tables.lock();

        if is_static_index(index) {
            return tables
                .statics
                .get((index & !STATIC_FLAG) as usize)
                .map(|desc| desc.fxn.clone())
                .ok_or(RcmError::InvalidFunctionIndex(index));
        }

        let key = ((index >> KEY_SHIFT) & KEY_MASK) as u16;
        let (table, slot) = table_and_slot(index);
        if table == 0 {
            return Err(RcmError::InvalidFunctionIndex(index));
        }

        match tables.dynamic.get(table - 1).and_then(|slots| slots.get(slot)) {
            Some(Slot::Occupied {
                fxn, key: stored, ..
            }) if *stored == key => Ok(fxn.clone()),
            _ => Err(RcmError::InvalidFunctionIndex(index)),
        }
    }

    /// Function index currently registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<u32> {
        self.tables
            .lock()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| RcmError::SymbolNotFound(name.to_string()))
    }

    /// Static symbols with their indices, in table order.
    pub fn static_symbols(&self) -> Vec<(String, u32)> {
        let tables = self.tables.lock();
        tables
            .statics
            .iter()
            .enumerate()
            .map(|(slot, desc)| (desc.name.clone(), static_index(slot)))
            .collect()
    }

    /// Number of registered symbols (static and dynamic).
    pub fn len(&self) -> usize {
        self.tables.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dynamic tables allocated so far.
    pub fn dynamic_tables(&self) -> usize {
        self.tables.lock().dynamic.len()
    }
}

/// Returns true if the index names a static symbol.
pub fn is_static_index(index: u32) -> bool {
    index & STATIC_FLAG != 0
}

fn static_index(slot: usize) -> u32 {
    STATIC_FLAG | slot as u32
}

fn dynamic_index(key: u16, table: usize, slot: usize) -> u32 {
    ((key as u32 & KEY_MASK) << KEY_SHIFT) | ((table as u32) << TABLE_SHIFT) | slot as u32
}

fn table_and_slot(index: u32) -> (usize, usize) {
    (
        ((index >> TABLE_SHIFT) & TABLE_MASK) as usize,
        (index & SLOT_MASK) as usize,
    )
}
