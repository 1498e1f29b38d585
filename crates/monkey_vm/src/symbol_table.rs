//! Lexically nested symbol resolution, with free-variable promotion for
//! closures. Mirrors the source's `SymbolTable{outer, store, numDefinitions}`
//! chain, plus the Free/Builtin scopes the source's visible revision had not
//! yet grown.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The pseudo-entry `defineFunctionName` installs inside a function's own
    /// scope so that references to its own (let-bound) name inside its body
    /// resolve to `CurrentClosure` instead of `GetGlobal`/`GetLocal`.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub outer: Option<Box<SymbolTable>>,
    store: FxHashMap<String, Symbol>,
    pub num_definitions: usize,
    pub free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        SymbolTable { outer: Some(Box::new(outer)), ..Self::default() }
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_none() { SymbolScope::Global } else { SymbolScope::Local };
        let symbol = Symbol { name: name.to_string(), scope, index: self.num_definitions };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol { name: name.to_string(), scope: SymbolScope::Builtin, index };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Binds `name` to the function currently being compiled, so a reference
    /// to its own name inside its body resolves here rather than falling
    /// through to an outer (or nonexistent) global/local slot.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol { name: name.to_string(), scope: SymbolScope::Function, index: 0 };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Searches this scope, then recurses into `outer` on a miss. A hit in
    /// an outer scope that isn't Global or Builtin crosses a function
    /// boundary and is promoted to Free in every scope between there and
    /// here.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.store.get(name) {
            return Some(sym.clone());
        }
        let resolved = self.outer.as_mut()?.resolve(name)?;
        match resolved.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(resolved),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::Function => {
                Some(self.define_free(resolved))
            }
        }
    }
}
