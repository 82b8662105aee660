//! Interned names and method keys

use std::collections::HashMap;
use std::fmt;

/// Interned string handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

/// String interner shared by every front-end
#[derive(Debug, Default, Clone)]
pub struct Interner {
    by_text: HashMap<String, Symbol>,
    texts: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> Symbol {
        if let Some(sym) = self.by_text.get(text) {
            return *sym;
        }
        let sym = Symbol(self.texts.len() as u32);
        self.texts.push(text.to_string());
        self.by_text.insert(text.to_string(), sym);
        sym
    }

    /// Look up without interning
    pub fn get(&self, text: &str) -> Option<Symbol> {
        self.by_text.get(text).copied()
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.texts.get(sym.0 as usize).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Identity of a compiled method: owner class, name and original descriptor
///
/// The descriptor is always the pre-weave JVM descriptor, so the key of a
/// target is stable across passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// Internal class name (`com/example/Foo`)
    pub owner: Symbol,
    pub name: Symbol,
    pub descriptor: Symbol,
}

impl MethodKey {
    pub fn new(interner: &mut Interner, owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            owner: interner.intern(owner),
            name: interner.intern(name),
            descriptor: interner.intern(descriptor),
        }
    }

    /// Key of the same name and descriptor in another class
    pub fn with_owner(self, owner: Symbol) -> Self {
        Self { owner, ..self }
    }

    pub fn display<'a>(&self, interner: &'a Interner) -> MethodKeyDisplay<'a> {
        MethodKeyDisplay {
            key: *self,
            interner,
        }
    }
}

pub struct MethodKeyDisplay<'a> {
    key: MethodKey,
    interner: &'a Interner,
}

impl fmt::Display for MethodKeyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{}",
            self.interner.resolve(self.key.owner).replace('/', "."),
            self.interner.resolve(self.key.name),
            self.interner.resolve(self.key.descriptor)
        )
    }
}
