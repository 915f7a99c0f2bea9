//! String interning for node and stream names.

use std::collections::HashMap;

/// Append-only set of unique names. Index 0 means "no name".
#[derive(Debug, Clone)]
pub struct NameTable {
    names: Vec<String>,
}

impl NameTable {
    pub fn get(&self, index: u32) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.names.get(index as usize).map(String::as_str)
    }

    /// Number of distinct names, the reserved slot excluded.
    pub fn len(&self) -> usize {
        self.names.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Construction-time side of [`NameTable`]. The reverse lookup map is dropped
/// by [`NameTableBuilder::finish`].
#[derive(Debug)]
pub struct NameTableBuilder {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl Default for NameTableBuilder {
    fn default() -> Self {
        Self {
            names: vec![String::new()],
            index: HashMap::with_capacity(128 * 1024),
        }
    }
}

impl NameTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate or retrieve the index of `name`.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(i) = self.index.get(name) {
            return *i;
        }
        let i = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), i);
        i
    }

    pub fn finish(self) -> NameTable {
        NameTable { names: self.names }
    }
}
