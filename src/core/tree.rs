//! Directory tree index
//!
//! The table only stores parent pointers. This index maps every parent id to
//! its live children, kept in table order so the first of two same-named
//! siblings always wins. It is built once on open and updated in place on
//! every mutation.

use crate::error::{BafError, Result};
use crate::name::{ArchivePath, ItemName};
use crate::table::{Entry, FileTable, SlotRef, ROOT};
use std::collections::{btree_set, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct DirectoryTree {
    children: HashMap<u64, BTreeSet<SlotRef>>,
}

impl DirectoryTree {
    /// Index every live entry of `table` under its parent
    ///
    /// Fails with `Format` if parent pointers form a cycle. Entries whose
    /// parent is missing are indexed but unreachable from the root.
    pub fn build(table: &FileTable) -> Result<Self> {
        check_parent_cycles(table)?;

        let mut tree = DirectoryTree::default();
        for (slot, entry) in table.entries() {
            tree.insert(entry.parent, slot);
        }

        Ok(tree)
    }

    pub fn insert(&mut self, parent: u64, slot: SlotRef) {
        self.children.entry(parent).or_default().insert(slot);
    }

    pub fn remove(&mut self, parent: u64, slot: SlotRef) {
        if let Some(children) = self.children.get_mut(&parent) {
            children.remove(&slot);
            if children.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    pub fn reparent(&mut self, old_parent: u64, new_parent: u64, slot: SlotRef) {
        self.remove(old_parent, slot);
        self.insert(new_parent, slot);
    }

    pub fn has_children(&self, id: u64) -> bool {
        self.children.get(&id).is_some_and(|c| !c.is_empty())
    }

    /// Live children of `parent` in table order
    pub fn children<'a>(&'a self, table: &'a FileTable, parent: u64) -> Children<'a> {
        Children {
            table,
            slots: self.children.get(&parent).map(|slots| slots.iter()),
        }
    }

    /// First child of `parent` named `name` in table order
    pub fn find_child<'a>(
        &'a self,
        table: &'a FileTable,
        parent: u64,
        name: &str,
    ) -> Option<&'a Entry> {
        self.children(table, parent)
            .find(|entry| entry.name.as_str() == name)
    }

    /// Resolve a path to an id; the root path resolves to [`ROOT`]
    pub fn resolve(&self, table: &FileTable, path: &ArchivePath) -> Result<u64> {
        let mut current = ROOT;

        for component in path.components() {
            if current != ROOT && !table.get(current).is_some_and(Entry::is_dir) {
                return Err(BafError::NotFound(format!(
                    "{}: {} is not a directory",
                    path,
                    table.get(current).map_or("?", |e| e.name.as_str())
                )));
            }

            current = self
                .find_child(table, current, component.as_str())
                .map(|entry| entry.id)
                .ok_or_else(|| BafError::NotFound(path.to_string()))?;
        }

        Ok(current)
    }

    /// Path of a live entry reachable from the root
    pub fn path_of(&self, table: &FileTable, id: u64) -> Result<ArchivePath> {
        let mut names = Vec::new();
        let mut current = id;

        while current != ROOT {
            let entry = table
                .get(current)
                .ok_or_else(|| BafError::NotFound(format!("No live entry with id {}", id)))?;

            if current != id && !entry.is_dir() {
                return Err(BafError::NotFound(format!(
                    "Entry {} hangs below file {}",
                    id, current
                )));
            }

            // Cycles are rejected on open and on move
            if names.len() > table.len() {
                return Err(BafError::Format(format!("Parent cycle above {}", id)));
            }

            names.push(entry.name.clone());
            current = entry.parent;
        }

        names.reverse();
        Ok(names.into_iter().collect())
    }

    /// Is `ancestor` on the parent chain of `id` (or `id` itself)?
    pub fn is_ancestor(table: &FileTable, ancestor: u64, id: u64) -> bool {
        let mut current = id;

        for _ in 0..=table.len() {
            if current == ancestor {
                return true;
            }
            if current == ROOT {
                return false;
            }
            match table.get(current) {
                Some(entry) => current = entry.parent,
                None => return false,
            }
        }

        false
    }

    /// Depth-first walk from the root, children in table order
    pub fn walk<'a>(&'a self, table: &'a FileTable) -> Walk<'a> {
        let mut walk = Walk {
            tree: self,
            table,
            stack: Vec::new(),
        };
        walk.push_children(&ArchivePath::root(), ROOT);
        walk
    }

    /// Names used by more than one live child of the same parent
    pub fn duplicate_names(&self, table: &FileTable) -> Vec<(u64, ItemName)> {
        let mut duplicates = Vec::new();

        let mut parents: Vec<_> = self.children.keys().copied().collect();
        parents.sort_unstable();

        for parent in parents {
            let mut seen = HashSet::new();
            let mut reported = HashSet::new();

            for entry in self.children(table, parent) {
                if !seen.insert(&entry.name) && reported.insert(&entry.name) {
                    duplicates.push((parent, entry.name.clone()));
                }
            }
        }

        duplicates
    }

    /// Live entries that cannot be reached from the root
    pub fn orphans<'a>(&self, table: &'a FileTable) -> Vec<&'a Entry> {
        let reachable: HashSet<u64> = self.walk(table).map(|(_, entry)| entry.id).collect();

        table
            .entries()
            .map(|(_, entry)| entry)
            .filter(|entry| !reachable.contains(&entry.id))
            .collect()
    }
}

fn check_parent_cycles(table: &FileTable) -> Result<()> {
    let mut settled = HashSet::new();

    for (_, entry) in table.entries() {
        let mut trail = HashSet::new();
        let mut current = entry.id;

        while current != ROOT && !settled.contains(&current) {
            if !trail.insert(current) {
                return Err(BafError::Format(format!(
                    "Parent cycle through entry {}",
                    current
                )));
            }

            match table.get(current) {
                Some(e) => current = e.parent,
                None => break,
            }
        }

        settled.extend(trail);
    }

    Ok(())
}

/// Children of one directory, see [`DirectoryTree::children`]
///
/// Iterates a snapshot of the index; clone it to start over.
#[derive(Clone)]
pub struct Children<'a> {
    table: &'a FileTable,
    slots: Option<btree_set::Iter<'a, SlotRef>>,
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let slots = self.slots.as_mut()?;
        loop {
            let slot = slots.next()?;
            if let Some(entry) = self.table.entry_at(*slot) {
                return Some(entry);
            }
        }
    }
}

/// Depth-first traversal, see [`DirectoryTree::walk`]
pub struct Walk<'a> {
    tree: &'a DirectoryTree,
    table: &'a FileTable,
    stack: Vec<(ArchivePath, &'a Entry)>,
}

impl<'a> Walk<'a> {
    fn push_children(&mut self, path: &ArchivePath, parent: u64) {
        let children: Vec<_> = self.tree.children(self.table, parent).collect();
        for entry in children.into_iter().rev() {
            self.stack.push((path.join(entry.name.clone()), entry));
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (ArchivePath, &'a Entry);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, entry) = self.stack.pop()?;
        if entry.is_dir() {
            self.push_children(&path, entry.id);
        }
        Some((path, entry))
    }
}
