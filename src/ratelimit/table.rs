//! Identity to state map shared by the algorithm engines.
//!
//! Locking is two-level. The sharded map is only held long enough to look up
//! or insert an identity's cell; the algorithm's read-modify-write then runs
//! under that cell's own mutex. A lifecycle lock keeps insertion and shutdown
//! from interleaving, so nothing can be created after the table is closed.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

/// Per-identity record held by an [`IdentityTable`].
pub(crate) trait IdentityState: Send + 'static {
    /// Stop anything the state owns besides memory. Called exactly once, with
    /// the state's lock held, before the table lets go of it.
    fn release(&mut self) {}
}

/// Shared handle to one identity's state.
pub(crate) type Cell<S> = Arc<Mutex<S>>;

pub(crate) struct IdentityTable<S> {
    cells: DashMap<String, Cell<S>>,
    closed: RwLock<bool>,
}

impl<S: IdentityState> IdentityTable<S> {
    pub(crate) fn new() -> Self {
        Self {
            cells: DashMap::new(),
            closed: RwLock::new(false),
        }
    }

    /// Fetch the identity's cell, building it with `create` on first sight.
    ///
    /// Returns `None` once the table has been closed.
    pub(crate) fn get_or_create<F>(&self, identity: &str, create: F) -> Option<Cell<S>>
    where
        F: FnOnce() -> S,
    {
        self.get_or_create_cell(identity, || Arc::new(Mutex::new(create())))
    }

    /// Like [`IdentityTable::get_or_create`], for states that need a handle
    /// to their own cell while being built.
    pub(crate) fn get_or_create_cell<F>(&self, identity: &str, create: F) -> Option<Cell<S>>
    where
        F: FnOnce() -> Cell<S>,
    {
        let closed = self.closed.read();
        if *closed {
            return None;
        }

        if let Some(cell) = self.cells.get(identity) {
            return Some(Arc::clone(cell.value()));
        }

        let cell = self
            .cells
            .entry(identity.to_string())
            .or_insert_with(|| {
                debug!(identity = %identity, "Creating identity state");
                create()
            });
        Some(Arc::clone(cell.value()))
    }

    /// Remove and release one identity. Returns whether it existed.
    pub(crate) fn remove(&self, identity: &str) -> bool {
        let closed = self.closed.read();
        if *closed {
            return false;
        }

        match self.cells.remove(identity) {
            Some((_, cell)) => {
                cell.lock().release();
                debug!(identity = %identity, "Forgot identity state");
                true
            }
            None => false,
        }
    }

    /// Close the table and release every identity.
    ///
    /// Returns the number of identities released, or `None` if the table was
    /// already closed.
    pub(crate) fn close(&self) -> Option<usize> {
        let mut closed = self.closed.write();
        if *closed {
            return None;
        }
        *closed = true;

        let cells: Vec<Cell<S>> = self
            .cells
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.cells.clear();

        for cell in &cells {
            cell.lock().release();
        }
        Some(cells.len())
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Copy a view of every identity. Each cell is locked only while `view`
    /// runs on it.
    pub(crate) fn collect<T, F>(&self, mut view: F) -> Vec<(String, T)>
    where
        F: FnMut(&S) -> T,
    {
        let cells: Vec<(String, Cell<S>)> = self
            .cells
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        cells
            .into_iter()
            .map(|(identity, cell)| {
                let stats = view(&*cell.lock());
                (identity, stats)
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, identity: &str) -> Option<Cell<S>> {
        self.cells.get(identity).map(|cell| Arc::clone(cell.value()))
    }
}

impl<S: IdentityState> Default for IdentityTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: IdentityState> std::fmt::Debug for IdentityTable<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTable")
            .field("identities", &self.cells.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        hits: u64,
        released: bool,
    }

    impl IdentityState for Probe {
        fn release(&mut self) {
            self.released = true;
        }
    }

    #[test]
    fn test_state_created_once_per_identity() {
        let table: IdentityTable<Probe> = IdentityTable::new();

        let first = table.get_or_create("alice", Probe::default).unwrap();
        first.lock().hits += 1;
        let again = table.get_or_create("alice", || panic!("must reuse state")).unwrap();
        assert_eq!(again.lock().hits, 1);

        table.get_or_create("bob", Probe::default).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_releases_state() {
        let table: IdentityTable<Probe> = IdentityTable::new();
        let cell = table.get_or_create("alice", Probe::default).unwrap();

        assert!(table.remove("alice"));
        assert!(cell.lock().released);
        assert!(!table.remove("alice"));
        assert!(!table.remove("never-seen"));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_close_releases_everything_once() {
        let table: IdentityTable<Probe> = IdentityTable::new();
        let a = table.get_or_create("a", Probe::default).unwrap();
        let b = table.get_or_create("b", Probe::default).unwrap();

        assert_eq!(table.close(), Some(2));
        assert!(a.lock().released);
        assert!(b.lock().released);
        assert!(table.is_closed());
        assert_eq!(table.close(), None);

        assert!(table.get_or_create("c", Probe::default).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_collect_copies_views() {
        let table: IdentityTable<Probe> = IdentityTable::new();
        table.get_or_create("a", Probe::default).unwrap().lock().hits = 3;
        table.get_or_create("b", Probe::default).unwrap().lock().hits = 7;

        let mut views = table.collect(|probe| probe.hits);
        views.sort();
        assert_eq!(views, vec![("a".to_string(), 3), ("b".to_string(), 7)]);
    }
}
