//! Live executions, at most one per cell and one per notebook.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use super::cell::CellExecution;
use super::notebook::NotebookExecution;
use crate::error::{Error, Result};
use crate::ids::CellHandle;

/// Identity of a cell across notebooks.
pub(crate) type CellKey = (String, CellHandle);

#[derive(Default)]
pub(crate) struct ExecutionLedger {
    inner: Mutex<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    cells: FxHashMap<CellKey, CellExecution>,
    notebooks: FxHashMap<String, NotebookExecution>,
}

impl ExecutionLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert the execution built by `create` unless the cell already has
    /// one. Check and insert happen under one lock.
    pub(crate) fn insert_cell(
        &self,
        key: CellKey,
        create: impl FnOnce() -> CellExecution,
    ) -> Result<CellExecution> {
        let mut inner = self.lock();
        if inner.cells.contains_key(&key) {
            return Err(Error::DuplicateExecution(format!(
                "cell {} of {}",
                key.1, key.0
            )));
        }
        let execution = create();
        inner.cells.insert(key, execution.clone());
        Ok(execution)
    }

    pub(crate) fn insert_notebook(
        &self,
        uri: &str,
        create: impl FnOnce() -> NotebookExecution,
    ) -> Result<NotebookExecution> {
        let mut inner = self.lock();
        if inner.notebooks.contains_key(uri) {
            return Err(Error::DuplicateExecution(format!("notebook {}", uri)));
        }
        if inner.cells.keys().any(|(notebook, _)| notebook == uri) {
            return Err(Error::ExecutionOverlap(uri.to_string()));
        }
        let execution = create();
        inner.notebooks.insert(uri.to_string(), execution.clone());
        Ok(execution)
    }

    pub(crate) fn cell(&self, key: &CellKey) -> Option<CellExecution> {
        self.lock().cells.get(key).cloned()
    }

    pub(crate) fn notebook(&self, uri: &str) -> Option<NotebookExecution> {
        self.lock().notebooks.get(uri).cloned()
    }

    pub(crate) fn remove_cell(&self, key: &CellKey) {
        self.lock().cells.remove(key);
    }

    pub(crate) fn remove_notebook(&self, uri: &str) {
        self.lock().notebooks.remove(uri);
    }

    pub(crate) fn live_cells(&self) -> usize {
        self.lock().cells.len()
    }
}
