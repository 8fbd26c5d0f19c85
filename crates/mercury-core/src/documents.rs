//! Notebook documents as seen by kernels.
//!
//! The document model itself lives elsewhere; this module only defines the
//! lookups the registry needs ([`NotebookDocuments`]) plus an in-memory
//! [`DocumentStore`] implementation.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::ids::CellHandle;

/// Index value of a cell that is no longer part of its notebook.
const REMOVED_INDEX: i64 = -1;

/// Lookup of live notebooks, cells and renderer surfaces.
pub trait NotebookDocuments: Send + Sync {
    /// Resolve a notebook by URI.
    fn document(&self, uri: &str) -> Option<NotebookDocument>;

    /// Resolve a live cell of a notebook.
    fn cell(&self, uri: &str, handle: CellHandle) -> Option<NotebookCell> {
        self.document(uri)?.cell(handle)
    }

    /// Resolve a renderer surface (an editor showing a notebook) by id.
    fn surface(&self, id: &str) -> Option<NotebookSurface>;
}

/// A cell within a notebook.
///
/// Cheap to clone; clones observe the same live index.
#[derive(Debug, Clone)]
pub struct NotebookCell {
    inner: Arc<CellInner>,
}

#[derive(Debug)]
struct CellInner {
    handle: CellHandle,
    notebook_uri: String,
    index: AtomicI64,
}

impl NotebookCell {
    fn new(handle: CellHandle, notebook_uri: &str, index: usize) -> Self {
        Self {
            inner: Arc::new(CellInner {
                handle,
                notebook_uri: notebook_uri.to_string(),
                index: AtomicI64::new(index as i64),
            }),
        }
    }

    pub fn handle(&self) -> CellHandle {
        self.inner.handle
    }

    pub fn notebook_uri(&self) -> &str {
        &self.inner.notebook_uri
    }

    /// Current position in the notebook, `None` once the cell was removed.
    pub fn index(&self) -> Option<usize> {
        let index = self.inner.index.load(Ordering::Acquire);
        usize::try_from(index).ok()
    }

    pub fn is_removed(&self) -> bool {
        self.index().is_none()
    }

    fn set_index(&self, index: i64) {
        self.inner.index.store(index, Ordering::Release);
    }
}

/// A notebook document.
#[derive(Debug, Clone)]
pub struct NotebookDocument {
    inner: Arc<DocumentInner>,
}

#[derive(Debug)]
struct DocumentInner {
    uri: String,
    notebook_type: String,
    cells: Mutex<Vec<NotebookCell>>,
}

impl NotebookDocument {
    pub fn new(uri: impl Into<String>, notebook_type: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                uri: uri.into(),
                notebook_type: notebook_type.into(),
                cells: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn notebook_type(&self) -> &str {
        &self.inner.notebook_type
    }

    fn cells_lock(&self) -> MutexGuard<'_, Vec<NotebookCell>> {
        self.inner.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the cells in notebook order.
    pub fn cells(&self) -> Vec<NotebookCell> {
        self.cells_lock().clone()
    }

    /// Find a live cell by handle.
    pub fn cell(&self, handle: CellHandle) -> Option<NotebookCell> {
        self.cells_lock()
            .iter()
            .find(|cell| cell.handle() == handle)
            .cloned()
    }

    /// Append a cell at the end of the notebook.
    pub fn push_cell(&self, handle: CellHandle) -> NotebookCell {
        let mut cells = self.cells_lock();
        let cell = NotebookCell::new(handle, self.uri(), cells.len());
        cells.push(cell.clone());
        cell
    }

    /// Remove a cell; outstanding clones observe the removal.
    pub fn remove_cell(&self, handle: CellHandle) -> Option<NotebookCell> {
        let mut cells = self.cells_lock();
        let position = cells.iter().position(|cell| cell.handle() == handle)?;
        let removed = cells.remove(position);
        removed.set_index(REMOVED_INDEX);
        for (index, cell) in cells.iter().enumerate().skip(position) {
            cell.set_index(index as i64);
        }
        Some(removed)
    }
}

/// An editor surface rendering a notebook; the target of renderer messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookSurface {
    pub id: String,
    pub notebook_uri: String,
}

/// In-memory [`NotebookDocuments`] implementation.
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    documents: FxHashMap<String, NotebookDocument>,
    surfaces: FxHashMap<String, NotebookSurface>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a notebook with `cell_count` cells, handles `0..cell_count`.
    pub fn open(&self, uri: &str, notebook_type: &str, cell_count: u32) -> NotebookDocument {
        let document = NotebookDocument::new(uri, notebook_type);
        for handle in 0..cell_count {
            document.push_cell(CellHandle::new(handle));
        }
        self.insert(document.clone());
        document
    }

    pub fn insert(&self, document: NotebookDocument) {
        self.lock()
            .documents
            .insert(document.uri().to_string(), document);
    }

    /// Close a notebook together with every surface showing it.
    pub fn close(&self, uri: &str) -> Option<NotebookDocument> {
        let mut inner = self.lock();
        inner.surfaces.retain(|_, surface| surface.notebook_uri != uri);
        inner.documents.remove(uri)
    }

    /// Open an editor surface for a notebook.
    pub fn open_surface(&self, notebook_uri: &str) -> NotebookSurface {
        let surface = NotebookSurface {
            id: uuid::Uuid::new_v4().to_string(),
            notebook_uri: notebook_uri.to_string(),
        };
        self.lock()
            .surfaces
            .insert(surface.id.clone(), surface.clone());
        surface
    }

    pub fn close_surface(&self, id: &str) -> Option<NotebookSurface> {
        self.lock().surfaces.remove(id)
    }
}

impl NotebookDocuments for DocumentStore {
    fn document(&self, uri: &str) -> Option<NotebookDocument> {
        self.lock().documents.get(uri).cloned()
    }

    fn surface(&self, id: &str) -> Option<NotebookSurface> {
        self.lock().surfaces.get(id).cloned()
    }
}
