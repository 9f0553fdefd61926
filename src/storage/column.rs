use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use super::array::{Array, DType};
use super::page::{Page, PageError};
use super::workspace::Workspace;
use crate::config::Config;
use crate::util::{intercept, Rng, Slice};
use crate::value::{Value, ValueKind};

#[derive(Error, Debug)]
pub enum ColumnError {
    #[error("slice step must not be zero")]
    ZeroStep,
    #[error(transparent)]
    Page(#[from] PageError),
}

/// What a slice resolves to for one page: the whole immutable page, shared
/// as-is, or a materialised fragment.
pub enum Segment {
    Page(Arc<Page>),
    Values(Array),
}

/// An ordered list of pages presented as one flat indexed array.
///
/// Columns never edit a page in place; every update appends new pages or
/// swaps the page list wholesale. Cloning a column shares its pages.
#[derive(Debug, Clone)]
pub struct Column {
    workspace: Arc<Workspace>,
    pages: Vec<Arc<Page>>,
}

impl Column {
    pub(crate) fn new(workspace: Arc<Workspace>) -> Column {
        Column { workspace, pages: Vec::new() }
    }

    pub(crate) fn from_array(
        workspace: Arc<Workspace>,
        array: Array,
    ) -> Result<Column, ColumnError> {
        let mut column = Column::new(workspace);
        column.append(array)?;
        Ok(column)
    }

    /// Split `array` into `PAGE_SIZE` chunks and append one page per chunk.
    ///
    /// A final short chunk stays short; later appends start a fresh page
    /// rather than backfilling it.
    #[instrument(skip(self, array), fields(len = array.len()), level = "trace")]
    pub fn append(&mut self, array: Array) -> Result<(), ColumnError> {
        let page_size = Config::page_size();
        let mut start = 0;
        while start < array.len() {
            let end = (start + page_size).min(array.len());
            let chunk = array.take_range(start, end);
            let page = Page::create(&self.workspace, &chunk)?;
            self.pages.push(Arc::new(page));
            start = end;
        }
        Ok(())
    }

    /// O(1) attach of an existing page; slicing and join output share pages
    /// this way.
    pub fn append_page(&mut self, page: Arc<Page>) {
        self.pages.push(page);
    }

    /// Drop the current page list and repaginate `array` in its place.
    pub fn replace(&mut self, array: Array) -> Result<(), ColumnError> {
        self.pages.clear();
        self.append(array)
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn pages(&self) -> &[Arc<Page>] {
        &self.pages
    }

    pub fn page_ids(&self) -> Vec<u64> {
        self.pages.iter().map(|p| p.id()).collect()
    }

    pub fn page_lengths(&self) -> Vec<usize> {
        self.pages.iter().map(|p| p.len()).collect()
    }

    /// Resolve a slice against the page boundaries: whole-page references
    /// where the slice covers a full page in order, materialised fragments
    /// everywhere else. This is the primitive behind zero-copy sub-columns.
    pub fn pages_for(&self, slice: &Slice) -> Result<Vec<Segment>, ColumnError> {
        if slice.step == 0 {
            return Err(ColumnError::ZeroStep);
        }
        let (start, stop, step) = slice.indices(self.len());
        let request = Rng::new(start, stop, step);
        let target = request.normalized();
        if target.is_empty() {
            return Ok(Vec::new());
        }

        let mut bounds = Vec::with_capacity(self.pages.len());
        let mut offset = 0i64;
        for page in &self.pages {
            let end = offset + page.len() as i64;
            bounds.push((offset, end));
            offset = end;
        }

        let mut segments = Vec::new();
        if step > 0 {
            for (page, (p_start, p_end)) in self.pages.iter().zip(&bounds) {
                if *p_start >= target.stop {
                    break;
                }
                if *p_end <= target.start {
                    continue;
                }
                let ro = intercept(&Rng::new(*p_start, *p_end, 1), &target);
                if ro.is_empty() {
                    continue;
                }
                if ro.len() == page.len() {
                    segments.push(Segment::Page(Arc::clone(page)));
                } else {
                    let array = page.read()?;
                    let local = Rng::new(ro.start - p_start, ro.stop - p_start, ro.step);
                    segments.push(Segment::Values(array.take_progression(&local)));
                }
            }
        } else {
            // Reversed reads walk the pages back to front and flip each
            // fragment; page sharing would invert the order, so every
            // overlapped page materialises.
            for (page, (p_start, p_end)) in self.pages.iter().zip(&bounds).rev() {
                let ro = intercept(&Rng::new(*p_start, *p_end, 1), &target);
                if ro.is_empty() {
                    continue;
                }
                let array = page.read()?;
                let local = Rng::new(ro.start - p_start, ro.stop - p_start, ro.step);
                let mut part = array.take_progression(&local);
                part.reverse();
                segments.push(Segment::Values(part));
            }
        }
        Ok(segments)
    }

    /// Materialise a slice. Segments with mismatched dtypes promote to the
    /// object dtype on concatenation.
    pub fn read(&self, slice: &Slice) -> Result<Array, ColumnError> {
        let mut parts = Vec::new();
        for segment in self.pages_for(slice)? {
            match segment {
                Segment::Page(page) => parts.push(page.read()?),
                Segment::Values(array) => parts.push(array),
            }
        }
        Ok(Array::concat(parts))
    }

    pub fn read_all(&self) -> Result<Array, ColumnError> {
        self.read(&Slice::all())
    }

    /// The value at `ix`, or `None` when `ix` is past the end.
    pub fn value_at(&self, ix: usize) -> Result<Option<Value>, ColumnError> {
        let mut offset = 0;
        for page in &self.pages {
            if ix < offset + page.len() {
                return Ok(page.read()?.get(ix - offset));
            }
            offset += page.len();
        }
        Ok(None)
    }

    /// Lazy in-order iteration, one page in memory at a time.
    pub fn iter(&self) -> ColumnIter<'_> {
        ColumnIter { pages: self.pages.iter(), current: Vec::new().into_iter() }
    }

    /// Elementwise equality, short-circuiting on shared page lists.
    pub fn equals(&self, other: &Column) -> Result<bool, ColumnError> {
        if self.len() != other.len() {
            return Ok(false);
        }
        if self.pages.len() == other.pages.len()
            && self.pages.iter().zip(&other.pages).all(|(a, b)| Arc::ptr_eq(a, b))
        {
            return Ok(true);
        }
        let mut left = self.iter();
        let mut right = other.iter();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ok(true),
                (Some(a), Some(b)) => {
                    if a? != b? {
                        return Ok(false);
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    /// Observed value kinds with their occurrence counts. Native pages are
    /// counted from their dtype without touching the disk.
    pub fn types(&self) -> Result<BTreeMap<ValueKind, usize>, ColumnError> {
        let mut counts: BTreeMap<ValueKind, usize> = BTreeMap::new();
        for page in &self.pages {
            match page.dtype() {
                DType::Bool => *counts.entry(ValueKind::Bool).or_default() += page.len(),
                DType::Int => *counts.entry(ValueKind::Int).or_default() += page.len(),
                DType::Float => *counts.entry(ValueKind::Float).or_default() += page.len(),
                DType::Object => {
                    for (kind, n) in page.read()?.kind_counts() {
                        *counts.entry(kind).or_default() += n;
                    }
                }
            }
        }
        Ok(counts)
    }
}

pub struct ColumnIter<'a> {
    pages: std::slice::Iter<'a, Arc<Page>>,
    current: std::vec::IntoIter<Value>,
}

impl Iterator for ColumnIter<'_> {
    type Item = Result<Value, ColumnError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.current.next() {
                return Some(Ok(value));
            }
            match self.pages.next() {
                Some(page) => match page.read() {
                    Ok(array) => self.current = array.into_values().into_iter(),
                    Err(err) => return Some(Err(err.into())),
                },
                None => return None,
            }
        }
    }
}
