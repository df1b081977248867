use std::fmt::Debug;
use std::marker::PhantomData;

use crate::{BitIter, BitSet};

/// A fixed-column-size, variable-row-size 2D bit matrix.
///
/// Rows are allocated lazily: a row without any set bit costs one pointer.
/// `R` and `C` are index types identifying rows and columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparseBitMatrix<R, C>
where
    R: From<usize> + Into<usize> + Copy + PartialEq + Debug,
    C: From<usize> + Into<usize> + Copy + PartialEq + Debug,
{
    num_columns: usize,
    rows: Vec<Option<BitSet<C>>>,
    marker: PhantomData<R>,
}

impl<R, C> SparseBitMatrix<R, C>
where
    R: From<usize> + Into<usize> + Copy + PartialEq + Debug,
    C: From<usize> + Into<usize> + Copy + PartialEq + Debug,
{
    /// Creates a new empty sparse bit matrix with no rows or columns.
    pub fn new(num_rows: usize, num_columns: usize) -> Self {
        Self { num_columns, rows: vec![None; num_rows], marker: PhantomData }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    fn ensure_row(&mut self, row: R) -> &mut BitSet<C> {
        self.rows[row.into()].get_or_insert_with(|| BitSet::new_empty(self.num_columns))
    }

    /// Sets the cell at `(row, column)` to true. Returns `true` if this
    /// changed the matrix.
    pub fn insert(&mut self, row: R, column: C) -> bool {
        self.ensure_row(row).insert(column)
    }

    /// Do the bits from `row` contain `column`?
    pub fn contains(&self, row: R, column: C) -> bool {
        self.row(row).map_or(false, |r| r.contains(column))
    }

    /// Clears the cell at `(row, column)`. Returns `true` if this changed
    /// the matrix.
    pub fn remove(&mut self, row: R, column: C) -> bool {
        self.rows[row.into()].as_mut().map_or(false, |r| r.remove(column))
    }

    /// Adds the bits from row `read` to the bits from row `write`, and
    /// returns `true` if anything changed.
    pub fn union_rows(&mut self, read: R, write: R) -> bool {
        let read: usize = read.into();
        if read == write.into() || self.rows[read].is_none() {
            return false;
        }
        // Lift the source row out so the borrow checker lets us touch both.
        let src = self.rows[read].take().unwrap();
        let changed = self.ensure_row(write).union(&src);
        self.rows[read] = Some(src);
        changed
    }

    /// Adds the bits from `with` to the bits from row `write`, and returns
    /// `true` if anything changed.
    pub fn union_row_with(&mut self, with: &BitSet<C>, write: R) -> bool {
        self.ensure_row(write).union(with)
    }

    pub fn row(&self, row: R) -> Option<&BitSet<C>> {
        self.rows[row.into()].as_ref()
    }

    /// Iterates over the set bits of `row` (empty iteration for an absent row).
    pub fn iter(&self, row: R) -> impl Iterator<Item = C> + '_ {
        self.row(row).into_iter().flat_map(|r| r.iter())
    }

    pub fn rows(&self) -> impl Iterator<Item = R> {
        (0..self.rows.len()).map(R::from)
    }

    /// Swaps row and column domains: `inverse()[c]` contains `r` iff
    /// `self[r]` contains `c`.
    pub fn inverse(&self) -> SparseBitMatrix<C, R> {
        let mut res = SparseBitMatrix::new(self.num_columns, self.rows.len());
        for row in self.rows() {
            for column in self.iter(row) {
                res.insert(column, row);
            }
        }
        res
    }

    /// Clears the matrix and resizes it.
    pub fn clear(&mut self, num_rows: usize, num_columns: usize) {
        self.rows.clear();
        self.rows.resize(num_rows, None);
        self.num_columns = num_columns;
    }
}

impl<'a, R, C> IntoIterator for &'a SparseBitMatrix<R, C>
where
    R: From<usize> + Into<usize> + Copy + PartialEq + Debug,
    C: From<usize> + Into<usize> + Copy + PartialEq + Debug,
{
    type Item = (R, BitIter<'a, C>);
    type IntoIter = Box<dyn Iterator<Item = (R, BitIter<'a, C>)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(
            self.rows
                .iter()
                .enumerate()
                .filter_map(|(r, row)| Some((R::from(r), row.as_ref()?.iter()))),
        )
    }
}
