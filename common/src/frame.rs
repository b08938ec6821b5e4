//! Row-major 2-D buffer for detector frames and pixel masks.
//!
//! Indexing is `(row, col)` to match detector conventions: row 0 is the
//! bottom of the array and columns run along the fast readout direction.

use std::ops::{Index, IndexMut, Range};
use std::slice;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    pixels: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T> Frame<T> {
    pub fn new(rows: usize, cols: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            rows * cols,
            "pixels length must equal rows * cols"
        );
        Self { pixels, rows, cols }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn offset(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.rows && col < self.cols);
        row * self.cols + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.pixels[self.offset(row, col)]
    }

    #[inline]
    pub fn get_mut(&mut self, row: usize, col: usize) -> &mut T {
        let idx = self.offset(row, col);
        &mut self.pixels[idx]
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.cols;
        &self.pixels[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        let start = row * self.cols;
        &mut self.pixels[start..start + self.cols]
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.pixels
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.pixels.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> slice::IterMut<'_, T> {
        self.pixels.iter_mut()
    }

    /// Apply `f` to every pixel, producing a frame of the same shape.
    pub fn map<U, F>(&self, f: F) -> Frame<U>
    where
        F: FnMut(&T) -> U,
    {
        Frame {
            pixels: self.pixels.iter().map(f).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }

    pub fn same_shape<U>(&self, other: &Frame<U>) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }
}

impl<T: Default + Clone> Frame<T> {
    pub fn new_default(rows: usize, cols: usize) -> Self {
        Self::new_filled(rows, cols, T::default())
    }
}

impl<T: Clone> Frame<T> {
    pub fn new_filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            pixels: vec![value; rows * cols],
            rows,
            cols,
        }
    }

    /// Build a frame from a flat row-major slice.
    pub fn from_slice(rows: usize, cols: usize, data: &[T]) -> Self {
        Self::new(rows, cols, data.to_vec())
    }

    #[inline]
    pub fn fill(&mut self, value: T) {
        self.pixels.fill(value);
    }

    /// Copy of the column range `cols` over all rows.
    pub fn column_block(&self, cols: Range<usize>) -> Frame<T> {
        assert!(cols.end <= self.cols, "column range out of bounds");
        let width = cols.len();
        let mut pixels = Vec::with_capacity(self.rows * width);
        for r in 0..self.rows {
            pixels.extend_from_slice(&self.row(r)[cols.clone()]);
        }
        Frame::new(self.rows, width, pixels)
    }

    /// Copy a block produced by [`Frame::column_block`] back into place.
    pub fn set_column_block(&mut self, start_col: usize, block: &Frame<T>) {
        assert_eq!(block.rows, self.rows, "row count mismatch");
        assert!(
            start_col + block.cols <= self.cols,
            "column block out of bounds"
        );
        for r in 0..self.rows {
            self.row_mut(r)[start_col..start_col + block.cols].clone_from_slice(block.row(r));
        }
    }
}

impl<T: Copy> Frame<T> {
    #[inline]
    pub fn copy_from(&mut self, other: &Self) {
        assert_eq!(self.rows, other.rows, "row count mismatch");
        assert_eq!(self.cols, other.cols, "column count mismatch");
        self.pixels.copy_from_slice(&other.pixels);
    }
}

impl Frame<bool> {
    pub fn count_true(&self) -> usize {
        self.pixels.iter().filter(|&&v| v).count()
    }

    pub fn any(&self) -> bool {
        self.pixels.iter().any(|&v| v)
    }

    pub fn not(&self) -> Frame<bool> {
        self.map(|&v| !v)
    }

    /// In-place `self |= other`.
    pub fn or_assign(&mut self, other: &Frame<bool>) {
        assert!(self.same_shape(other), "mask shape mismatch");
        for (a, &b) in self.pixels.iter_mut().zip(other.pixels.iter()) {
            *a |= b;
        }
    }

    /// In-place `self &= other`.
    pub fn and_assign(&mut self, other: &Frame<bool>) {
        assert!(self.same_shape(other), "mask shape mismatch");
        for (a, &b) in self.pixels.iter_mut().zip(other.pixels.iter()) {
            *a &= b;
        }
    }

    /// In-place `self &= !other`.
    pub fn and_not_assign(&mut self, other: &Frame<bool>) {
        assert!(self.same_shape(other), "mask shape mismatch");
        for (a, &b) in self.pixels.iter_mut().zip(other.pixels.iter()) {
            *a &= !b;
        }
    }

    /// True when every pixel set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &Frame<bool>) -> bool {
        assert!(self.same_shape(other), "mask shape mismatch");
        self.pixels
            .iter()
            .zip(other.pixels.iter())
            .all(|(&a, &b)| !a || b)
    }
}

impl<T> Index<(usize, usize)> for Frame<T> {
    type Output = T;

    #[inline]
    fn index(&self, (row, col): (usize, usize)) -> &Self::Output {
        &self.pixels[row * self.cols + col]
    }
}

impl<T> IndexMut<(usize, usize)> for Frame<T> {
    #[inline]
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[row * self.cols + col]
    }
}

impl<T> Index<usize> for Frame<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &Self::Output {
        &self.pixels[idx]
    }
}

impl<T> IndexMut<usize> for Frame<T> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.pixels[idx]
    }
}

impl<'a, T> IntoIterator for &'a Frame<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Frame<T> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter_mut()
    }
}

impl<T> From<Frame<T>> for Vec<T> {
    #[inline]
    fn from(frame: Frame<T>) -> Self {
        frame.pixels
    }
}
