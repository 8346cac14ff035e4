// THEORY:
// The `image` module is the storage foundation of the sensor. Every per-pixel
// structure in the system (raw frame samples, each plane of the background
// model, the foreground mask) is an `Image<T>`.
//
// Key architectural principles:
// 1.  **Dumb Container**: Like `Pixel`, an `Image` knows nothing about what it
//     stores. It owns one contiguous, row-major block of `width * height`
//     elements and offers indexing and bulk iteration over it.
// 2.  **Fixed Shape**: The dimensions are chosen at construction and never
//     change. A different resolution means a brand new `Image`.
// 3.  **Move-Only**: `Image` deliberately does not implement `Clone`. Frames are
//     large and copying one is an explicit, visible act (`duplicate`).

use std::ops::{Index, IndexMut};

/// A fixed-size, owned, row-major grid of `T`.
#[derive(Debug, PartialEq)]
pub struct Image<T> {
    width: usize,
    height: usize,
    buffer: Box<[T]>,
}

impl<T> Default for Image<T> {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            buffer: Box::default(),
        }
    }
}

impl<T: Clone> Image<T> {
    /// Allocates a `width x height` image with every element set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            buffer: vec![value; width * height].into_boxed_slice(),
        }
    }

    /// Deep copy of the whole buffer.
    pub fn duplicate(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            buffer: self.buffer.clone(),
        }
    }

    /// Overwrites every element with `value`.
    pub fn fill(&mut self, value: T) {
        self.buffer.fill(value);
    }
}

impl<T: Clone + Default> Image<T> {
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, T::default())
    }
}

impl<T> Image<T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    fn index_of(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x < self.width && y < self.height {
            self.buffer.get(self.index_of(x, y))
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut T> {
        if x < self.width && y < self.height {
            let index = self.index_of(x, y);
            self.buffer.get_mut(index)
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.buffer
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.buffer
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.buffer.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.buffer.iter_mut()
    }
}

impl<T> Index<(usize, usize)> for Image<T> {
    type Output = T;

    fn index(&self, (x, y): (usize, usize)) -> &T {
        &self.buffer[self.index_of(x, y)]
    }
}

impl<T> IndexMut<(usize, usize)> for Image<T> {
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        let index = self.index_of(x, y);
        &mut self.buffer[index]
    }
}

/// Linear (row-major) indexing, used by per-pixel loops that walk the buffer directly.
impl<T> Index<usize> for Image<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.buffer[index]
    }
}

impl<T> IndexMut<usize> for Image<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.buffer[index]
    }
}

impl<'a, T> IntoIterator for &'a Image<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Image<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}
