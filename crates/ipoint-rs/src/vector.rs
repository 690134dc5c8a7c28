//! Vectors and the flat views handed to compiled kernels.
//!
//! Operator data is laid out batched-by-component: element `(point, comp)` of a
//! vector holding `nip` points lives at `point + comp * nip`.

use std::fmt;
use std::marker::PhantomData;

/// Address space a view's pointer is valid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    Host,
    Device,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySpace::Host => write!(f, "host"),
            MemorySpace::Device => write!(f, "device"),
        }
    }
}

/// Read-only flat buffer with the distance between consecutive components.
#[derive(Debug, Clone, Copy)]
pub struct DeviceView<'a> {
    ptr: *const f64,
    len: usize,
    stride: usize,
    _marker: PhantomData<&'a [f64]>,
}

impl<'a> DeviceView<'a> {
    pub fn from_slice(data: &'a [f64]) -> Self {
        Self {
            ptr: data.as_ptr(),
            len: data.len(),
            stride: 1,
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `ptr` must address `len` doubles in the view's memory space that stay
    /// valid and unmodified for `'a`.
    pub unsafe fn from_raw_parts(ptr: *const f64, len: usize) -> Self {
        Self {
            ptr,
            len,
            stride: 1,
            _marker: PhantomData,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn as_ptr(&self) -> *const f64 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// Writable counterpart of [`DeviceView`].
#[derive(Debug)]
pub struct DeviceViewMut<'a> {
    ptr: *mut f64,
    len: usize,
    stride: usize,
    _marker: PhantomData<&'a mut [f64]>,
}

impl<'a> DeviceViewMut<'a> {
    pub fn from_mut_slice(data: &'a mut [f64]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
            stride: 1,
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `ptr` must address `len` doubles in the view's memory space that are
    /// exclusively borrowed for `'a`.
    pub unsafe fn from_raw_parts(ptr: *mut f64, len: usize) -> Self {
        Self {
            ptr,
            len,
            stride: 1,
            _marker: PhantomData,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn as_mut_ptr(&mut self) -> *mut f64 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// A vector an operator can read from or write to.
///
/// `view`/`view_mut` return `None` when the data is not resident in the
/// requested memory space; implementations that track residency may migrate
/// data before returning a view.
pub trait Vector {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn view(&self, space: MemorySpace) -> Option<DeviceView<'_>>;

    fn view_mut(&mut self, space: MemorySpace) -> Option<DeviceViewMut<'_>>;

    fn as_host_slice(&self) -> Option<&[f64]> {
        None
    }

    fn as_host_slice_mut(&mut self) -> Option<&mut [f64]> {
        None
    }
}

/// Host-resident vector. Exposes no device view, so CUDA operators reject it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostVector {
    data: Vec<f64>,
}

impl HostVector {
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self { data }
    }

    /// Builds the batched-by-component layout from per-point values.
    ///
    /// Every entry of `points` must have the same length.
    pub fn from_points(points: &[Vec<f64>]) -> Self {
        let nip = points.len();
        let dim = points.first().map_or(0, Vec::len);
        let mut data = vec![0.0; nip * dim];
        for (point, values) in points.iter().enumerate() {
            debug_assert_eq!(values.len(), dim, "ragged point values");
            for (comp, value) in values.iter().enumerate() {
                data[point + comp * nip] = *value;
            }
        }
        Self { data }
    }

    /// Inverse of [`HostVector::from_points`].
    pub fn to_points(&self, nip: usize) -> Vec<Vec<f64>> {
        if nip == 0 {
            return Vec::new();
        }
        let dim = self.data.len() / nip;
        (0..nip)
            .map(|point| (0..dim).map(|comp| self.data[point + comp * nip]).collect())
            .collect()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.data
    }
}

impl From<Vec<f64>> for HostVector {
    fn from(data: Vec<f64>) -> Self {
        Self::from_vec(data)
    }
}

impl Vector for HostVector {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn view(&self, space: MemorySpace) -> Option<DeviceView<'_>> {
        match space {
            MemorySpace::Host => Some(DeviceView::from_slice(&self.data)),
            MemorySpace::Device => None,
        }
    }

    fn view_mut(&mut self, space: MemorySpace) -> Option<DeviceViewMut<'_>> {
        match space {
            MemorySpace::Host => Some(DeviceViewMut::from_mut_slice(&mut self.data)),
            MemorySpace::Device => None,
        }
    }

    fn as_host_slice(&self) -> Option<&[f64]> {
        Some(&self.data)
    }

    fn as_host_slice_mut(&mut self) -> Option<&mut [f64]> {
        Some(&mut self.data)
    }
}
