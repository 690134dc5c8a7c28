//! Trial proxies and their component offsets in the per-point input buffer.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

/// Shape of a per-point quantity. Empty for scalars.
pub type Dims = SmallVec<[usize; 4]>;

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// An input quantity whose per-point values are supplied by the caller.
///
/// Identity is process-unique: two proxies created with the same name and
/// shape are still distinct inputs. Clones share the identity.
#[derive(Clone)]
pub struct TrialProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    id: u64,
    name: String,
    dims: Dims,
}

impl TrialProxy {
    pub fn new(name: impl Into<String>, dims: &[usize]) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                dims: Dims::from_slice(dims),
            }),
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, &[])
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn dimensions(&self) -> &[usize] {
        &self.inner.dims
    }

    /// Number of scalar components.
    pub fn dimension(&self) -> usize {
        self.inner.dims.iter().product()
    }
}

impl PartialEq for TrialProxy {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TrialProxy {}

impl Hash for TrialProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for TrialProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrialProxy")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("dims", &self.inner.dims.as_slice())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOffset {
    pub proxy: TrialProxy,
    pub offset: usize,
}

/// Component offsets of the trial proxies within one point's input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyOffsetTable {
    entries: Vec<ProxyOffset>,
    total: usize,
}

impl ProxyOffsetTable {
    /// Assigns each proxy the running sum of the dimensions before it.
    pub fn resolve(proxies: &[TrialProxy]) -> Self {
        let mut entries = Vec::with_capacity(proxies.len());
        let mut total = 0usize;
        for proxy in proxies {
            entries.push(ProxyOffset {
                proxy: proxy.clone(),
                offset: total,
            });
            total += proxy.dimension();
        }
        Self { entries, total }
    }

    /// Position of the first entry for `proxy`.
    pub fn position(&self, proxy: &TrialProxy) -> Option<usize> {
        self.entries.iter().position(|entry| entry.proxy == *proxy)
    }

    pub fn offset_of(&self, proxy: &TrialProxy) -> Option<usize> {
        self.position(proxy).map(|pos| self.entries[pos].offset)
    }

    /// Sum of all proxy dimensions, i.e. the per-point input width.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProxyOffset> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_prefix_sums_of_dimensions() {
        let u = TrialProxy::new("u", &[3]);
        let p = TrialProxy::scalar("p");
        let sigma = TrialProxy::new("sigma", &[2, 2]);
        let table = ProxyOffsetTable::resolve(&[u.clone(), p.clone(), sigma.clone()]);

        assert_eq!(table.offset_of(&u), Some(0));
        assert_eq!(table.offset_of(&p), Some(3));
        assert_eq!(table.offset_of(&sigma), Some(4));
        assert_eq!(table.total(), 8);

        let last = table.iter().last().expect("non-empty table");
        assert_eq!(last.offset + last.proxy.dimension(), table.total());
    }

    #[test]
    fn offsets_are_monotonic_and_disjoint() {
        let proxies: Vec<TrialProxy> = (1..6)
            .map(|dim| TrialProxy::new(format!("q{dim}"), &[dim]))
            .collect();
        let table = ProxyOffsetTable::resolve(&proxies);
        let entries: Vec<&ProxyOffset> = table.iter().collect();
        for pair in entries.windows(2) {
            assert_eq!(pair[0].offset + pair[0].proxy.dimension(), pair[1].offset);
        }
        assert_eq!(table.total(), 1 + 2 + 3 + 4 + 5);
    }

    #[test]
    fn unknown_proxy_has_no_offset() {
        let u = TrialProxy::scalar("u");
        let other = TrialProxy::scalar("u");
        let table = ProxyOffsetTable::resolve(std::slice::from_ref(&u));
        assert_ne!(u, other);
        assert_eq!(table.offset_of(&other), None);
    }

    #[test]
    fn empty_table_has_zero_width() {
        let table = ProxyOffsetTable::resolve(&[]);
        assert!(table.is_empty());
        assert_eq!(table.total(), 0);
    }
}
