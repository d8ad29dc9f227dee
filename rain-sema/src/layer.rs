use std::sync::Arc;

/// A frozen, shareable prefix plus entries added by one compilation.
///
/// Ids are positions in the concatenation, so handles into the shared part
/// stay valid in every layer built on top of it.
#[derive(Clone, Debug)]
pub(crate) struct Layered<T> {
    base: Arc<[T]>,
    local: Vec<T>,
}

impl<T: Clone> Layered<T> {
    pub(crate) fn new(base: Arc<[T]>) -> Self {
        Self {
            base,
            local: Vec::new(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(Arc::from(Vec::new()))
    }

    pub(crate) fn len(&self) -> usize {
        self.base.len() + self.local.len()
    }

    pub(crate) fn is_base(&self, index: usize) -> bool {
        index < self.base.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        match index.checked_sub(self.base.len()) {
            None => self.base.get(index),
            Some(local) => self.local.get(local),
        }
    }

    /// Entries in the shared prefix are read-only.
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        let local = index.checked_sub(self.base.len())?;
        self.local.get_mut(local)
    }

    pub(crate) fn push(&mut self, value: T) -> usize {
        self.local.push(value);
        self.len() - 1
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.base.iter().chain(self.local.iter())
    }

    pub(crate) fn freeze(self) -> Arc<[T]> {
        if self.local.is_empty() {
            return self.base;
        }
        self.base.iter().cloned().chain(self.local).collect()
    }
}
