//! Bounds-checked access to exported linear memories.

use crate::error::{Error, Result};
use crate::store::{AsStore, AsStoreMut, StoreId};

/// An exported linear memory of an instance.
#[derive(Clone, Copy, Debug)]
pub struct Memory {
    store: StoreId,
    inner: wasmi::Memory,
}

impl Memory {
    pub(crate) fn new(store: StoreId, inner: wasmi::Memory) -> Self {
        Self { store, inner }
    }

    fn check_store(&self, id: StoreId) -> Result<()> {
        if id == self.store {
            Ok(())
        } else {
            Err(Error::StoreMismatch)
        }
    }

    /// Current size in bytes.
    pub fn size(&self, store: impl AsStore) -> Result<usize> {
        let ctx = store.as_store();
        self.check_store(ctx.data().id)?;
        Ok(self.inner.data(&ctx).len())
    }

    pub fn read(&self, store: impl AsStore, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let ctx = store.as_store();
        self.check_store(ctx.data().id)?;
        let data = self.inner.data(&ctx);
        let range = checked_range(offset, buffer.len(), data.len())?;
        buffer.copy_from_slice(&data[range]);
        Ok(())
    }

    pub fn read_bytes(&self, store: impl AsStore, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0; len];
        self.read(store, offset, &mut buffer)?;
        Ok(buffer)
    }

    pub fn write(&self, mut store: impl AsStoreMut, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut ctx = store.as_store_mut();
        self.check_store(ctx.data().id)?;
        let data = self.inner.data_mut(&mut ctx);
        let range = checked_range(offset, bytes.len(), data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }
}

fn checked_range(offset: usize, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(Error::MemoryOutOfBounds { offset, len, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::checked_range;

    #[test]
    fn ranges_are_bounds_checked() {
        assert_eq!(checked_range(0, 5, 5).unwrap(), 0..5);
        assert_eq!(checked_range(5, 0, 5).unwrap(), 5..5);
        assert!(checked_range(4, 2, 5).is_err());
        assert!(checked_range(usize::MAX, 2, 5).is_err());
    }
}
