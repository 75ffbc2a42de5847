// swrend/src/registry.rs
//
//! A thread-safe mapping from external handles to live presentable surfaces.
//!
//! The registry never touches the graphics API, so callers use it directly from their own
//! threads. Its lock is only held for map access, never across a graphics submission.

use crate::device::Device;
use crate::error::Error;
use crate::surface::{PresentableSurface, SurfaceHandle};

use fnv::FnvHashMap;
use log::debug;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct SurfaceRegistry<D: Device> {
    table: Mutex<FnvHashMap<SurfaceHandle, Arc<PresentableSurface<D>>>>,
}

impl<D: Device> Default for SurfaceRegistry<D> {
    fn default() -> SurfaceRegistry<D> {
        SurfaceRegistry::new()
    }
}

impl<D: Device> SurfaceRegistry<D> {
    pub fn new() -> SurfaceRegistry<D> {
        SurfaceRegistry {
            table: Mutex::new(FnvHashMap::default()),
        }
    }

    // Lock the lookup table
    fn table(&self) -> MutexGuard<FnvHashMap<SurfaceHandle, Arc<PresentableSurface<D>>>> {
        self.table.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Registers a fully initialized surface under its handle.
    ///
    /// Handles are unique per provider, so a clash means the provider reused one; the existing
    /// entry is kept and the new surface is handed back.
    pub fn insert(
        &self,
        surface: PresentableSurface<D>,
    ) -> Result<Arc<PresentableSurface<D>>, PresentableSurface<D>> {
        match self.table().entry(surface.handle()) {
            Entry::Occupied(_) => Err(surface),
            Entry::Vacant(entry) => {
                debug!("Registered surface {:?}", surface);
                Ok(entry.insert(Arc::new(surface)).clone())
            }
        }
    }

    pub fn lookup(&self, handle: SurfaceHandle) -> Result<Arc<PresentableSurface<D>>, Error> {
        self.table()
            .get(&handle)
            .cloned()
            .ok_or(Error::NoTexture(handle))
    }

    /// Removes the entry for `handle`, returning the surface for its GPU objects to be released.
    pub fn remove(&self, handle: SurfaceHandle) -> Result<Arc<PresentableSurface<D>>, Error> {
        let surface = self.table().remove(&handle).ok_or(Error::NoTexture(handle))?;
        debug!("Unregistered surface {}", handle);
        Ok(surface)
    }

    /// Removes every entry.
    pub fn drain(&self) -> Vec<Arc<PresentableSurface<D>>> {
        self.table().drain().map(|(_, surface)| surface).collect()
    }

    /// The handles of all live surfaces, in ascending order.
    pub fn list(&self) -> Vec<SurfaceHandle> {
        let mut handles: Vec<_> = self.table().keys().cloned().collect();
        handles.sort();
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::SurfaceRegistry;
    use crate::context::ContextAttributes;
    use crate::device::Device as _;
    use crate::error::Error;
    use crate::platform::software::{Device, Drawable};
    use crate::surface::{PresentableSurface, SurfaceHandle};

    use euclid::default::Size2D;

    fn surface(device: &mut Device, handle: i64) -> PresentableSurface<Device> {
        let size = Size2D::new(4, 4);
        let drawable = Drawable::new();
        let context_surface = device.create_surface(&drawable, &size).unwrap();
        let texture = device.create_texture().unwrap();
        PresentableSurface::new(SurfaceHandle(handle), size, drawable, context_surface, texture)
    }

    fn device() -> Device {
        let mut device = Device::new();
        device.initialize(&ContextAttributes::default()).unwrap();
        device
    }

    #[test]
    fn test_lookup_after_insert_and_remove() {
        let mut device = device();
        let registry = SurfaceRegistry::new();
        let inserted = registry.insert(surface(&mut device, 3)).unwrap();
        assert_eq!(registry.lookup(SurfaceHandle(3)).unwrap().texture(), inserted.texture());
        assert_eq!(registry.list(), vec![SurfaceHandle(3)]);

        registry.remove(SurfaceHandle(3)).unwrap();
        match registry.lookup(SurfaceHandle(3)) {
            Err(Error::NoTexture(SurfaceHandle(3))) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(registry.remove(SurfaceHandle(3)).is_err());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_clashing_handle_keeps_first_surface() {
        let mut device = device();
        let registry = SurfaceRegistry::new();
        let first = registry.insert(surface(&mut device, 1)).unwrap();
        let rejected = match registry.insert(surface(&mut device, 1)) {
            Err(rejected) => rejected,
            Ok(_) => panic!("duplicate handle accepted"),
        };
        assert_ne!(rejected.texture(), first.texture());
        assert_eq!(registry.lookup(SurfaceHandle(1)).unwrap().texture(), first.texture());
        assert_eq!(registry.list(), vec![SurfaceHandle(1)]);
    }

    #[test]
    fn test_list_is_sorted_and_drain_empties() {
        let mut device = device();
        let registry = SurfaceRegistry::new();
        for handle in [9, 2, 5] {
            registry.insert(surface(&mut device, handle)).unwrap();
        }
        let expected: Vec<_> = [2, 5, 9].iter().map(|&handle| SurfaceHandle(handle)).collect();
        assert_eq!(registry.list(), expected);
        assert_eq!(registry.drain().len(), 3);
        assert!(registry.list().is_empty());
    }
}
