use parking_lot::{Mutex, MutexGuard};

use crate::model::{VolumeHandle, VolumeId, VolumeRecord};

/// Ordered list of volumes. Sits between the file collection and individual
/// volumes in the guard order.
#[derive(Default)]
pub struct VolumeList {
    volumes: Mutex<Vec<VolumeHandle>>,
}

impl VolumeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<VolumeHandle>> {
        self.volumes.lock()
    }

    pub fn push(&self, volume: VolumeRecord) -> VolumeHandle {
        let handle = VolumeHandle::new(volume);
        self.volumes.lock().push(handle.clone());
        handle
    }

    pub fn handles(&self) -> Vec<VolumeHandle> {
        self.volumes.lock().clone()
    }

    pub fn ids(&self) -> Vec<VolumeId> {
        self.volumes.lock().iter().map(VolumeHandle::id).collect()
    }

    pub fn len(&self) -> usize {
        self.volumes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.lock().is_empty()
    }

    /// Every volume carrying `id`. More than one hit means the list is corrupt.
    pub fn find(&self, id: VolumeId) -> Vec<VolumeHandle> {
        Self::find_in(&self.volumes.lock(), id)
    }

    pub(crate) fn find_in(volumes: &[VolumeHandle], id: VolumeId) -> Vec<VolumeHandle> {
        volumes.iter().filter(|v| v.id() == id).cloned().collect()
    }
}
