//! One named file's authoritative bytes plus its reader/writer lock.

use bytes::Bytes;
use parking_lot::RwLock;

#[derive(Debug)]
enum RecordState {
    Active(Bytes),
    /// Terminal; there is no transition back to `Active`
    Deleted,
}

/// The server's copy of a single file.
///
/// The name lives in the directory key, not here, so a rename moves the
/// record without touching it. Concurrent `read`s share the lock; `modify`
/// and `deactivate` take it exclusively.
#[derive(Debug)]
pub struct FileRecord {
    state: RwLock<RecordState>,
}

impl FileRecord {
    pub fn new(data: Bytes) -> Self {
        Self {
            state: RwLock::new(RecordState::Active(data)),
        }
    }

    /// Current contents, or `None` once deleted
    pub fn read(&self) -> Option<Bytes> {
        match &*self.state.read() {
            RecordState::Active(data) => Some(data.clone()),
            RecordState::Deleted => None,
        }
    }

    /// Replace the contents if they differ byte-for-byte.
    ///
    /// Returns `Some(changed)`, or `None` once deleted.
    pub fn modify(&self, new_data: &[u8]) -> Option<bool> {
        let mut state = self.state.write();
        match &mut *state {
            RecordState::Active(data) => {
                if data.as_ref() == new_data {
                    Some(false)
                } else {
                    *data = Bytes::copy_from_slice(new_data);
                    Some(true)
                }
            }
            RecordState::Deleted => None,
        }
    }

    /// Mark deleted and drop the contents. Returns false if already deleted.
    pub fn deactivate(&self) -> bool {
        let mut state = self.state.write();
        if matches!(*state, RecordState::Deleted) {
            return false;
        }
        *state = RecordState::Deleted;
        true
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.state.read(), RecordState::Active(_))
    }
}
