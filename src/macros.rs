#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut reader = lock!(self.reader);
///  reader.seek(SeekFrom::Start(0))?;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let backend = read_lock!(self.backend);
///  let size = backend.as_ref().map(|b| b.size());
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut backend = write_lock!(self.backend);
///  backend.take();
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().expect("Failed to acquire write lock")
    };
}
