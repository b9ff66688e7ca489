use memmap2::MmapMut;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

/// A named, file-backed segment mapped read-write into this process.
///
/// The creator owns the name: dropping it unlinks the backing file, while
/// mappings held by other processes stay valid until they are dropped.
pub struct SharedMemory {
    _file: File,
    mmap: MmapMut,
    path: PathBuf,
    owner: bool,
}

impl SharedMemory {
    /// Create a new segment of `size_bytes`; fails if `path` already exists
    /// unless `purge` removes it first
    pub fn create<P: AsRef<Path>>(path: P, size_bytes: usize, purge: bool) -> io::Result<Self> {
        let path = path.as_ref();
        if purge {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(size_bytes as u64)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            _file: file,
            mmap,
            path: path.to_path_buf(),
            owner: true,
        })
    }

    /// Open an existing segment and map it with its current size
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            _file: file,
            mmap,
            path: path.to_path_buf(),
            owner: false,
        })
    }

    /// Pin the mapped pages in RAM (mlock)
    pub fn lock(&self) -> io::Result<()> {
        self.mmap.lock()
    }

    /// Return raw pointer to start of the mapped segment
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this mapping created the segment and unlinks it on drop
    pub fn owner(&self) -> bool {
        self.owner
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if self.owner {
            let _ = fs::remove_file(&self.path);
        }
    }
}
