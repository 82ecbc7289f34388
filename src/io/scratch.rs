use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};

/// Sparse local copy of a remote object, addressed by absolute offset.
///
/// Backed by an anonymous temporary file that disappears on drop.
#[derive(Debug)]
pub struct ScratchBuffer {
    file: File,
    len: u64,
}

impl ScratchBuffer {
    pub fn new(len: u64) -> io::Result<Self> {
        let file = tempfile::tempfile()?;
        file.set_len(len)?;
        Ok(Self { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    /// Read up to `size` bytes from the current position, or to the end.
    pub fn read_bytes(&mut self, size: Option<usize>) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match size {
            Some(size) => {
                (&mut self.file).take(size as u64).read_to_end(&mut out)?;
            }
            None => {
                self.file.read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }

    /// Write `data` at `offset`. The position ends up after the written bytes.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    /// Resize to `size`, or to the current position. The position is kept.
    pub fn truncate(&mut self, size: Option<u64>) -> io::Result<u64> {
        let size = match size {
            Some(size) => size,
            None => self.position()?,
        };
        self.file.set_len(size)?;
        self.len = size;
        Ok(size)
    }

    /// Remember the position and restore it when the guard is dropped.
    pub fn stay(&mut self) -> io::Result<Stay<'_>> {
        let position = self.position()?;
        Ok(Stay {
            buffer: self,
            position,
        })
    }
}

impl Read for ScratchBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for ScratchBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for ScratchBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Position guard returned by [`ScratchBuffer::stay`].
///
/// The saved position is restored on every exit path, including early
/// returns through `?`.
#[derive(Debug)]
pub struct Stay<'a> {
    buffer: &'a mut ScratchBuffer,
    position: u64,
}

impl Stay<'_> {
    pub fn saved_position(&self) -> u64 {
        self.position
    }
}

impl Deref for Stay<'_> {
    type Target = ScratchBuffer;

    fn deref(&self) -> &ScratchBuffer {
        self.buffer
    }
}

impl DerefMut for Stay<'_> {
    fn deref_mut(&mut self) -> &mut ScratchBuffer {
        self.buffer
    }
}

impl Drop for Stay<'_> {
    fn drop(&mut self) {
        let _ = self.buffer.file.seek(SeekFrom::Start(self.position));
    }
}
