use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::core::{Arg, Backend, BackendKind, Capabilities, Command, Result, StreamError};

bitflags! {
    /// How the file is opened. Set with [`Command::FILE_SET_MODE`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FileMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
    }
}

impl Default for FileMode {
    fn default() -> Self {
        FileMode::READ
    }
}

/// Local file backend.
pub struct FileBackend {
    path: Option<PathBuf>,
    mode: FileMode,
    file: Option<fs::File>,
    offset: u64,
    size: u64,
}

impl FileBackend {
    pub fn new() -> Self {
        Self {
            path: None,
            mode: FileMode::default(),
            file: None,
            offset: 0,
            size: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    fn file(&mut self) -> Result<&mut fs::File> {
        self.file.as_mut().ok_or(StreamError::Closed)
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ
            | Capabilities::WRITE
            | Capabilities::SEEK
            | Capabilities::BLOCK_READ
            | Capabilities::BLOCK_WRITE
    }

    fn open(&mut self) -> Result<()> {
        let path = self.path.clone().ok_or(StreamError::NotConfigured)?;
        if !self.mode.intersects(FileMode::READ | FileMode::WRITE | FileMode::APPEND) {
            return Err(StreamError::InvalidArgument(
                "file mode needs READ, WRITE or APPEND".into(),
            ));
        }

        let file = fs::OpenOptions::new()
            .read(self.mode.contains(FileMode::READ))
            .write(self.mode.contains(FileMode::WRITE))
            .append(self.mode.contains(FileMode::APPEND))
            .create(self.mode.contains(FileMode::CREATE))
            .truncate(self.mode.contains(FileMode::TRUNCATE))
            .open(&path)?;

        self.size = file.metadata()?.len();
        self.offset = if self.mode.contains(FileMode::APPEND) {
            self.size
        } else {
            0
        };
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self.file()?.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if n == 0 && !buf.is_empty() {
            return Err(StreamError::EndOfStream);
        }
        self.offset += n as u64;
        Ok(n)
    }

    fn raw_write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = match self.file()?.write(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        self.offset += n as u64;
        self.size = self.size.max(self.offset);
        Ok(n)
    }

    fn block_read(&mut self, buf: &mut [u8], _timeout_ms: u64) -> Result<usize> {
        let mut read = 0;
        while read < buf.len() {
            match self.raw_read(&mut buf[read..]) {
                Ok(n) => read += n,
                Err(StreamError::EndOfStream) if read > 0 => break,
                Err(e) => return Err(e),
            }
        }
        Ok(read)
    }

    fn block_write(&mut self, buf: &[u8], _timeout_ms: u64) -> Result<usize> {
        self.file()?.write_all(buf)?;
        self.offset += buf.len() as u64;
        self.size = self.size.max(self.offset);
        Ok(buf.len())
    }

    fn size(&self) -> Option<u64> {
        self.file.as_ref().map(|_| self.size)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file()?.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    fn ioctl1(&mut self, cmd: Command, arg: Arg<'_>) -> bool {
        match cmd {
            Command::SET_URL => match arg.as_str() {
                Some(path) if !path.is_empty() => {
                    self.path = Some(PathBuf::from(path));
                    true
                }
                _ => false,
            },
            Command::FILE_SET_MODE => {
                match arg
                    .as_int()
                    .and_then(|bits| u32::try_from(bits).ok())
                    .and_then(FileMode::from_bits)
                {
                    Some(mode) => {
                        self.mode = mode;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }
}
