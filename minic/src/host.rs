//! Host services: the built-ins that cross out of the machine.
//!
//! The machine itself never touches the process's file descriptors or
//! standard output; everything goes through a [`Host`], so tests can
//! substitute one that captures output and serves canned files.

use std::fs::File;
use std::io::{self, Read, Write};

pub trait Host {
    /// Opens a file for reading and returns a descriptor, or a
    /// negative value on failure. `flags` mirror the source-level
    /// argument and are ignored; files are always read-only.
    fn open(&mut self, path: &str, flags: i64) -> i64;

    /// Reads up to `buf.len()` bytes; returns the byte count or a
    /// negative value on failure.
    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64;

    fn close(&mut self, fd: i64) -> i64;

    /// Delivers rendered `printf` output.
    fn write_out(&mut self, text: &str);
}

/// Host backed by the real filesystem and standard output.
#[derive(Default)]
pub struct StdHost {
    /// Open files, indexed by descriptor minus [`StdHost::FD_BASE`].
    files: Vec<Option<File>>,
}

impl StdHost {
    /// Descriptors start past the conventional stdio range.
    const FD_BASE: i64 = 3;

    pub fn new() -> Self {
        StdHost::default()
    }

    fn file_mut(&mut self, fd: i64) -> Option<&mut File> {
        let index = usize::try_from(fd.checked_sub(Self::FD_BASE)?).ok()?;
        self.files.get_mut(index)?.as_mut()
    }
}

impl Host for StdHost {
    fn open(&mut self, path: &str, _flags: i64) -> i64 {
        match File::open(path) {
            Ok(file) => {
                self.files.push(Some(file));
                self.files.len() as i64 - 1 + Self::FD_BASE
            }
            Err(_) => -1,
        }
    }

    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64 {
        match self.file_mut(fd) {
            Some(file) => match file.read(buf) {
                Ok(count) => count as i64,
                Err(_) => -1,
            },
            None => -1,
        }
    }

    fn close(&mut self, fd: i64) -> i64 {
        let Some(index) = fd
            .checked_sub(Self::FD_BASE)
            .and_then(|n| usize::try_from(n).ok())
        else {
            return -1;
        };
        match self.files.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                0
            }
            _ => -1,
        }
    }

    fn write_out(&mut self, text: &str) {
        print!("{}", text);
        let _ = io::stdout().flush();
    }
}
