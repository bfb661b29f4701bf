//! Pread/pwrite fallback batch (spec.md §4.4), used when `io_uring` is
//! unavailable or disabled. Grounded on `original_source/service/src/
//! IOUringFallback.cpp`: queued operations are plain closures executed in
//! order inside `submit`, each one resetting `errno` immediately before its
//! syscall so a stale `errno` from an unrelated earlier failure can never
//! be misattributed to this operation (the original's exact phrasing:
//! "errno must be cleared before each pread/pwrite or a prior operation's
//! failure leaks into this one's result").

use std::io;
use std::os::unix::io::RawFd;

use crate::error::Error;

use super::{BatchedIo, OpResult};

enum Op {
    Read { fd: RawFd, nbytes: usize, offset: i64 },
    Write { fd: RawFd, data: Vec<u8>, offset: i64 },
}

pub struct FallbackBatch {
    ops: Vec<Op>,
    read_data: Vec<Vec<u8>>,
}

impl FallbackBatch {
    pub fn new(capacity: usize) -> Self {
        FallbackBatch { ops: Vec::with_capacity(capacity), read_data: Vec::new() }
    }
}

fn pread(fd: RawFd, nbytes: usize, offset: i64) -> (OpResult, Vec<u8>) {
    let mut buf = vec![0u8; nbytes];
    unsafe { *libc::__errno_location() = 0 };
    let n = unsafe { libc::pread(fd, buf.as_mut_ptr() as *mut _, nbytes, offset as libc::off_t) };
    if n < 0 {
        (Err(Error::Io(io::Error::last_os_error())), Vec::new())
    } else {
        buf.truncate(n as usize);
        (Ok(n as usize), buf)
    }
}

fn pwrite(fd: RawFd, data: &[u8], offset: i64) -> OpResult {
    unsafe { *libc::__errno_location() = 0 };
    let n = unsafe { libc::pwrite(fd, data.as_ptr() as *const _, data.len(), offset as libc::off_t) };
    if n < 0 {
        Err(Error::Io(io::Error::last_os_error()))
    } else {
        Ok(n as usize)
    }
}

impl BatchedIo for FallbackBatch {
    fn prep_read(&mut self, fd: RawFd, nbytes: usize, offset: i64) -> usize {
        self.ops.push(Op::Read { fd, nbytes, offset });
        self.ops.len() - 1
    }

    fn prep_write(&mut self, fd: RawFd, data: Vec<u8>, offset: i64) -> usize {
        self.ops.push(Op::Write { fd, data, offset });
        self.ops.len() - 1
    }

    fn submit(&mut self) -> Vec<OpResult> {
        let ops = std::mem::take(&mut self.ops);
        self.read_data = vec![Vec::new(); ops.len()];
        let mut results = Vec::with_capacity(ops.len());
        for (i, op) in ops.into_iter().enumerate() {
            let result = match op {
                Op::Read { fd, nbytes, offset } => {
                    let (result, data) = pread(fd, nbytes, offset);
                    self.read_data[i] = data;
                    result
                }
                Op::Write { fd, data, offset } => pwrite(fd, &data, offset),
            };
            results.push(result);
        }
        results
    }

    fn read_bytes(&self, index: usize) -> &[u8] {
        self.read_data.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn errno_is_reset_before_each_operation() {
        // An earlier failing read against a bad fd must not leak its errno
        // into a later, valid operation's result.
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[7u8; 4]).unwrap();
        let good_fd = file.as_raw_fd();

        let mut batch = FallbackBatch::new(4);
        let bad_idx = batch.prep_read(-1, 4, 0);
        let good_idx = batch.prep_read(good_fd, 4, 0);
        let results = batch.submit();

        assert!(results[bad_idx].is_err());
        assert!(results[good_idx].is_ok());
        assert_eq!(batch.read_bytes(good_idx), &[7u8; 4]);
    }

    #[test]
    fn queue_is_cleared_after_submit() {
        let mut batch = FallbackBatch::new(4);
        batch.prep_read(-1, 4, 0);
        batch.submit();
        assert!(batch.ops.is_empty());
    }
}
