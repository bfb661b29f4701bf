//! `io_uring`-backed batch, grounded on `original_source/service/src/
//! IOUring.hpp`'s contract: queue every read/write, submit once, and wait
//! for every completion before reporting per-operation results. Feature-
//! gated behind `uring` since it depends on a Linux kernel new enough to
//! support the ring (probed at construction via [`UringBatch::try_new`],
//! never assumed).

use std::io;
use std::os::unix::io::RawFd;

use io_uring::{opcode, types, IoUring};

use crate::error::Error;

use super::{BatchedIo, OpResult};

enum QueuedOp {
    Read { fd: RawFd, nbytes: usize, offset: i64 },
    Write { fd: RawFd, data: Vec<u8>, offset: i64 },
}

pub struct UringBatch {
    ring: IoUring,
    ops: Vec<QueuedOp>,
    read_data: Vec<Vec<u8>>,
}

impl UringBatch {
    /// Probes whether the kernel will accept a ring of this capacity;
    /// returns `None` rather than panicking if it won't (old kernel,
    /// seccomp filter, container without the syscall allowed).
    pub fn try_new(capacity: usize) -> Option<Self> {
        IoUring::new(capacity.max(1) as u32).ok().map(|ring| UringBatch {
            ring,
            ops: Vec::with_capacity(capacity),
            read_data: Vec::new(),
        })
    }
}

impl BatchedIo for UringBatch {
    fn prep_read(&mut self, fd: RawFd, nbytes: usize, offset: i64) -> usize {
        self.ops.push(QueuedOp::Read { fd, nbytes, offset });
        self.ops.len() - 1
    }

    fn prep_write(&mut self, fd: RawFd, data: Vec<u8>, offset: i64) -> usize {
        self.ops.push(QueuedOp::Write { fd, data, offset });
        self.ops.len() - 1
    }

    fn submit(&mut self) -> Vec<OpResult> {
        let ops = std::mem::take(&mut self.ops);
        let mut read_bufs: Vec<Option<Vec<u8>>> = ops
            .iter()
            .map(|op| match op {
                QueuedOp::Read { nbytes, .. } => Some(vec![0u8; *nbytes]),
                QueuedOp::Write { .. } => None,
            })
            .collect();

        // Safety: every buffer referenced by a submission entry below lives
        // in `read_bufs`/`ops` until `submit_and_wait` returns, and is never
        // reallocated (pushes finished above; nothing grows these vectors
        // again before the ring observes them).
        unsafe {
            for (i, op) in ops.iter().enumerate() {
                let entry = match op {
                    QueuedOp::Read { fd, nbytes, offset } => {
                        let buf = read_bufs[i].as_mut().expect("read slot");
                        opcode::Read::new(types::Fd(*fd), buf.as_mut_ptr(), *nbytes as u32)
                            .offset(*offset as u64)
                            .build()
                            .user_data(i as u64)
                    }
                    QueuedOp::Write { fd, data, offset } => {
                        opcode::Write::new(types::Fd(*fd), data.as_ptr(), data.len() as u32)
                            .offset(*offset as u64)
                            .build()
                            .user_data(i as u64)
                    }
                };
                if self.ring.submission().push(&entry).is_err() {
                    let _ = self.ring.submit();
                }
            }
        }

        let mut results: Vec<OpResult> = (0..ops.len())
            .map(|_| Err(Error::Logic("operation did not complete".to_string())))
            .collect();

        if !ops.is_empty() {
            let _ = self.ring.submit_and_wait(ops.len());
            for cqe in self.ring.completion() {
                let idx = cqe.user_data() as usize;
                let res = cqe.result();
                if idx < results.len() {
                    results[idx] = if res < 0 {
                        Err(Error::Io(io::Error::from_raw_os_error(-res)))
                    } else {
                        Ok(res as usize)
                    };
                }
            }
        }

        self.read_data = read_bufs.into_iter().map(|b| b.unwrap_or_default()).collect();
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
    fn round_trips_through_a_real_file_when_uring_is_available() {
        let Some(mut batch) = UringBatch::try_new(4) else {
            // Sandboxed/containerized CI without io_uring support; the
            // fallback implementation covers this same contract.
            return;
        };
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; 8]).unwrap();
        let fd = file.as_raw_fd();

        let write_idx = batch.prep_write(fd, vec![9u8; 4], 0);
        let results = batch.submit();
        assert!(results[write_idx].is_ok());

        let read_idx = batch.prep_read(fd, 4, 0);
        let results = batch.submit();
        assert!(results[read_idx].is_ok());
        assert_eq!(batch.read_bytes(read_idx), &[9u8; 4]);
    }
}
