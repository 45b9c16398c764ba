//! POSIX shared memory and message queue access.
//!
//! The registry segment is mapped `PROT_READ` only; the mapping never
//! writes. The reload message goes out on the daemon's request queue.

use std::io;

/// Why a registry segment could not be mapped.
#[derive(Debug)]
pub(crate) enum RegionError {
    /// No such segment; the daemon is not running.
    Missing(io::Error),
    /// Segment exists but its length disagrees with the descriptor.
    Length { actual: usize, expected: usize },
    /// Segment exists but could not be mapped.
    Map(io::Error),
}

#[cfg(target_os = "linux")]
pub(crate) use linux::{send_reload, SharedRegion};

#[cfg(not(target_os = "linux"))]
pub(crate) use fallback::{send_reload, SharedRegion};

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::CString;
    use std::fs::File;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::ptr::{self, NonNull};

    use super::RegionError;

    /// Read-only mapping of a named shared memory object.
    pub(crate) struct SharedRegion {
        ptr: NonNull<u8>,
        len: usize,
    }

    // The mapping is read-only and owned; reads copy bytes out.
    unsafe impl Send for SharedRegion {}
    unsafe impl Sync for SharedRegion {}

    fn c_name(name: &str) -> io::Result<CString> {
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    impl SharedRegion {
        pub(crate) fn open(name: &str, expected: usize) -> Result<Self, RegionError> {
            let cname = c_name(name).map_err(RegionError::Missing)?;
            // SAFETY: cname is a valid NUL-terminated string.
            let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDONLY, 0o660) };
            if fd < 0 {
                return Err(RegionError::Missing(io::Error::last_os_error()));
            }
            // SAFETY: fd was just returned by shm_open and is owned here.
            let file = unsafe { File::from_raw_fd(fd) };

            let actual = file.metadata().map_err(RegionError::Map)?.len() as usize;
            if actual != expected {
                return Err(RegionError::Length { actual, expected });
            }
            if expected == 0 {
                return Err(RegionError::Map(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "empty registry segment",
                )));
            }

            // SAFETY: length matches the object size; PROT_READ mapping of a
            // valid descriptor. The descriptor may be closed after mapping.
            let addr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    expected,
                    libc::PROT_READ,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };
            if addr == libc::MAP_FAILED {
                return Err(RegionError::Map(io::Error::last_os_error()));
            }
            let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
                RegionError::Map(io::Error::new(io::ErrorKind::Other, "null mapping"))
            })?;
            Ok(Self { ptr, len: expected })
        }

        pub(crate) fn len(&self) -> usize {
            self.len
        }

        /// Copy `buf.len()` bytes starting at `offset`. The daemon updates the
        /// segment concurrently, so each byte is read volatile.
        pub(crate) fn read(&self, offset: usize, buf: &mut [u8]) -> bool {
            let Some(end) = offset.checked_add(buf.len()) else {
                return false;
            };
            if end > self.len {
                return false;
            }
            for (i, byte) in buf.iter_mut().enumerate() {
                // SAFETY: offset + i < len, inside the live mapping.
                *byte = unsafe { ptr::read_volatile(self.ptr.as_ptr().add(offset + i)) };
            }
            true
        }
    }

    impl Drop for SharedRegion {
        fn drop(&mut self) {
            // SAFETY: ptr/len describe a mapping created in `open`.
            unsafe {
                libc::munmap(self.ptr.as_ptr().cast(), self.len);
            }
        }
    }

    /// Send one message on a POSIX queue and close it.
    pub(crate) fn send_reload(queue: &str, msg: &[u8]) -> io::Result<()> {
        let cname = c_name(queue)?;
        // SAFETY: valid C string, write-only open without creation.
        let mq = unsafe { libc::mq_open(cname.as_ptr(), libc::O_WRONLY) };
        if mq == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: msg is a live slice for the duration of the call.
        let status = unsafe { libc::mq_send(mq, msg.as_ptr().cast(), msg.len(), 0) };
        let err = io::Error::last_os_error();
        // SAFETY: mq is an open queue descriptor.
        unsafe {
            libc::mq_close(mq);
        }
        if status < 0 {
            return Err(err);
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use std::io::Write;

        use super::*;

        struct TestSegment(CString);

        impl TestSegment {
            fn create(name: &str, data: &[u8]) -> Self {
                let cname = CString::new(name).unwrap();
                let fd = unsafe {
                    libc::shm_open(
                        cname.as_ptr(),
                        libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                        0o600,
                    )
                };
                assert!(fd >= 0, "shm_open: {}", io::Error::last_os_error());
                let mut file = unsafe { File::from_raw_fd(fd) };
                file.set_len(data.len() as u64).unwrap();
                file.write_all(data).unwrap();
                Self(cname)
            }
        }

        impl Drop for TestSegment {
            fn drop(&mut self) {
                unsafe {
                    libc::shm_unlink(self.0.as_ptr());
                }
            }
        }

        #[test]
        fn test_map_and_read() {
            let name = format!("/apollo-shm-test-{}.registry", std::process::id());
            let data: Vec<u8> = (0..64u8).collect();
            let _segment = TestSegment::create(&name, &data);

            let region = SharedRegion::open(&name, data.len()).unwrap();
            assert_eq!(region.len(), 64);
            let mut buf = [0u8; 4];
            assert!(region.read(10, &mut buf));
            assert_eq!(buf, [10, 11, 12, 13]);
            assert!(!region.read(62, &mut buf));

            assert!(matches!(
                SharedRegion::open(&name, 128),
                Err(RegionError::Length {
                    actual: 64,
                    expected: 128
                })
            ));
        }

        #[test]
        fn test_missing_segment() {
            let name = format!("/apollo-shm-missing-{}.registry", std::process::id());
            assert!(matches!(
                SharedRegion::open(&name, 64),
                Err(RegionError::Missing(_))
            ));
        }

        #[test]
        fn test_send_to_missing_queue() {
            let name = format!("/apollo-mq-missing-{}", std::process::id());
            assert!(send_reload(&name, &[0u8; 8]).is_err());
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod fallback {
    use std::io;

    use super::RegionError;

    /// Shared registries are only published on Linux.
    pub(crate) struct SharedRegion;

    impl SharedRegion {
        pub(crate) fn open(_name: &str, _expected: usize) -> Result<Self, RegionError> {
            Err(RegionError::Missing(io::Error::new(
                io::ErrorKind::Unsupported,
                "shared registry not supported on this platform",
            )))
        }

        pub(crate) fn len(&self) -> usize {
            0
        }

        pub(crate) fn read(&self, _offset: usize, _buf: &mut [u8]) -> bool {
            false
        }
    }

    pub(crate) fn send_reload(_queue: &str, _msg: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "message queues not supported on this platform",
        ))
    }
}
