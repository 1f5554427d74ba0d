use std::io;
use std::mem::size_of;

use crate::error::JitError;

/// native entry point signature: no arguments, returns the tape-pointer
/// register's final value in `rax`.
///
/// # Safety
///
/// the caller must guarantee `ptr` points at a `len`-byte region that is
/// currently mapped `PROT_READ | PROT_EXEC`, holds a valid System V AMD64
/// routine (our own prologue/body/epilogue), and that nothing else touches
/// the region while the call is in flight. this is the only unsafe boundary
/// in the crate; everywhere else, safety follows from ordinary Rust
/// ownership.
unsafe fn call_native(ptr: *const u8) -> u64 {
    let entry: extern "sysv64" fn() -> u64 = unsafe { std::mem::transmute(ptr) };
    entry()
}

/// an anonymous, executable memory region scoped to a single materialized
/// loop. release is explicit (`release`) on the success path so that an
/// `UnmapFailed` can be reported with the OS error text per the spec; if the
/// caller drops the guard without releasing (e.g. an earlier step already
/// failed), the `Drop` impl unmaps best-effort and swallows the result --
/// there is nothing further to report at that point.
struct ExecutablePage {
    ptr: *mut libc::c_void,
    len: usize,
    released: bool,
}

impl ExecutablePage {
    fn alloc(len: usize) -> Result<Self, JitError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(JitError::AllocFailed {
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self {
            ptr,
            len,
            released: false,
        })
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr as *mut u8
    }

    fn protect_exec(&mut self) -> Result<(), JitError> {
        let ret = unsafe { libc::mprotect(self.ptr, self.len, libc::PROT_READ | libc::PROT_EXEC) };
        if ret == 0 {
            return Ok(());
        }

        let protect_source = io::Error::last_os_error();
        match self.release() {
            Ok(()) => Err(JitError::ProtectFailed {
                source: protect_source,
            }),
            Err(JitError::UnmapFailed { source: unmap_source }) => Err(JitError::DoubleFault {
                protect_source,
                unmap_source,
            }),
            Err(other) => Err(other),
        }
    }

    fn release(&mut self) -> Result<(), JitError> {
        if self.released {
            return Ok(());
        }
        let ret = unsafe { libc::munmap(self.ptr, self.len) };
        self.released = true;
        if ret == 0 {
            Ok(())
        } else {
            Err(JitError::UnmapFailed {
                source: io::Error::last_os_error(),
            })
        }
    }
}

impl Drop for ExecutablePage {
    fn drop(&mut self) {
        if !self.released {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

/// copies `prologue`, then `loop_body`, then `epilogue` into a fresh
/// executable page, invokes it as a parameterless function, and releases
/// the page. returns the absolute address the tape-pointer register held
/// on exit.
///
/// allocate rw, copy, protect to rx, call, release -- in that order, with
/// the page released on every path except `DoubleFault`.
pub fn run(prologue: &[u8], loop_body: &[u8], epilogue: &[u8]) -> Result<u64, JitError> {
    let total_len = prologue.len() + loop_body.len() + epilogue.len();

    let mut page = ExecutablePage::alloc(total_len)?;

    unsafe {
        let base = page.as_mut_ptr();
        std::ptr::copy_nonoverlapping(prologue.as_ptr(), base, prologue.len());
        std::ptr::copy_nonoverlapping(
            loop_body.as_ptr(),
            base.add(prologue.len()),
            loop_body.len(),
        );
        std::ptr::copy_nonoverlapping(
            epilogue.as_ptr(),
            base.add(prologue.len() + loop_body.len()),
            epilogue.len(),
        );
    }

    page.protect_exec()?;

    // SAFETY: the region was just mprotect'd PROT_READ | PROT_EXEC above and
    // holds prologue + loop_body + epilogue, a complete System V routine.
    let result = unsafe { call_native(page.as_mut_ptr()) };

    page.release()?;

    Ok(result)
}

pub const ADDRESS_SIZE: usize = size_of::<u64>();
