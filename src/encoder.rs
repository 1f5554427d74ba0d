use std::os::unix::io::RawFd;

use crate::error::JitError;
use crate::loader;

/// size of the fixed prologue: push rbp ; mov rbp,rsp ; mov rbx,<imm64>
const PROLOGUE_LEN: usize = 4 + 2 + loader::ADDRESS_SIZE;
/// size of the fixed epilogue: mov rax,rbx ; pop rbp ; ret
const EPILOGUE_LEN: usize = 3 + 1 + 1;

/// converts the eight-command stream into x86-64 machine code as it
/// arrives, and materializes the most recently closed loop onto an
/// executable page on demand.
///
/// the tape-pointer register is `rbx` (callee-saved, matching the System V
/// ABI so the compiled body can freely call into a `syscall` without
/// clobbering it across the `.`/`,` sequences below). the frame register is
/// `rbp`. every emitted loop body is a complete, independently callable
/// routine once wrapped in the prologue/epilogue built in
/// [`Encoder::materialize_last_loop`].
pub struct Encoder {
    tape_base: *mut u8,
    fd_in: RawFd,
    fd_out: RawFd,
    buf: Vec<u8>,
    open_loops: Vec<usize>,
    last_cycle: usize,
}

impl Encoder {
    pub fn new(tape_base: *mut u8, fd_in: RawFd, fd_out: RawFd) -> Self {
        Self {
            tape_base,
            fd_in,
            fd_out,
            buf: Vec::new(),
            open_loops: Vec::new(),
            last_cycle: 0,
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn emit_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_left(&mut self) {
        self.emit(&[0x48, 0xFF, 0xCB]); // dec rbx
    }

    pub fn emit_right(&mut self) {
        self.emit(&[0x48, 0xFF, 0xC3]); // inc rbx
    }

    pub fn emit_inc(&mut self) {
        self.emit(&[0xFE, 0x03]); // inc byte ptr [rbx]
    }

    pub fn emit_dec(&mut self) {
        self.emit(&[0xFE, 0x0B]); // dec byte ptr [rbx]
    }

    pub fn emit_output(&mut self) {
        self.emit(&[0x48, 0x89, 0xDE]); // mov rsi, rbx
        self.emit(&[0x48, 0xC7, 0xC7]); // mov rdi, <fd_out>
        self.emit_i32(self.fd_out as i32);
        self.emit(&[0x48, 0xC7, 0xC2, 0x01, 0x00, 0x00, 0x00]); // mov rdx, 1
        self.emit(&[0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00]); // mov rax, 1 (sys_write)
        self.emit(&[0x0F, 0x05]); // syscall
    }

    pub fn emit_input(&mut self) {
        self.emit(&[0x48, 0x89, 0xDE]); // mov rsi, rbx
        self.emit(&[0x48, 0xC7, 0xC7]); // mov rdi, <fd_in>
        self.emit_i32(self.fd_in as i32);
        self.emit(&[0x48, 0xC7, 0xC2, 0x01, 0x00, 0x00, 0x00]); // mov rdx, 1
        self.emit(&[0x48, 0xC7, 0xC0, 0x00, 0x00, 0x00, 0x00]); // mov rax, 0 (sys_read)
        self.emit(&[0x0F, 0x05]); // syscall
    }

    pub fn emit_loop_start(&mut self) {
        self.emit(&[0x80, 0x3B, 0x00]); // cmp byte ptr [rbx], 0
        self.emit(&[0x0F, 0x84]); // jz <rel32, placeholder>
        self.emit_i32(0);
        self.open_loops.push(self.buf.len());
    }

    /// back-patches the matching `[`'s forward jump and appends the
    /// backward jump that closes the loop.
    pub fn emit_loop_end(&mut self) -> Result<(), JitError> {
        let top = self.open_loops.pop().ok_or_else(|| JitError::Malformed {
            reason: "`]` with no matching `[`".to_string(),
        })?;

        // bytes emitted inside the loop body since the `[`'s placeholder.
        let mut forward = (self.buf.len() - top) as i32;

        let je_addr_pos = top - 4;

        // account for the backward jmp (opcode + rel32) we're about to emit,
        // so the forward jump lands just past it.
        forward += 1 + 4;
        self.buf[je_addr_pos..je_addr_pos + 4].copy_from_slice(&forward.to_le_bytes());

        // account for cmp (3) + jz opcode+rel32 (6) preceding the
        // placeholder, giving the full loop span for the backward jump.
        let loop_span = forward + 3 + 2 + 4;

        self.emit(&[0xE9]); // jmp <rel32>
        self.emit_i32(-loop_span);

        self.last_cycle = self.buf.len() - loop_span as usize;

        Ok(())
    }

    /// builds the prologue/epilogue around the most recently closed loop's
    /// encoded body, runs it on a fresh executable page, and returns the
    /// resulting head position.
    pub fn materialize_last_loop(&mut self, head: usize) -> Result<usize, JitError> {
        let loop_body = &self.buf[self.last_cycle..];

        let mut prologue = Vec::with_capacity(PROLOGUE_LEN);
        prologue.extend_from_slice(&[0x55, 0x48, 0x89, 0xe5]); // push rbp ; mov rbp,rsp
        prologue.extend_from_slice(&[0x48, 0xBB]); // mov rbx, <imm64>
        let address = unsafe { self.tape_base.add(head) } as u64;
        prologue.extend_from_slice(&address.to_le_bytes());

        let epilogue: [u8; EPILOGUE_LEN] = [0x48, 0x89, 0xD8, 0x5d, 0xc3]; // mov rax,rbx ; pop rbp ; ret

        let result = loader::run(&prologue, loop_body, &epilogue)?;

        Ok((result - self.tape_base as u64) as usize)
    }

    #[cfg(test)]
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    #[cfg(test)]
    pub fn open_loop_depth(&self) -> usize {
        self.open_loops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_encoder() -> Encoder {
        // no native code is invoked in these tests; a dangling tape_base is
        // fine as long as materialize_last_loop is never called.
        Encoder::new(std::ptr::null_mut(), 0, 1)
    }

    #[test]
    fn loop_open_records_placeholder_and_pushes_stack() {
        let mut enc = new_encoder();
        enc.emit_loop_start();
        assert_eq!(enc.open_loop_depth(), 1);
        assert_eq!(enc.buf().len(), 3 + 2 + 4);
    }

    #[test]
    fn loop_close_without_open_is_malformed() {
        let mut enc = new_encoder();
        assert!(enc.emit_loop_end().is_err());
    }

    #[test]
    fn balanced_loop_patches_forward_jump_to_land_past_backward_jump() {
        let mut enc = new_encoder();
        enc.emit_loop_start();
        enc.emit_inc(); // 2 bytes of body
        enc.emit_loop_end().unwrap();

        assert_eq!(enc.open_loop_depth(), 0);

        let buf = enc.buf();
        // placeholder lives at bytes [5..9) (after cmp(3) + jz opcode(2))
        let patched = i32::from_le_bytes(buf[5..9].try_into().unwrap());
        // body (2 bytes) + backward jmp (5 bytes) = 7
        assert_eq!(patched, 7);

        let backward_rel_pos = buf.len() - 4;
        let backward_rel = i32::from_le_bytes(buf[backward_rel_pos..].try_into().unwrap());
        // total loop span: cmp+jz(9) + body(2) + jmp(5) = 16
        assert_eq!(backward_rel, -16);
    }

    #[test]
    fn last_cycle_marker_points_at_loop_start() {
        let mut enc = new_encoder();
        enc.emit_right(); // unrelated preceding code
        let pre_loop_len = enc.buf().len();
        enc.emit_loop_start();
        enc.emit_dec();
        enc.emit_loop_end().unwrap();

        assert_eq!(enc.last_cycle, pre_loop_len);
    }
}
