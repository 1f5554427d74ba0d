use std::os::unix::io::RawFd;

use crate::encoder::Encoder;
use crate::error::JitError;
use crate::tape::Tape;

/// consumes the command stream, keeps the direct-interpreter state (tape,
/// head, skip level) consistent with "the program executed so far," and
/// forwards every command to the [`Encoder`] regardless of skip state.
///
/// `balance` is `[` minus `]` seen so far (never negative -- a `]` that
/// would make it negative is rejected eagerly, see [`Driver::feed`]);
/// `skip_level` is 0 while executing, or the nesting depth of the loop
/// whose body is currently being skipped because its guard byte was zero
/// at entry.
pub struct Driver {
    tape: Tape,
    encoder: Encoder,
    fd_in: RawFd,
    fd_out: RawFd,
    balance: isize,
    skip_level: usize,
}

impl Driver {
    pub fn new(tape_size: usize, fd_in: RawFd, fd_out: RawFd) -> Self {
        let mut tape = Tape::new(tape_size);
        let tape_base = tape.base_ptr();
        Self {
            tape,
            encoder: Encoder::new(tape_base, fd_in, fd_out),
            fd_in,
            fd_out,
            balance: 0,
            skip_level: 0,
        }
    }

    fn skipping(&self) -> bool {
        self.skip_level != 0
    }

    /// feeds one character of source. all eight recognized commands are
    /// dispatched; everything else (whitespace, comments) is ignored.
    pub fn feed(&mut self, c: char) -> Result<(), JitError> {
        match c {
            '+' => {
                if !self.skipping() {
                    let cell = self.tape.current_mut();
                    *cell = cell.wrapping_add(1);
                }
                self.encoder.emit_inc();
            }
            '-' => {
                if !self.skipping() {
                    let cell = self.tape.current_mut();
                    *cell = cell.wrapping_sub(1);
                }
                self.encoder.emit_dec();
            }
            '<' => {
                if !self.skipping() {
                    self.tape.set_head(self.tape.head().wrapping_sub(1));
                }
                self.encoder.emit_left();
            }
            '>' => {
                if !self.skipping() {
                    self.tape.set_head(self.tape.head().wrapping_add(1));
                }
                self.encoder.emit_right();
            }
            '.' => {
                if !self.skipping() {
                    write_one_byte(self.fd_out, self.tape.current());
                }
                self.encoder.emit_output();
            }
            ',' => {
                if !self.skipping() {
                    if let Some(byte) = read_one_byte(self.fd_in) {
                        *self.tape.current_mut() = byte;
                    }
                    // a short read (EOF) leaves the cell unchanged, carried
                    // through unmodified from the original's
                    // single-read-no-retry behavior.
                }
                self.encoder.emit_input();
            }
            '[' => {
                self.balance += 1;
                if !self.skipping() && self.tape.current() == 0 {
                    self.skip_level = self.balance as usize;
                }
                self.encoder.emit_loop_start();
            }
            ']' => {
                if self.balance == 0 {
                    return Err(JitError::Malformed {
                        reason: "`]` with no matching `[`".to_string(),
                    });
                }

                self.encoder.emit_loop_end()?;
                self.balance -= 1;

                if (self.balance as usize) < self.skip_level {
                    self.skip_level = 0;
                }

                if !self.skipping() && self.tape.current() != 0 {
                    let new_head = self.encoder.materialize_last_loop(self.tape.head())?;
                    self.tape.set_head(new_head);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// must be called once the command stream is exhausted. rejects an
    /// unmatched `[` left open at end of stream.
    pub fn finish(self) -> Result<(), JitError> {
        if self.balance != 0 {
            return Err(JitError::Malformed {
                reason: format!("{} unmatched opening bracket(s)", self.balance),
            });
        }
        Ok(())
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn balance(&self) -> isize {
        self.balance
    }

    pub fn skip_level(&self) -> usize {
        self.skip_level
    }
}

fn write_one_byte(fd: RawFd, byte: u8) {
    // a direct, un-retried single-byte write, matching the one emitted into
    // native code for `.`.
    unsafe {
        libc::write(fd, &byte as *const u8 as *const _, 1);
    }
}

fn read_one_byte(fd: RawFd) -> Option<u8> {
    let mut byte = 0u8;
    let n = unsafe { libc::read(fd, &mut byte as *mut u8 as *mut _, 1) };
    if n == 1 { Some(byte) } else { None }
}

/// feeds an entire command stream through a fresh [`Driver`] and finishes
/// it, the shape every caller (CLI and tests alike) uses.
pub fn run(
    source: impl Iterator<Item = char>,
    tape_size: usize,
    fd_in: RawFd,
    fd_out: RawFd,
) -> Result<(), JitError> {
    let mut driver = Driver::new(tape_size, fd_in, fd_out);
    for c in source {
        driver.feed(c)?;
    }
    driver.finish()
}
