//! black-box scenarios from spec.md §8, driven against hermetic in-memory
//! pipes rather than the process's real stdin/stdout.

use std::os::unix::io::RawFd;

use tapejit::driver;

const TEST_TAPE_SIZE: usize = 4096;

struct Pipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Pipe {
    fn new() -> Self {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0, "failed to create pipe");
        Self {
            read_fd: fds[0],
            write_fd: fds[1],
        }
    }
}

/// runs `program` with `stdin_data` as its input, returns everything it
/// wrote to its output.
fn run_program(program: &str, stdin_data: &[u8]) -> Vec<u8> {
    let stdin_pipe = Pipe::new();
    let stdout_pipe = Pipe::new();

    unsafe {
        let n = libc::write(
            stdin_pipe.write_fd,
            stdin_data.as_ptr() as *const _,
            stdin_data.len(),
        );
        assert_eq!(n as usize, stdin_data.len());
        libc::close(stdin_pipe.write_fd);
    }

    driver::run(
        program.chars(),
        TEST_TAPE_SIZE,
        stdin_pipe.read_fd,
        stdout_pipe.write_fd,
    )
    .expect("program should run cleanly");

    unsafe {
        libc::close(stdin_pipe.read_fd);
        libc::close(stdout_pipe.write_fd);
    }

    let mut output = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = unsafe {
            libc::read(
                stdout_pipe.read_fd,
                buf.as_mut_ptr() as *mut _,
                buf.len(),
            )
        };
        if n <= 0 {
            break;
        }
        output.extend_from_slice(&buf[..n as usize]);
    }
    unsafe {
        libc::close(stdout_pipe.read_fd);
    }

    output
}

#[test]
fn echoes_one_byte_from_stdin() {
    let output = run_program(",.", b"A");
    assert_eq!(output, b"A");
}

#[test]
fn adds_two_then_prints() {
    let output = run_program("++++++++[>++++++++<-]>+.", b"");
    assert_eq!(output, b"A");
}

#[test]
fn hello_world() {
    // the canonical 106-byte program.
    let program =
        "++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";
    let output = run_program(program, b"");
    assert_eq!(String::from_utf8(output).unwrap(), "Hello World!\n");
}

#[test]
fn dead_loop_on_zero_tape_is_skipped_entirely() {
    let output = run_program("[>+<-]+.", b"");
    assert_eq!(output, vec![0x01]);
}

#[test]
fn nested_loop_drains_cell_one_into_cell_two() {
    // tape[0]=2 (outer counter), tape[1]=3; the inner loop fully drains
    // tape[1] into tape[2] on the outer loop's first iteration, so the
    // second outer iteration's inner loop is a no-op on an already-zero
    // cell. final: tape[0]=0, tape[1]=0, tape[2]=3.
    let mut driver = driver::Driver::new(TEST_TAPE_SIZE, 0, 1);
    for c in "++>+++<[->[->+<]<]".chars() {
        driver.feed(c).unwrap();
    }

    let cells = driver.tape().cells();
    assert_eq!(cells[0], 0);
    assert_eq!(cells[1], 0);
    assert_eq!(cells[2], 3);

    driver.finish().unwrap();
}

#[test]
fn unmatched_open_is_malformed_at_end_of_stream() {
    let mut driver = driver::Driver::new(TEST_TAPE_SIZE, 0, 1);
    for c in "[+".chars() {
        driver.feed(c).unwrap();
    }
    assert!(driver.finish().is_err());
}

#[test]
fn unmatched_close_is_malformed_on_sight() {
    let mut driver = driver::Driver::new(TEST_TAPE_SIZE, 0, 1);
    assert!(driver.feed(']').is_err());
}
