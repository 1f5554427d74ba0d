use std::fs::read_to_string;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use tapejit::driver;

const DEFAULT_TAPE_SIZE: usize = 1_000_000;

/// interpret an eight-command tape program with just-in-time compilation
#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path to the source file
    path: PathBuf,
}

fn print_usage() {
    println!(
        "Usage: tapejit <code file>\n\
         \u{20}  Interpret an eight-command tape program with Just-In-Time optimization\n\
         \u{20}  Interpreted program reads symbols from stdin and writes to stdout"
    );
}

fn entry() -> anyhow::Result<()> {
    // the spec's CLI contract is "zero or more than one argument prints
    // usage and exits 0" -- an unusual exit code for misuse, preserved
    // verbatim from the original this crate is built from. clap's own
    // argument-count error path (a non-zero exit) is deliberately bypassed
    // by checking the count by hand before clap ever sees the arguments;
    // clap is still used to give the single accepted argument proper
    // `--help`/`--version` handling.
    if std::env::args().count() != 2 {
        print_usage();
        return Ok(());
    }

    let cli = Cli::parse();
    let code = read_to_string(&cli.path)?;

    eprintln!("* compiling and running {}", cli.path.display());

    let fd_in: RawFd = libc::STDIN_FILENO;
    let fd_out: RawFd = libc::STDOUT_FILENO;

    driver::run(code.chars(), DEFAULT_TAPE_SIZE, fd_in, fd_out)?;

    Ok(())
}

fn main() {
    if let Err(err) = entry() {
        let msg = format!("! fatal error: {err:?}").to_lowercase();
        println!("{msg}");
        exit(1);
    }
}
