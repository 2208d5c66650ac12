use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use bitbuddy::util::{aligned_buf, logging};
use bitbuddy::BuddyAlloc;
use clap::Parser;

/// Interactive driver for the buddy allocator.
#[derive(Parser, Debug)]
#[command(about, version, author)]
struct Args {
    /// Arena size in bytes (power of two)
    size: usize,
    /// Number of tree levels
    #[arg(short, long, default_value_t = 4)]
    levels: usize,
}

fn main() -> ExitCode {
    let Args { size, levels } = Args::parse();

    logging();

    let mut arena = aligned_buf(size);
    let mut alloc = match BuddyAlloc::new(arena.as_mut_ptr().cast(), size, levels) {
        Ok(alloc) => alloc,
        Err(e) => {
            eprintln!("unusable arena configuration: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        prompt("> ");
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // end of input
            Ok(_) => {}
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
        match line.trim().chars().next() {
            Some('a' | 'A') => {
                let Some(size) = ask(&stdin, "size: ") else {
                    continue;
                };
                match alloc.get(size) {
                    Ok(block) => println!("{:#x}", block as usize),
                    Err(e) => println!("allocation failed: {e:?}"),
                }
            }
            Some('f' | 'F') => {
                let Some(addr) = ask(&stdin, "address: ") else {
                    continue;
                };
                match alloc.put(addr as *mut u8) {
                    Ok(()) => println!("freed"),
                    Err(e) => println!("free failed: {e:?}"),
                }
            }
            Some('p' | 'P') => println!("{alloc:?}"),
            Some('q' | 'Q') => break,
            Some(c) => println!("unknown command '{c}' (A, F, P, Q)"),
            None => {}
        }
    }
    ExitCode::SUCCESS
}

fn prompt(msg: &str) {
    print!("{msg}");
    let _ = io::stdout().flush();
}

/// Prompt for a decimal or 0x-prefixed hex number.
fn ask(stdin: &io::Stdin, msg: &str) -> Option<usize> {
    prompt(msg);
    let mut line = String::new();
    stdin.lock().read_line(&mut line).ok()?;
    let s = line.trim();
    let num = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    match num {
        Ok(n) => Some(n),
        Err(_) => {
            println!("not a number: '{s}'");
            None
        }
    }
}
