use loxide::{CliReporter, InterpretError, Vm};
use rustyline::Editor;
use std::{env, fs, path::PathBuf, process::exit};

enum Mode {
    Repl,
    File(PathBuf),
    Help,
    Version,
}

impl TryFrom<env::Args> for Mode {
    type Error = ();

    fn try_from(mut args: env::Args) -> Result<Self, Self::Error> {
        args.next();
        let mode = match args.next() {
            None => Mode::Repl,
            Some(arg) => match arg.as_str() {
                "--help" => Mode::Help,
                "--version" => Mode::Version,
                _ => Mode::File(PathBuf::from(arg)),
            },
        };
        if args.next().is_some() {
            return Err(());
        }
        Ok(mode)
    }
}

fn main() {
    let mode = Mode::try_from(env::args()).unwrap_or_else(|_| {
        eprintln!("usage: loxide [path]");
        exit(exitcode::USAGE);
    });

    match mode {
        Mode::Version => println!("{}", env!("CARGO_PKG_VERSION")),
        Mode::Help => print!("{}", include_str!("../help.md")),
        Mode::Repl => run_repl(),
        Mode::File(path) => run_file(path),
    }
}

fn run_repl() {
    let mut vm = Vm::new();
    let mut rl = Editor::<()>::new();
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(&line);
                let mut reporter = CliReporter::new();
                vm.interpret(&line, &mut reporter).ok();
            }
            Err(_) => break,
        }
    }
}

fn run_file(path: PathBuf) {
    let source = fs::read_to_string(&path).unwrap_or_else(|err| {
        eprintln!("could not read {}: {}", path.display(), err);
        exit(exitcode::IOERR);
    });

    let mut vm = Vm::new();
    let mut reporter = CliReporter::new();
    match vm.interpret(&source, &mut reporter) {
        Ok(()) => {}
        Err(InterpretError::Compile) => exit(exitcode::DATAERR),
        Err(InterpretError::Runtime) => exit(exitcode::SOFTWARE),
    }
}
