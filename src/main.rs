use std::{
    env,
    fs::File,
    io::{stdout, BufReader, Write},
    process,
};

use log::{debug, error};
use machodump::{dump::dump, MachO, MachOResult};

fn run(path: &str) -> MachOResult<()> {
    let file = File::open(path)?;
    let macho = MachO::parse(BufReader::new(file))?;
    debug!("decoded {} load commands", macho.load_commands.len());

    let stdout = stdout();
    let mut out = stdout.lock();
    dump(&mut out, &macho)?;
    out.flush()?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        let prog = args.first().map(String::as_str).unwrap_or("machodump");
        eprintln!("Usage: {} <file_path>", prog);
        return;
    }

    if let Err(e) = run(&args[1]) {
        error!("{}: {}", args[1], e);
        eprintln!("{}: {}", args[1], e);
        process::exit(1);
    }
}
