use decodergen::driver::Driver;

const USAGE: &str = "\
usage: decodergen [options] <input-file>...

options:
  --output_dir <dir>    directory to write <prefix>_decoder.{h,cc} into (default: ./)
  --prefix <name>        required; names the emitted files and header guard
  --isa_name <name>      assert the parsed ISA's name matches <name>
  --include <dirs>       comma-separated list of include search roots
  -v, --verbose          raise log verbosity for this run
  -h, --help             print this message and exit";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut driver = Driver::new();
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                println!("{USAGE}");
                return;
            }
            "-v" | "--verbose" => verbose = true,
            "--output_dir" => {
                i += 1;
                match args.get(i) {
                    Some(v) => driver.output_dir = v.into(),
                    None => {
                        eprintln!("error: --output_dir requires an argument");
                        std::process::exit(1);
                    }
                }
            }
            "--prefix" => {
                i += 1;
                match args.get(i) {
                    Some(v) => driver.prefix = v.clone(),
                    None => {
                        eprintln!("error: --prefix requires an argument");
                        std::process::exit(1);
                    }
                }
            }
            "--isa_name" => {
                i += 1;
                match args.get(i) {
                    Some(v) => driver.isa_name = Some(v.clone()),
                    None => {
                        eprintln!("error: --isa_name requires an argument");
                        std::process::exit(1);
                    }
                }
            }
            "--include" => {
                i += 1;
                match args.get(i) {
                    Some(v) => driver.include_dirs.extend(v.split(',').map(std::path::PathBuf::from)),
                    None => {
                        eprintln!("error: --include requires an argument");
                        std::process::exit(1);
                    }
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("warning: unknown flag: {arg}");
            }
            _ => driver.input_files.push(args[i].clone()),
        }
        i += 1;
    }

    driver.verbose = verbose;
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if driver.input_files.is_empty() {
        eprintln!("error: no input files");
        std::process::exit(1);
    }

    match driver.run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
