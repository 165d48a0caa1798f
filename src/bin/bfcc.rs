use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process;

use clap::{App, Arg};
use log::{debug, info};

use bfcc::{Arch, Codegen, CodegenError, Config, Diagnostic, ElfObject, ARCHES, DEFAULT_TAPE_SIZE};

/// Source is handed to the codegen this many bytes at a time
const CHUNK_SIZE: usize = 256;

struct Options {
    arch: Arch,
    strict: bool,
    tape_size: u32,
    dump_ir: bool,
    output: Option<String>,
    input: String,
}

fn validate_tape_size(value: String) -> Result<(), String> {
    match value.parse::<i32>() {
        Ok(size) if size > 0 => Ok(()),
        _ => Err(format!("expected a size between 1 and {}", i32::MAX)),
    }
}

impl Options {
    fn match_options() -> Self {
        let default_tape_size = DEFAULT_TAPE_SIZE.to_string();
        let default_arch = Arch::host().unwrap_or(Arch::X86_64).name();
        let matches = App::new("bfcc")
            .version("0.0.1")
            .author("Ian D. Scott <ian@iandouglasscott.com>")
            .about("Brainfuck compiler emitting native object files")
            .arg(
                Arg::with_name("arch")
                    .long("arch")
                    .help("Target architecture")
                    .takes_value(true)
                    .possible_values(&ARCHES.keys().cloned().collect::<Vec<&str>>())
                    .default_value(default_arch),
            )
            .arg(
                Arg::with_name("strict")
                    .long("strict")
                    .help("Reject characters that are not commands or whitespace"),
            )
            .arg(
                Arg::with_name("tape_size")
                    .long("tape-size")
                    .help("Size of tape")
                    .takes_value(true)
                    .empty_values(false)
                    .default_value(&default_tape_size)
                    .validator(validate_tape_size)
                    .value_name("bytes"),
            )
            .arg(
                Arg::with_name("dump_ir")
                    .long("dump-ir")
                    .help("Dump the code buffer listing; for debugging"),
            )
            .arg(
                Arg::with_name("out_name")
                    .short("o")
                    .help("Output file name")
                    .takes_value(true)
                    .empty_values(false)
                    .value_name("file"),
            )
            .arg(
                Arg::with_name("FILENAME")
                    .help("Source file to compile, or - for stdin")
                    .required(true)
                    .index(1),
            )
            .get_matches();

        // Both were validated by clap
        let arch = matches
            .value_of("arch")
            .and_then(Arch::from_name)
            .unwrap_or(Arch::X86_64);
        let tape_size = matches
            .value_of("tape_size")
            .and_then(|size| size.parse().ok())
            .unwrap_or(DEFAULT_TAPE_SIZE);

        Options {
            arch,
            strict: matches.is_present("strict"),
            tape_size,
            dump_ir: matches.is_present("dump_ir"),
            output: matches.value_of("out_name").map(str::to_string),
            input: matches.value_of("FILENAME").unwrap_or("-").to_string(),
        }
    }

    fn output_name(&self) -> String {
        if let Some(output) = &self.output {
            return output.clone();
        }
        if self.dump_ir || self.input == "-" {
            return "-".to_string();
        }
        let stem = Path::new(&self.input)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input.clone());
        format!("{}.o", stem)
    }
}

fn open_input_file(name: &str) -> io::Result<Box<dyn Read>> {
    if name == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(File::open(name)?))
    }
}

fn open_output_file(name: &str) -> io::Result<Box<dyn Write>> {
    if name == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(File::create(name)?))
    }
}

/// Feeds the whole input through `codegen`, keeping a copy of the source
/// for error reporting. A read error leaves `codegen` frozen or failed,
/// so it can be dropped without freezing half a program.
fn compile(
    codegen: &mut dyn Codegen,
    input: &mut dyn Read,
    source: &mut Vec<u8>,
) -> io::Result<Result<(), CodegenError>> {
    let mut chunk = [0; CHUNK_SIZE];
    loop {
        let n = match input.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                if let Err(unfinished) = codegen.freeze() {
                    debug!("discarding codegen after read error: {}", unfinished);
                }
                return Err(err);
            }
        };
        source.extend_from_slice(&chunk[..n]);
        if let Err(err) = codegen.consume(&chunk[..n]) {
            return Ok(Err(err));
        }
    }
    Ok(codegen.freeze())
}

fn fail(err: &CodegenError, source: &[u8], input: &str) -> ! {
    eprintln!("{}: {}", input, Diagnostic::new(err, source));
    process::exit(1);
}

fn main() -> io::Result<()> {
    env_logger::init();
    let options = Options::match_options();

    let config = Config {
        strict: options.strict,
        tape_size: options.tape_size,
    };
    let mut codegen = options.arch.codegen(config);

    let mut input = open_input_file(&options.input)?;
    let mut source = Vec::new();
    if let Err(err) = compile(&mut *codegen, &mut input, &mut source)? {
        fail(&err, &source, &options.input);
    }
    info!(
        "compiled {} bytes of source for {} ({})",
        codegen.consumed(),
        options.arch,
        options.arch.bfd_name()
    );

    let out_name = options.output_name();
    let mut out = open_output_file(&out_name)?;
    if options.dump_ir {
        out.write_all(codegen.listing().as_bytes())?;
        return out.flush();
    }

    let mut object = ElfObject::for_arch(options.arch);
    if let Err(err) = codegen.dump(&mut object) {
        fail(&err, &source, &options.input);
    }
    object.write_to(&mut out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Yields `data` once, then fails every read
    struct Truncated<'a> {
        data: Option<&'a [u8]>,
    }

    impl<'a> Read for Truncated<'a> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.take() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                None => Err(io::Error::new(io::ErrorKind::Other, "device went away")),
            }
        }
    }

    #[test]
    fn read_error_inside_a_loop_is_returned() {
        let mut codegen = Arch::X86_64.codegen(Config::default());
        let mut input = Truncated { data: Some(b"+[>") };
        let mut source = Vec::new();

        let err = compile(&mut *codegen, &mut input, &mut source).unwrap_err();
        assert_eq!(err.to_string(), "device went away");
        assert_eq!(source, b"+[>");
        assert!(codegen.frozen().is_none());
        assert!(codegen.freeze().is_err());
        // Dropping the failed instance must not panic
        drop(codegen);
    }

    #[test]
    fn read_error_between_commands_still_freezes() {
        let mut codegen = Arch::I386.codegen(Config::default());
        let mut input = Truncated { data: Some(b"+.") };
        let mut source = Vec::new();

        assert!(compile(&mut *codegen, &mut input, &mut source).is_err());
        assert!(codegen.frozen().is_some());
    }
}
