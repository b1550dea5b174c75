//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use clap::{ArgGroup, Parser, ValueEnum};
use gettextrs::{bind_textdomain_codeset, gettext, setlocale, textdomain, LocaleCategory};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tarball::blocked_io::{parse_blocksize, ByteStream, ReadPipe, WritePipe, DEFAULT_RECORD_SIZE};
use tarball::compression::{auto_decompress, GzipWriter};
use tarball::modes::{self, AppendOptions, CreateOptions, ExtractOptions, ListOptions, StreamMeta};
use tarball::{ArchiveFormat, LocalFs, Mask, TarError, TarResult, Timestamp};

/// Archive formats accepted by -H
#[derive(ValueEnum, Clone, Debug, Copy)]
enum Format {
    V7,
    Ustar,
    Posix,
    Gnu,
    Star,
}

impl From<Format> for ArchiveFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::V7 => ArchiveFormat::V7,
            Format::Ustar => ArchiveFormat::Ustar,
            Format::Posix => ArchiveFormat::Posix,
            Format::Gnu => ArchiveFormat::Gnu,
            Format::Star => ArchiveFormat::Star,
        }
    }
}

/// tar - create, list and extract tape archives
#[derive(Parser, Debug)]
#[command(author, version, about = gettext("tar - create, list and extract tape archives"), long_about)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["create", "extract", "list", "append", "update", "test", "append_stdin"])
))]
struct Args {
    #[arg(short = 'c', long, help = gettext("Create a new archive"))]
    create: bool,

    #[arg(short = 'x', long, alias = "get", help = gettext("Extract members from an archive"))]
    extract: bool,

    #[arg(short = 't', long, help = gettext("List the contents of an archive"))]
    list: bool,

    #[arg(short = 'r', long, help = gettext("Append files to the end of an archive"))]
    append: bool,

    #[arg(short = 'u', long, help = gettext("Append only files newer than their copy in the archive"))]
    update: bool,

    #[arg(long, help = gettext("Read the whole archive and verify its members"))]
    test: bool,

    #[arg(long, value_name = "NAME", help = gettext("Append standard input to the archive as member NAME"))]
    append_stdin: Option<String>,

    #[arg(short = 'f', long = "file", default_value = "-", help = gettext("Use archive file ARCHIVE, or '-' for standard input/output"))]
    archive: String,

    #[arg(short = 'C', long, help = gettext("Change to directory DIR before creating or extracting"))]
    directory: Option<PathBuf>,

    #[arg(short = 'b', long, help = gettext("Use records of N blocks of 512 bytes"))]
    blocking_factor: Option<u32>,

    #[arg(short = 'H', long, value_enum, default_value_t = Format::Ustar, help = gettext("Archive format to write"))]
    format: Format,

    #[arg(short = 'z', long, help = gettext("Filter the archive through gzip"))]
    gzip: bool,

    #[arg(short, long, help = gettext("List processed members verbosely"))]
    verbose: bool,

    #[arg(short = 'O', long, help = gettext("Extract the named members to standard output"))]
    to_stdout: bool,

    #[arg(long, action = clap::ArgAction::Append, value_name = "PATTERN", help = gettext("Skip members matching PATTERN"))]
    exclude: Vec<String>,

    #[arg(long, help = gettext("Match patterns without regard to case"))]
    ignore_case: bool,

    #[arg(long, help = gettext("Replace existing files when extracting"))]
    overwrite: bool,

    #[arg(long, help = gettext("Replace existing files only when the member is newer"))]
    keep_newer_files: bool,

    #[arg(long, help = gettext("Keep extracting after a member fails"))]
    keep_going: bool,

    #[arg(short = 'P', long, help = gettext("Keep leading '/' on member names when extracting"))]
    absolute_names: bool,

    #[arg(long, help = gettext("Restore file ownership when extracting"))]
    same_owner: bool,

    #[arg(long, help = gettext("Use numeric user and group ids"))]
    numeric_owner: bool,

    #[arg(long, help = gettext("Apply the umask to extracted file modes"))]
    no_same_permissions: bool,

    #[arg(short = 'm', long, help = gettext("Do not restore modification times"))]
    touch: bool,

    #[arg(short = 'L', long, help = gettext("Follow symbolic links"))]
    dereference: bool,

    #[arg(long, help = gettext("Follow symbolic links named on the command line"))]
    dereference_args: bool,

    #[arg(long, help = gettext("Do not descend into directories"))]
    no_recursion: bool,

    #[arg(long, help = gettext("Refuse names and values that need extension records"))]
    standard_only: bool,

    #[arg(help = gettext("Files to archive, or member patterns to select"))]
    operands: Vec<String>,
}

/// Operation mode
#[derive(Debug, Clone, Copy)]
enum TarMode {
    Create,
    Extract,
    List,
    Append,
    Update,
    Test,
    AppendStdin,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    if let Err(e) = init_locale() {
        log::warn!("locale setup failed: {}", e);
    }

    let args = Args::parse();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("tar: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_locale() -> io::Result<()> {
    setlocale(LocaleCategory::LcAll, "");
    textdomain("posixutils-rs")?;
    bind_textdomain_codeset("posixutils-rs", "UTF-8")?;
    Ok(())
}

fn determine_mode(args: &Args) -> TarMode {
    if args.create {
        TarMode::Create
    } else if args.extract {
        TarMode::Extract
    } else if args.append {
        TarMode::Append
    } else if args.update {
        TarMode::Update
    } else if args.test {
        TarMode::Test
    } else if args.append_stdin.is_some() {
        TarMode::AppendStdin
    } else {
        TarMode::List
    }
}

fn run(args: &Args) -> TarResult<ExitCode> {
    let mode = determine_mode(args);
    let appending = matches!(
        mode,
        TarMode::Append | TarMode::Update | TarMode::AppendStdin
    );
    if args.gzip && appending {
        return Err(TarError::UnsupportedFormat(gettext(
            "cannot append to a compressed archive",
        )));
    }

    match mode {
        TarMode::Create => run_create(args),
        TarMode::Extract if args.to_stdout => run_to_stdout(args),
        TarMode::Extract => run_extract(args),
        TarMode::List => run_scan(args, false),
        TarMode::Test => run_scan(args, true),
        TarMode::Append => run_append(args, false),
        TarMode::Update => run_append(args, true),
        TarMode::AppendStdin => run_append_stdin(args),
    }
}

fn record_size(args: &Args) -> usize {
    args.blocking_factor
        .map(parse_blocksize)
        .unwrap_or(DEFAULT_RECORD_SIZE)
}

fn base_dir(args: &Args) -> PathBuf {
    args.directory.clone().unwrap_or_else(|| PathBuf::from("."))
}

fn exclude_mask(args: &Args) -> TarResult<Mask> {
    Mask::from_patterns(&args.exclude, !args.ignore_case)
}

fn list_options(args: &Args) -> TarResult<ListOptions> {
    Ok(ListOptions {
        record_size: record_size(args),
        include: Mask::from_patterns(&args.operands, !args.ignore_case)?,
        exclude: exclude_mask(args)?,
    })
}

fn create_options(args: &Args) -> TarResult<CreateOptions> {
    Ok(CreateOptions {
        format: args.format.into(),
        record_size: record_size(args),
        exclude: exclude_mask(args)?,
        cli_dereference: args.dereference_args,
        dereference: args.dereference,
        no_recurse: args.no_recursion,
        standard_only: args.standard_only,
        verbose: args.verbose,
    })
}

/// Open the archive for reading, decompressing if asked to
fn open_for_read(args: &Args) -> TarResult<Box<dyn ByteStream>> {
    if args.archive == "-" {
        if args.gzip {
            return Ok(Box::new(ReadPipe(auto_decompress(io::stdin())?)));
        }
        return Ok(Box::new(ReadPipe(io::stdin())));
    }

    let file = File::open(&args.archive)?;
    if args.gzip {
        Ok(Box::new(ReadPipe(auto_decompress(file)?)))
    } else {
        Ok(Box::new(file))
    }
}

/// Open an existing archive file for in-place appending
fn open_for_append(args: &Args) -> TarResult<File> {
    if args.archive == "-" {
        return Err(TarError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            gettext("cannot append to standard output"),
        )));
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&args.archive)?)
}

fn run_create(args: &Args) -> TarResult<ExitCode> {
    if args.operands.is_empty() {
        return Err(TarError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            gettext("refusing to create an empty archive"),
        )));
    }

    let options = create_options(args)?;
    let paths: Vec<PathBuf> = args.operands.iter().map(PathBuf::from).collect();
    let base = base_dir(args);

    let sink: Box<dyn Write> = if args.archive == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(&args.archive)?)
    };

    if args.gzip {
        let stream = WritePipe(GzipWriter::new(sink)?);
        let stream = modes::create_archive(stream, &paths, &base, &LocalFs, &options)?;
        let mut inner = stream.0.finish()?;
        inner.flush()?;
    } else {
        modes::create_archive(WritePipe(sink), &paths, &base, &LocalFs, &options)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn run_append(args: &Args, update: bool) -> TarResult<ExitCode> {
    let options = AppendOptions {
        create: create_options(args)?,
        update,
    };
    let paths: Vec<PathBuf> = args.operands.iter().map(PathBuf::from).collect();
    let file = open_for_append(args)?;
    let mut file = modes::append_to_archive(file, &paths, &base_dir(args), &LocalFs, &options)?;
    file.sync()?;
    Ok(ExitCode::SUCCESS)
}

fn run_append_stdin(args: &Args) -> TarResult<ExitCode> {
    let name = args.append_stdin.as_deref().unwrap_or_default();
    let mut data = Vec::new();
    io::stdin().lock().read_to_end(&mut data)?;

    let meta = StreamMeta {
        mtime: Timestamp::from_secs(chrono::Utc::now().timestamp()),
        ..Default::default()
    };
    let options = AppendOptions {
        create: create_options(args)?,
        update: false,
    };
    let file = open_for_append(args)?;
    let mut file = modes::append_stream(
        file,
        name,
        &mut &data[..],
        data.len() as u64,
        &meta,
        &options,
    )?;
    file.sync()?;
    Ok(ExitCode::SUCCESS)
}

fn run_extract(args: &Args) -> TarResult<ExitCode> {
    let options = ExtractOptions {
        record_size: record_size(args),
        include: Mask::from_patterns(&args.operands, !args.ignore_case)?,
        exclude: exclude_mask(args)?,
        overwrite: args.overwrite || args.keep_newer_files,
        update: args.keep_newer_files,
        allow_absolute: args.absolute_names,
        preserve_owner: args.same_owner,
        numeric_owner: args.numeric_owner,
        preserve_perms: !args.no_same_permissions,
        preserve_times: !args.touch,
        keep_going: args.keep_going,
        verbose: args.verbose,
    };

    let stream = open_for_read(args)?;
    let report = modes::extract_archive(stream, &base_dir(args), &LocalFs, &options)?;
    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "tar: {} {}",
            report.failures.len(),
            gettext("members could not be extracted")
        );
        Ok(ExitCode::FAILURE)
    }
}

fn run_to_stdout(args: &Args) -> TarResult<ExitCode> {
    if args.operands.is_empty() {
        return Err(TarError::BadName(String::new()));
    }
    if args.archive == "-" && args.operands.len() > 1 {
        return Err(TarError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            gettext("only one member can be streamed from standard input"),
        )));
    }

    let options = ListOptions {
        record_size: record_size(args),
        ..Default::default()
    };
    let mut stdout = io::stdout().lock();
    let mut code = ExitCode::SUCCESS;
    for name in &args.operands {
        match modes::extract_one(open_for_read(args)?, name, &options)? {
            Some(mut member) => {
                io::copy(&mut member, &mut stdout)?;
            }
            None => {
                eprintln!("tar: {}: {}", name, gettext("not found in archive"));
                code = ExitCode::FAILURE;
            }
        }
    }
    stdout.flush()?;
    Ok(code)
}

fn run_scan(args: &Args, test: bool) -> TarResult<ExitCode> {
    let options = list_options(args)?;
    let stream = open_for_read(args)?;
    let mut stdout = io::stdout().lock();
    let mut write_error = None;

    // Test mode only names the members that passed, and only with -v
    let show = !test || args.verbose;
    let long_form = args.verbose && !test;
    let summary = modes::scan_archive(stream, &options, test, &mut |entry| {
        if !show || write_error.is_some() {
            return;
        }
        if let Err(e) = writeln!(stdout, "{}", modes::format_entry(entry, long_form)) {
            write_error = Some(e);
        }
    })?;
    if let Some(e) = write_error {
        return Err(TarError::Write(e));
    }
    stdout.flush()?;

    if summary.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
