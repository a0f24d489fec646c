//! Command-line front end: list, test and extract archives read through the
//! random-access index, from local files or HTTP URLs.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use zipindex::{
    Cli, HttpRangeSource, OpenOptions, PathTraversalValidator, ZipEntry, ZipExtractor, ZipFile,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = open_options(&cli)?;

    if cli.is_http_url() {
        // Remote archive via HTTP Range requests
        let source = Arc::new(HttpRangeSource::new(cli.file.clone())?);
        let zip = ZipFile::from_source(source.clone(), cli.file.clone(), &options)?;
        let outcome = process_zip(&zip, &cli);
        zip.close()?;
        outcome?;

        if !cli.is_quiet() {
            eprintln!(
                "\nTotal bytes transferred: {}",
                format_size(source.transferred_bytes())
            );
        }
    } else {
        let zip = ZipFile::open(Path::new(&cli.file), &options)
            .with_context(|| format!("cannot open {}", cli.file))?;
        let outcome = process_zip(&zip, &cli);
        zip.close()?;
        outcome?;
    }

    Ok(())
}

fn open_options(cli: &Cli) -> Result<OpenOptions> {
    let Some(charset) = encoding_rs::Encoding::for_label(cli.charset.as_bytes()) else {
        bail!("unknown charset: {}", cli.charset);
    };
    let mut options = OpenOptions::new().charset(charset);
    if cli.validate_paths {
        options = options.validator(PathTraversalValidator);
    }
    Ok(options)
}

/// Dispatch on the mode flags: comment, list, test, or extract.
fn process_zip(zip: &ZipFile, cli: &Cli) -> Result<()> {
    let extractor = ZipExtractor::new(zip);

    if cli.comment {
        if let Some(comment) = zip.comment()? {
            println!("{comment}");
        }
        if !(cli.list || cli.verbose || cli.test) {
            return Ok(());
        }
    }

    if cli.list || cli.verbose {
        return list_files(&extractor, cli.verbose);
    }

    let entries = extractor.list_files()?;
    let selected: Vec<&ZipEntry> = entries.iter().filter(|e| is_selected(e, cli)).collect();

    if cli.test {
        return test_files(&extractor, &selected, cli);
    }

    let multiple_files = cli.pipe && selected.len() > 1;
    for entry in selected {
        extract_file(&extractor, entry, cli, multiple_files)?;
    }

    Ok(())
}

/// Whether `entry` passes the positional file filters and the `-x` exclusions.
fn is_selected(entry: &ZipEntry, cli: &Cli) -> bool {
    if entry.is_directory() {
        return false;
    }

    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, &entry.name)
            } else {
                // exact match on the full path or the base name
                entry.name == *f || base_name(&entry.name) == *f
            }
        });
        if !matches {
            return false;
        }
    }

    !cli
        .exclude
        .iter()
        .any(|x| entry.name.contains(x) || glob_match(x, &entry.name))
}

fn list_files(extractor: &ZipExtractor<'_>, verbose: bool) -> Result<()> {
    let entries = extractor.list_files()?;

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  {:>8}  Name",
            "Length", "Size", "Cmpr", "Date", "Time", "CRC-32"
        );
        println!("{}", "-".repeat(80));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        if !verbose {
            println!("{}", entry.name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {:08x}  {}",
            entry.size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.size),
            year,
            month,
            day,
            hour,
            minute,
            entry.crc32,
            entry.name
        );

        if !entry.is_directory() {
            total_uncompressed += entry.size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(80));
        println!(
            "{:>10}  {:>10}  {}  {:>31}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }

    Ok(())
}

/// Percentage saved by compression.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Read every selected entry and check its CRC, reporting like `unzip -t`.
fn test_files(extractor: &ZipExtractor<'_>, entries: &[&ZipEntry], cli: &Cli) -> Result<()> {
    let mut failures = 0usize;
    for entry in entries {
        match extractor.verify_entry(entry) {
            Ok(()) => {
                if !cli.is_quiet() {
                    println!("    testing: {:<40} OK", entry.name);
                }
            }
            Err(e) => {
                failures += 1;
                if !cli.is_very_quiet() {
                    println!("    testing: {:<40} {e}", entry.name);
                }
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} entries failed the test", entries.len());
    }
    if !cli.is_very_quiet() {
        println!("No errors detected in compressed data of {}.", cli.file);
    }
    Ok(())
}

fn extract_file(
    extractor: &ZipExtractor<'_>,
    entry: &ZipEntry,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    if cli.pipe {
        if show_filename {
            let mut stdout = std::io::stdout();
            stdout.write_all(format!("--- {} ---\n", entry.name).as_bytes())?;
        }
        extractor.extract_to_stdout(entry)?;
        return Ok(());
    }

    let file_name = if cli.junk_paths {
        base_name(&entry.name)
    } else {
        entry.name.clone()
    };
    let output_path = match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(&file_name),
        None => PathBuf::from(&file_name),
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.name);
            }
            return Ok(());
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.name);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.name);
    }
    extractor
        .extract_to_file(entry, &output_path)
        .with_context(|| format!("failed to extract {}", entry.name))?;

    Ok(())
}

fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching with `*` (any run of characters) and `?` (one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern, &text)
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} bytes")
    }
}
