use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipindex")]
#[command(version)]
#[command(about = "Random-access ZIP reader for local files and HTTP URLs", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipindex data1.zip -x joe        extract all files except joe from data1.zip\n  \
  zipindex -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  zipindex -t app.jar              verify the CRC of every entry\n  \
  zipindex -l https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive files (read every entry and check its CRC)
    #[arg(short = 't')]
    pub test: bool,

    /// Display archive comment
    #[arg(short = 'z')]
    pub comment: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Charset of entry names without the UTF-8 flag (e.g. cp437, shift_jis)
    #[arg(long, value_name = "LABEL", default_value = "utf-8")]
    pub charset: String,

    /// Refuse archives with absolute or `..` entry names
    #[arg(long)]
    pub validate_paths: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_patterns() {
        let cli = Cli::try_parse_from([
            "zipindex",
            "-qq",
            "--charset",
            "cp437",
            "--validate-paths",
            "a.zip",
            "*.txt",
            "-x",
            "secret*",
        ])
        .unwrap();
        assert_eq!(cli.file, "a.zip");
        assert_eq!(cli.files, vec!["*.txt"]);
        assert_eq!(cli.exclude, vec!["secret*"]);
        assert_eq!(cli.charset, "cp437");
        assert!(cli.validate_paths);
        assert!(cli.is_very_quiet());
        assert!(!cli.is_http_url());
    }

    #[test]
    fn pipe_implies_quiet() {
        let cli = Cli::try_parse_from(["zipindex", "-p", "https://host/a.zip"]).unwrap();
        assert!(cli.is_quiet());
        assert!(cli.is_http_url());
        assert_eq!(cli.charset, "utf-8");
    }
}
