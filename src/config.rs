//! Command-line parsing and config resolution.
//!
//! There is no TOML-file layer here: the crate's external interface
//! is CLI flags only, so the configuration concern is narrowed to CLI
//! parsing plus a handful of startup reads (request-payload file,
//! regex compile) that are fatal on failure.

use crate::matcher::Matcher;
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::emitter::OutputFormat;

/// Raw command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "bootymapper")]
#[command(about = "High-concurrency TCP banner grabber", long_about = None)]
pub struct CliArgs {
    /// Target TCP port
    #[arg(short, long)]
    pub port: u16,

    /// Ceiling on concurrent tasks
    #[arg(short, long, default_value_t = 10_000)]
    pub concurrent: usize,

    /// Connect timeout in whole seconds
    #[arg(short = 't', long = "connect-timeout", default_value_t = 5)]
    pub connect_timeout: u64,

    /// Read timeout in whole seconds
    #[arg(short = 'r', long = "read-timeout", default_value_t = 5)]
    pub read_timeout: u64,

    /// Per-task byte cap on the response buffer
    #[arg(short = 'm', long = "max-read-size", default_value_t = 1_048_576)]
    pub max_read_size: usize,

    /// File containing the raw send template
    #[arg(short = 'd', long = "request")]
    pub request: Option<PathBuf>,

    /// Enable search with this pattern
    #[arg(short = 's', long = "search-string")]
    pub search_string: Option<String>,

    /// Case-insensitive regex
    #[arg(short = 'i', default_value_t = false)]
    pub case_insensitive: bool,

    /// Extended regex syntax (accepted for parity; see DESIGN.md)
    #[arg(short = 'x', default_value_t = false)]
    pub extended: bool,

    /// Output format; `ip_only` selects the compact layout
    #[arg(short = 'f', long = "format", default_value = "default")]
    pub format: String,

    /// Log verbosity, 0 (quietest) through 5 (trace)
    #[arg(short = 'v', long = "verbosity", default_value_t = 2)]
    pub verbosity: u8,
}

/// Fully resolved, immutable configuration, shared by reference with
/// every task for the lifetime of the scan.
pub struct Config {
    pub port: u16,
    pub concurrent: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_read_size: usize,
    pub send_template: Option<Vec<u8>>,
    pub format: OutputFormat,
    pub verbosity: u8,
    pub matcher: Matcher,
}

impl Config {
    /// Resolves CLI args into a `Config`, reading the request-payload
    /// file and compiling the search regex if configured. Both are
    /// fatal-at-startup failures.
    pub fn resolve(args: CliArgs) -> Result<Self, ConfigError> {
        let send_template = match &args.request {
            Some(path) => Some(
                std::fs::read(path).map_err(|e| ConfigError::RequestFile(path.clone(), e))?,
            ),
            None => None,
        };

        let matcher = match &args.search_string {
            Some(pattern) => {
                Matcher::enabled(pattern, args.case_insensitive, args.extended)
                    .map_err(ConfigError::Pattern)?
            }
            None => Matcher::disabled(),
        };

        if args.verbosity > 5 {
            return Err(ConfigError::Usage(format!(
                "verbosity must be 0..=5, got {}",
                args.verbosity
            )));
        }

        Ok(Config {
            port: args.port,
            concurrent: args.concurrent,
            connect_timeout_secs: args.connect_timeout,
            read_timeout_secs: args.read_timeout,
            max_read_size: args.max_read_size,
            send_template,
            format: OutputFormat::from_flag(&args.format),
            verbosity: args.verbosity,
            matcher,
        })
    }

    /// Maps `-v` 0..=5 onto a `tracing_subscriber::EnvFilter` directive.
    pub fn log_filter_directive(&self) -> &'static str {
        match self.verbosity {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }
}

/// Fatal startup errors: exit 1, including a pattern compile failure.
#[derive(Debug)]
pub enum ConfigError {
    RequestFile(PathBuf, std::io::Error),
    Pattern(crate::matcher::PatternError),
    Usage(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::RequestFile(path, e) => {
                write!(f, "could not read request file '{}': {}", path.display(), e)
            }
            ConfigError::Pattern(e) => write!(f, "{e}"),
            ConfigError::Usage(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Expands up to four `%s` occurrences in `template` to the dotted-quad
/// form of `peer`, scanning left to right exactly as
/// `original_source/bootymapper.c`'s `evbuffer_add_printf(..., "%s",
/// "%s", "%s", "%s")` call does. Any other byte, including a lone `%`
/// not followed by `s`, or a fifth-and-later `%s`, is copied through
/// unchanged (the source treats other format specifiers as undefined
/// behavior, so the rewrite simply never treats them as substitution
/// points).
pub fn expand_template(template: &[u8], peer: Ipv4Addr) -> Vec<u8> {
    let dotted = peer.to_string();
    let dotted = dotted.as_bytes();
    let mut out = Vec::with_capacity(template.len());
    let mut substitutions = 0;
    let mut i = 0;
    while i < template.len() {
        if substitutions < 4
            && template[i] == b'%'
            && i + 1 < template.len()
            && template[i + 1] == b's'
        {
            out.extend_from_slice(dotted);
            substitutions += 1;
            i += 2;
        } else {
            out.push(template[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_template() -> CliArgs {
        CliArgs {
            port: 80,
            concurrent: 1,
            connect_timeout: 1,
            read_timeout: 1,
            max_read_size: 1,
            request: None,
            search_string: None,
            case_insensitive: false,
            extended: false,
            format: "default".into(),
            verbosity: 0,
        }
    }

    #[test]
    fn expands_up_to_four_placeholders() {
        let peer: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let out = expand_template(b"GET / HTTP/1.0\r\nHost: %s\r\n\r\n", peer);
        assert_eq!(out, b"GET / HTTP/1.0\r\nHost: 10.0.0.1\r\n\r\n".to_vec());
    }

    #[test]
    fn stops_substituting_after_four() {
        let peer: Ipv4Addr = "1.2.3.4".parse().unwrap();
        let out = expand_template(b"%s %s %s %s %s", peer);
        let expected = b"1.2.3.4 1.2.3.4 1.2.3.4 1.2.3.4 %s".to_vec();
        assert_eq!(out, expected);
    }

    #[test]
    fn passes_through_unrelated_bytes() {
        let peer: Ipv4Addr = "8.8.8.8".parse().unwrap();
        let out = expand_template(b"100%% done, peer=%s\n", peer);
        assert_eq!(out, b"100%% done, peer=8.8.8.8\n".to_vec());
    }

    #[test]
    fn log_filter_directive_maps_verbosity() {
        let mut args = args_template();
        args.verbosity = 0;
        assert_eq!(Config::resolve(args).unwrap().log_filter_directive(), "error");
        let mut args = args_template();
        args.verbosity = 5;
        assert_eq!(Config::resolve(args).unwrap().log_filter_directive(), "trace");
    }
}
