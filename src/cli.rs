//! Command Line Interface (CLI) arguments.

use clap::Parser;

/// Cyclestat command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "CYCLESTAT_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "CYCLESTAT_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "CYCLESTAT_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/cyclestat/certs/cert.pem",
        env = "CYCLESTAT_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/cyclestat/certs/key.pem",
        env = "CYCLESTAT_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "CYCLESTAT_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "CYCLESTAT_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Whether to use Rayon for filtering and aggregation.
    #[arg(long, default_value_t = false, env = "CYCLESTAT_USE_RAYON")]
    pub use_rayon: bool,
    /// Number of threads in the Rayon thread pool. Defaults to one less than the number of CPUs.
    #[arg(long, env = "CYCLESTAT_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Directory containing the cycle record sources
    #[arg(long, default_value = "CicloDetalhado", env = "CYCLESTAT_DATA_PATH")]
    pub data_path: String,
    /// File extension of the cycle record sources
    #[arg(long, default_value = "jsonl", env = "CYCLESTAT_SOURCE_EXTENSION")]
    pub source_extension: String,
    /// Optional JSON file describing the dataset columns. The built-in cycle schema is used if
    /// not set.
    #[arg(long, env = "CYCLESTAT_SCHEMA_FILE")]
    pub schema_file: Option<String>,
    /// Cell values treated as missing, in addition to blank cells
    #[arg(
        long,
        default_value = "-",
        value_delimiter = ',',
        allow_hyphen_values = true,
        env = "CYCLESTAT_NULL_MARKERS"
    )]
    pub null_markers: Vec<String>,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
