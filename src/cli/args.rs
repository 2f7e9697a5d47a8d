//! Command-line argument parsing for the Windows Memory Parser tool
use clap::{Parser, Subcommand, ValueEnum};

use crate::core::layout::WindowsBuild;
use crate::core::profile::parse_u64;

#[derive(Parser)]
#[command(name = "winmemparser")]
#[command(about = "Windows Memory Forensics Tool", long_about = None)]
pub struct Cli {
    /// Path to a raw physical memory image
    #[arg(value_name = "MEMORY_DUMP")]
    pub memory_dump: std::path::PathBuf,

    /// Plugin to run
    #[command(subcommand)]
    pub plugin: Option<PluginCommand>,

    /// Run pslist and vadinfo
    #[arg(short, long)]
    pub all: bool,

    /// Windows build whose structure offsets to use
    #[arg(short, long, value_enum)]
    pub build: Option<BuildArg>,

    /// JSON analysis profile (offsets, System DTB, limits)
    #[arg(short, long, value_name = "FILE")]
    pub profile: Option<std::path::PathBuf>,

    /// Expected DirectoryTableBase of the System process
    #[arg(long, value_name = "HEX", value_parser = parse_u64)]
    pub system_dtb: Option<u64>,

    /// Walk five-level (LA57) page tables
    #[arg(long)]
    pub five_level: bool,

    /// Stop the process walk after this many records
    #[arg(long, value_name = "N")]
    pub max_processes: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormatArg,

    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<std::path::PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Enable verbose output (warnings, status messages)
    #[arg(short, long)]
    pub verbose: bool,

    /// List available plugins
    #[arg(short, long)]
    pub list_plugins: bool,
}

#[derive(Subcommand)]
pub enum PluginCommand {
    /// List processes
    Pslist {
        /// Filter by process name (regex)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show mapped ranges per process
    Vadinfo {
        /// Filter by process name (regex)
        #[arg(long)]
        name: Option<String>,

        /// Physical offset of one process record
        #[arg(long, value_name = "HEX", value_parser = parse_u64)]
        offset: Option<u64>,
    },

    /// Translate a virtual address
    Vtop {
        #[arg(long, value_name = "HEX", value_parser = parse_u64)]
        address: u64,

        /// Address space (default: the System process DTB)
        #[arg(long, value_name = "HEX", value_parser = parse_u64)]
        dtb: Option<u64>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormatArg {
    Text,
    Csv,
    Json,
    Jsonl,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BuildArg {
    #[value(name = "win10-1809")]
    Win10_1809,
    #[value(name = "win10-1903")]
    Win10_1903,
    #[value(name = "win10-2004")]
    Win10_2004,
    #[value(name = "win11-21h2")]
    Win11_21h2,
    #[value(name = "win11-22h2")]
    Win11_22h2,
    #[value(name = "win11-24h2")]
    Win11_24h2,
}

impl From<BuildArg> for WindowsBuild {
    fn from(arg: BuildArg) -> Self {
        match arg {
            BuildArg::Win10_1809 => WindowsBuild::Win10_1809,
            BuildArg::Win10_1903 => WindowsBuild::Win10_1903,
            BuildArg::Win10_2004 => WindowsBuild::Win10_2004,
            BuildArg::Win11_21h2 => WindowsBuild::Win11_21H2,
            BuildArg::Win11_22h2 => WindowsBuild::Win11_22H2,
            BuildArg::Win11_24h2 => WindowsBuild::Win11_24H2,
        }
    }
}
