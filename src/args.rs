use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Convert sales reports into Concar accounting entries and manage the
/// product/account dictionaries behind the conversion.
#[derive(Parser, Debug)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in to the conversion service and store the session locally
    Login {
        /// Service base URL, e.g. http://localhost:8000/api/v1
        #[clap(long)]
        server: Option<String>,
    },

    /// Create a new operator account on the service
    Register,

    /// Forget the stored session
    Logout,

    /// Show who the stored session belongs to
    Whoami,

    /// Convert a sales report, filling in missing mappings until it converges
    Process {
        /// Path to the Excel sales report (.xls / .xlsx)
        file: PathBuf,

        /// Period month, two digits 01-12
        #[clap(long)]
        month: Option<String>,

        /// Starting ledger book number
        #[clap(long)]
        ledger_book: Option<u32>,

        /// Starting voucher number (1-9999)
        #[clap(long)]
        voucher: Option<u32>,

        /// Where to write the generated workbook
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Download the generated workbook of an earlier run
    Download {
        run_id: i64,

        /// Where to write the workbook
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Manage product -> account mappings
    #[clap(subcommand)]
    Mappings(MappingsCommand),

    /// Manage combo jump rules
    #[clap(subcommand)]
    Combos(CombosCommand),

    /// Inspect past conversion runs
    #[clap(subcommand)]
    History(HistoryCommand),
}

#[derive(Debug, Subcommand)]
pub enum MappingsCommand {
    /// List mappings (active ones by default)
    List {
        /// Include deactivated mappings
        #[clap(long)]
        all: bool,
    },

    /// Map a product code to an account code
    Add {
        product: Option<String>,
        account: Option<String>,
    },

    /// Change an existing mapping
    Update {
        id: i64,

        #[clap(long)]
        product: Option<String>,

        #[clap(long)]
        account: Option<String>,

        #[clap(long)]
        active: Option<bool>,
    },

    /// Deactivate a mapping
    Remove { id: i64 },

    /// Upload a spreadsheet of product/account pairs
    Import { file: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum CombosCommand {
    /// List combo jump rules (active ones by default)
    List {
        /// Include deactivated rules
        #[clap(long)]
        all: bool,
    },

    /// Add a combo jump rule
    Add {
        combo: Option<String>,
        jump: Option<i64>,
    },

    /// Change an existing rule
    Update {
        id: i64,

        #[clap(long)]
        combo: Option<String>,

        #[clap(long)]
        jump: Option<i64>,

        #[clap(long)]
        active: Option<bool>,
    },

    /// Deactivate a rule
    Remove { id: i64 },

    /// Upload a spreadsheet of combo/jump pairs
    Import { file: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// List past conversion runs, most recent first
    List {
        #[clap(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show one run in full
    Show { id: i64 },

    /// Delete a run from the history
    Delete { id: i64 },
}

pub fn parse() -> Args {
    Args::parse()
}
