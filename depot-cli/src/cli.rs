use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use depot_core::{BackendType, TransferStatus};

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Works, their parent links and proxy deposit transfers"
)]
pub struct Cli {
    /// Repository name from the registry, or a path to a store file
    #[clap(long, short = 'r', global = true)]
    pub repo: Option<String>,

    /// Storage backend; inferred from the file extension when omitted
    #[clap(long, value_enum, global = true)]
    pub backend: Option<BackendArg>,

    /// User key of the acting user (falls back to DEPOT_USER)
    #[clap(long = "as", global = true)]
    pub acting_user: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum BackendArg {
    Yaml,
    Sqlite,
}

impl From<BackendArg> for BackendType {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Yaml => BackendType::Yaml,
            BackendArg::Sqlite => BackendType::Sqlite,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StatusArg {
    Pending,
    Accepted,
    Rejected,
    Canceled,
}

impl From<StatusArg> for TransferStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => TransferStatus::Pending,
            StatusArg::Accepted => TransferStatus::Accepted,
            StatusArg::Rejected => TransferStatus::Rejected,
            StatusArg::Canceled => TransferStatus::Canceled,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ExportFormat {
    Json,
    Markdown,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage users
    #[clap(subcommand)]
    User(UserCommand),

    /// Create, edit and link works
    #[clap(subcommand)]
    Work(WorkCommand),

    /// Offer works to other users and answer offers
    #[clap(subcommand)]
    Transfer(TransferCommand),

    /// Repository registry and storage maintenance
    #[clap(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Add a user
    Add {
        /// Unique user key, usually an email address
        key: String,

        /// Display name
        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        email: Option<String>,
    },

    /// List users
    List,
}

#[derive(Subcommand, Debug)]
pub enum WorkCommand {
    /// Create a work
    Add {
        /// Title of the work
        title: Option<String>,

        /// Parent work to link into (repeatable)
        #[clap(long = "parent")]
        parents: Vec<String>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// Change a work's title, editors or parents
    Edit {
        /// ID or unique ID prefix of the work
        id: String,

        #[clap(long)]
        title: Option<String>,

        /// Replace the edit users (repeatable)
        #[clap(long = "editor")]
        editors: Vec<String>,

        /// Set the complete parent list (repeatable)
        #[clap(long = "parent")]
        parents: Vec<String>,

        /// Detach the work from every parent
        #[clap(long, conflicts_with = "parents")]
        no_parents: bool,
    },

    /// Show a work with its parents and members
    Show {
        /// ID or unique ID prefix of the work
        id: String,
    },

    /// List works
    List,

    /// Delete a work
    Del {
        /// ID or unique ID prefix of the work
        id: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum TransferCommand {
    /// Offer a work to another user
    Request {
        /// ID or unique ID prefix of the work
        work: String,

        /// User key of the receiver
        #[clap(long)]
        to: String,

        #[clap(long)]
        comment: Option<String>,
    },

    /// Accept a transfer addressed to you
    Accept {
        /// ID or unique ID prefix of the transfer request
        id: String,
    },

    /// Reject a transfer addressed to you
    Reject {
        /// ID or unique ID prefix of the transfer request
        id: String,

        #[clap(long)]
        comment: Option<String>,
    },

    /// Cancel a transfer you sent
    Cancel {
        /// ID or unique ID prefix of the transfer request
        id: String,
    },

    /// List transfer requests
    List {
        /// Only requests sent by the acting user
        #[clap(long, conflicts_with = "received")]
        sent: bool,

        /// Only requests addressed to the acting user
        #[clap(long)]
        received: bool,

        #[clap(long, value_enum)]
        status: Option<StatusArg>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Print the path of the store in use, or of a registered repository
    Path {
        /// The name of the repository to look up
        #[clap(long)]
        name: Option<String>,
    },

    /// Register a repository in the registry
    Register {
        #[clap(long)]
        name: Option<String>,

        /// Path to the store file
        #[clap(long)]
        path: Option<PathBuf>,

        #[clap(long)]
        description: Option<String>,

        /// Set this repository as the default
        #[clap(long)]
        default: bool,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// Copy the store into another backend (YAML to SQLite or back)
    Migrate {
        /// Target file; its extension picks the backend
        output: PathBuf,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Write the store as JSON or a Markdown report
    Export {
        #[clap(long, value_enum, default_value = "json")]
        format: ExportFormat,

        #[clap(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Replace the store's contents with a JSON export
    Import {
        input: PathBuf,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Show record counts
    Stats,
}
