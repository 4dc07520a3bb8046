use clap::Subcommand;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the server (create database and admin token)
    Init {
        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },

    /// Create the default tenant and bring existing organizations under role mode
    Seed,
}

#[derive(Subcommand)]
pub enum UsageCommands {
    /// Process queued usage tasks once
    Drain,

    /// Rewrite unique-clone counters from the usage ledger
    Reconcile,

    /// Return tasks locked for too long to the queue
    Sweep {
        /// Lock age in seconds after which a task counts as stale
        #[arg(long)]
        older_than: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum SshCommands {
    /// Print the forced-command line for an offered key (AuthorizedKeysCommand)
    Keys {
        /// Login name the client authenticated as (%u)
        #[arg(short = 'u', long)]
        user: String,

        /// Key type (%t)
        #[arg(short = 't', long = "type")]
        key_type: String,

        /// Base64 key blob (%k)
        #[arg(short = 'k', long)]
        key: String,
    },

    /// Serve the git command in SSH_ORIGINAL_COMMAND for a key
    Serv {
        /// Key reference in the form key-<id>
        key: String,
    },
}
