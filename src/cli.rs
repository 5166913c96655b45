use clap::{Parser, Subcommand};

/// Switchboard: routes AI functions to provider credentials with fallback
#[derive(Parser)]
#[command(name = "switchboard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the admin API server
    Serve {
        /// Port to bind (overrides SWITCHBOARD_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage provider credentials
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Manage function → service routing
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },

    /// Manage per-service rate limits
    RateLimit {
        #[command(subcommand)]
        command: RateLimitCommands,
    },

    /// Inspect the usage log
    Usage {
        #[command(subcommand)]
        command: UsageCommands,
    },

    /// Run a function once through its mapped services
    Dispatch {
        /// Function name, e.g. "AI Text Generation"
        function: String,
        /// JSON payload passed to the provider
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// Store (or replace) the API key for a service and category
    Add {
        #[arg(long)]
        service: String,
        /// text-generation, voice-generation, image-generation or research
        #[arg(long)]
        category: String,
        #[arg(long, env = "SWITCHBOARD_API_KEY")]
        key: String,
        #[arg(long)]
        base_url: Option<String>,
    },
    /// List credentials by category (fingerprints only)
    List,
    /// Make a credential the primary of its category
    Primary {
        id: String,
        #[arg(long)]
        category: String,
    },
    /// Enable a credential
    Enable { id: String },
    /// Disable a credential
    Disable { id: String },
    /// Delete a credential
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum MappingCommands {
    /// Create or replace the route for a function
    Set {
        #[arg(long)]
        function: String,
        #[arg(long)]
        preferred: String,
        #[arg(long)]
        fallback: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List all routes
    List,
    /// Delete a route by id
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum RateLimitCommands {
    /// Create or update the limit for a service
    Set {
        #[arg(long)]
        service: String,
        #[arg(long)]
        limit: i64,
        /// YYYY-MM-DD; defaults to one period from today
        #[arg(long)]
        reset_date: Option<String>,
    },
    /// List limits and current usage
    List,
    /// Zero a service's counter
    Reset { service: String },
}

#[derive(Subcommand)]
pub enum UsageCommands {
    /// Aggregated success/failure/latency per service and category
    Stats {
        /// Only the last N days
        #[arg(long)]
        days: Option<i64>,
    },
}
