use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use custody_core::model::{Role, Severity};
use uuid::Uuid;

/// Operator surface for the evidence custody pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "custody",
    about = "Encrypt, upload and register incident evidence",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check key, staging area, case records and object store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print a fresh base64 encryption key to stdout.
    Keygen,
    /// Manage actors.
    #[command(subcommand)]
    Actor(ActorCommand),
    /// Manage incidents.
    #[command(subcommand)]
    Incident(IncidentCommand),
    /// Submit and retrieve evidence.
    #[command(subcommand)]
    Evidence(EvidenceCommand),
    /// Inspect the audit trail.
    #[command(subcommand)]
    Audit(AuditCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ActorCommand {
    Add {
        username: String,
        #[arg(long, value_enum, default_value_t = RoleArg::General)]
        role: RoleArg,
    },
    List,
    /// Remove an actor along with incidents they reported and evidence they uploaded.
    Remove { username: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum IncidentCommand {
    Open {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, value_enum)]
        severity: SeverityArg,
        /// Username of the reporting actor.
        #[arg(long = "as")]
        actor: String,
    },
    List,
    Classify {
        id: Uuid,
        #[arg(long, value_enum)]
        severity: SeverityArg,
        #[arg(long = "as")]
        actor: String,
    },
    Status {
        id: Uuid,
        status: String,
        #[arg(long = "as")]
        actor: String,
    },
    /// Remove an incident and its evidence records.
    Remove { id: Uuid },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum EvidenceCommand {
    Submit {
        incident: Uuid,
        path: PathBuf,
        #[arg(long = "as")]
        actor: String,
        /// Type tag stored with the record; defaults to the file extension.
        #[arg(long = "type")]
        kind: Option<String>,
        /// Name recorded for the upload; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },
    List { incident: Uuid },
    Fetch {
        id: Uuid,
        #[arg(long, short)]
        output: PathBuf,
        #[arg(long = "as")]
        actor: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AuditCommand {
    List {
        /// Only show entries recorded by this username.
        #[arg(long)]
        actor: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleArg {
    Oversight,
    Analyst,
    General,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Oversight => Role::Oversight,
            RoleArg::Analyst => Role::Analyst,
            RoleArg::General => Role::General,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityArg {
    High,
    Medium,
    Low,
}

impl From<SeverityArg> for Severity {
    fn from(value: SeverityArg) -> Self {
        match value {
            SeverityArg::High => Severity::High,
            SeverityArg::Medium => Severity::Medium,
            SeverityArg::Low => Severity::Low,
        }
    }
}
