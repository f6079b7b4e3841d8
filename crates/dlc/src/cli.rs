//! Command line interface definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use types::{AppId, BundleId, BundleStatus, GamespaceId, VersionId};

/// DLC bundle metadata and artifact manager
#[derive(Debug, Parser)]
#[command(name = "dlc", version)]
pub struct Cli {
    /// Configuration file; falls back to CONFIG_PATH, then config.yaml
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Bundles are always addressed within a gamespace and version
#[derive(Debug, Clone, Copy, Args)]
pub struct Scope {
    #[arg(long, short = 'g')]
    pub gamespace: GamespaceId,

    #[arg(long = "version-id")]
    pub version_id: VersionId,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the bundles schema if needed and check the database
    Migrate,

    /// Register a new bundle in CREATED status
    Create {
        #[command(flatten)]
        scope: Scope,
        name: String,
        /// JSON object of filter tags
        #[arg(long, default_value = "{}")]
        filters: String,
        /// JSON object of arbitrary metadata
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Artifact file name fragment; generated when omitted
        #[arg(long)]
        key: Option<String>,
    },

    /// Show a bundle by id
    Get {
        #[arg(long, short = 'g')]
        gamespace: GamespaceId,
        bundle_id: BundleId,
    },

    /// Show a bundle by name
    Find {
        #[command(flatten)]
        scope: Scope,
        name: String,
    },

    /// List bundles of a version, newest first
    List {
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        status: Option<BundleStatus>,
        /// JSON object of filter predicates
        #[arg(long)]
        filters: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Page size; 0 returns everything
        #[arg(long, default_value_t = 0)]
        limit: u64,
        /// Report the total number of matches
        #[arg(long)]
        count: bool,
    },

    /// Replace filters and payload
    Properties {
        #[arg(long, short = 'g')]
        gamespace: GamespaceId,
        bundle_id: BundleId,
        #[arg(long, default_value = "{}")]
        filters: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Set the lifecycle status
    Status {
        #[arg(long, short = 'g')]
        gamespace: GamespaceId,
        bundle_id: BundleId,
        status: BundleStatus,
    },

    /// Set the delivery url together with a status
    Url {
        #[arg(long, short = 'g')]
        gamespace: GamespaceId,
        bundle_id: BundleId,
        url: String,
        #[arg(long, default_value = "DELIVERING")]
        status: BundleStatus,
    },

    /// Stream a local file into the bundle artifact
    Upload {
        #[arg(long, short = 'g')]
        gamespace: GamespaceId,
        #[arg(long)]
        app_id: AppId,
        bundle_id: BundleId,
        file: PathBuf,
    },

    /// Delete the artifact and the bundle record
    Delete {
        #[arg(long, short = 'g')]
        gamespace: GamespaceId,
        #[arg(long)]
        app_id: AppId,
        bundle_id: BundleId,
    },

    /// Write a configuration file with default values
    ExampleConfig {
        #[arg(default_value = "config.example.yaml")]
        path: PathBuf,
    },
}
