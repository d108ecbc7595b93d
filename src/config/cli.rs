use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Pitlane binary.
#[derive(Debug, Parser)]
#[command(name = "pitlane", version, about = "Pitlane feed client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PITLANE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Show the signed-in identity and its own profile.
    Session,
    /// Show a profile.
    Profile(ProfileArg),
    /// List the followers of a profile.
    Followers(ProfileArg),
    /// List the profiles a profile follows.
    Following(ProfileArg),
    /// Follow or unfollow a profile.
    Follow(ProfileArg),
    /// Show a vehicle record.
    Vehicle(VehicleArg),
    /// Follow or unfollow a vehicle.
    #[command(name = "follow-vehicle")]
    FollowVehicle(VehicleArg),
    /// Decode a VIN.
    Vin(VinArg),
    /// List safety recalls for a VIN.
    Recalls(VinArg),
    /// Show a profile's lists, optionally with one item's membership.
    Lists(ListsArgs),
    /// Add an item to a list, or remove it.
    #[command(name = "list-toggle")]
    ListToggle(ListToggleArgs),
    /// Show the unread notification count.
    Notifications,
    /// Show the post feed.
    Feed(FeedArgs),
    /// Forget the stored session and every cached namespace.
    Logout,
}

#[derive(Debug, Args, Clone)]
pub struct ProfileArg {
    /// Profile UUID; defaults to the signed-in identity.
    #[arg(value_name = "UUID")]
    pub uuid: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct VehicleArg {
    #[arg(value_name = "VEHICLE_ID")]
    pub vehicle_id: String,
}

#[derive(Debug, Args, Clone)]
pub struct VinArg {
    #[arg(value_name = "VIN")]
    pub vin: String,
}

#[derive(Debug, Args, Clone)]
pub struct ListsArgs {
    /// Owner UUID; defaults to the signed-in identity.
    #[arg(long, value_name = "UUID")]
    pub owner: Option<String>,

    /// Report whether this item sits in each list.
    #[arg(long, value_name = "ITEM_ID")]
    pub item: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ListToggleArgs {
    #[arg(value_name = "LIST_ID")]
    pub list_id: String,

    #[arg(value_name = "ITEM_ID")]
    pub item_id: String,
}

#[derive(Debug, Args, Clone)]
pub struct FeedArgs {
    /// Number of pages to load.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub pages: u32,

    /// Re-fetch the first page even when it is cached.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub reload: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the session store (memory|file).
    #[arg(long = "cache-store", value_name = "KIND", global = true)]
    pub cache_store: Option<String>,

    /// Override the session directory used by the file store.
    #[arg(long = "cache-directory", value_name = "PATH", global = true)]
    pub cache_directory: Option<PathBuf>,

    /// Override every entity's refetch failure policy (demote|keep_stale).
    #[arg(long = "cache-refetch-failure", value_name = "POLICY", global = true)]
    pub cache_refetch_failure: Option<String>,

    /// Bearer token to sign in with; persisted with the session.
    #[arg(
        long = "token",
        env = "PITLANE_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        global = true
    )]
    pub token: Option<String>,

    /// Identity the token belongs to.
    #[arg(long = "identity", env = "PITLANE_IDENTITY", value_name = "UUID", global = true)]
    pub identity: Option<String>,
}
