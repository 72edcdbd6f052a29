use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};

use crate::commands::{alerts, children, node, tree};
use crate::config::ResolverConfig;
use crate::local_logger::init_local_logger;
use crate::prelude::*;

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Cyan.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Retrieve process ancestry trees from the events index", styles = create_styles())]
pub struct Cli {
    /// The URL of the search backend
    #[arg(long, env = "RESOLVER_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// The configuration name to use
    /// If provided, the configuration will be loaded from ~/.config/resolver/{config-name}.yaml
    /// Otherwise, loads from ~/.config/resolver/config.yaml
    #[arg(long, env = "RESOLVER_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a document id and display its process tree
    Tree(tree::TreeArgs),
    /// Display one process node's events
    Node(node::NodeArgs),
    /// Display a process node and its children
    Children(children::ChildrenArgs),
    /// Display alerts related to a process node
    Alerts(alerts::AlertsArgs),
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_local_logger()?;
    let config = ResolverConfig::load_with_override(
        cli.config_name.as_deref(),
        cli.backend_url.as_deref(),
    )?;

    match cli.command {
        Commands::Tree(args) => tree::run(args, &config).await?,
        Commands::Node(args) => node::run(args, &config).await?,
        Commands::Children(args) => children::run(args, &config).await?,
        Commands::Alerts(args) => alerts::run(args, &config).await?,
    }
    Ok(())
}
