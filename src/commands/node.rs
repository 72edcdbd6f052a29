use clap::Args;
use console::style;

use crate::config::ResolverConfig;
use crate::pagination::{PaginationInfo, compute_pagination, events_from_response};
use crate::prelude::*;
use crate::search_client::{SearchClient, SearchSource};
use crate::tree::handler::ResolverSearchHandler;
use crate::tree::query_builder::node_query;

use super::helpers::build_event_table;

#[derive(Args, Debug)]
pub struct NodeArgs {
    /// The entity id of the process node to retrieve
    pub entity_id: String,

    /// The page of events to retrieve
    #[arg(long)]
    pub page: Option<u64>,

    /// The number of events per page
    #[arg(long)]
    pub page_size: Option<u64>,

    /// Print the raw JSON response instead of a table
    #[arg(long, default_value = "false")]
    pub json: bool,
}

pub async fn run(args: NodeArgs, config: &ResolverConfig) -> Result<()> {
    let client = SearchClient::try_from(config)?;
    let pagination_info = PaginationInfo {
        page: args.page,
        page_size: args.page_size,
    };
    let bounds = compute_pagination(config, &pagination_info);
    let built = node_query(config, &[args.entity_id.clone()], &bounds)?;

    let response = client
        .search(&built.request.index, &built.request.body)
        .await?;
    let (events, total) = events_from_response(response)?;

    let handler = ResolverSearchHandler::new(
        &client,
        config,
        &pagination_info,
        built.count,
        args.entity_id.clone(),
    );
    let response = handler.build_node_response(events, total).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    info!("Process node {}", style(&response.node.entity_id).bold());
    match &response.node.parent_entity_id {
        Some(parent) => info!("Parent: {parent}"),
        None => info!("Parent: none (root process)"),
    }
    info!(
        "Showing {} of {} events (page {}, page size {})",
        response.node.events.len(),
        response.pagination.total,
        response.pagination.request_page_index,
        response.pagination.request_page_size,
    );
    if !response.node.events.is_empty() {
        info!("\n{}", build_event_table(&response.node.events));
    }

    Ok(())
}
