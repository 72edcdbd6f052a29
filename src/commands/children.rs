use clap::Args;
use console::style;
use tabled::settings::Style as TableStyle;
use tabled::{Table, Tabled};

use crate::config::ResolverConfig;
use crate::pagination::{PaginationInfo, compute_pagination, events_from_response};
use crate::prelude::*;
use crate::search_client::{SearchClient, SearchSource};
use crate::tree::handler::{ChildrenResponse, ResolverSearchHandler};
use crate::tree::query_builder::node_and_children_query;

#[derive(Args, Debug)]
pub struct ChildrenArgs {
    /// The entity id of the origin process node
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

#[derive(Tabled)]
struct ChildRow {
    #[tabled(rename = "Entity ID")]
    entity_id: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Events")]
    events: usize,
}

fn build_children_table(response: &ChildrenResponse) -> String {
    let rows: Vec<ChildRow> = response
        .children
        .iter()
        .map(|child| ChildRow {
            entity_id: child.entity_id.clone(),
            parent: child.parent_entity_id.clone().unwrap_or_else(|| "-".into()),
            events: child.events.len(),
        })
        .collect();

    Table::new(&rows).with(TableStyle::modern()).to_string()
}

pub async fn run(args: ChildrenArgs, config: &ResolverConfig) -> Result<()> {
    let client = SearchClient::try_from(config)?;
    let pagination_info = PaginationInfo {
        page: args.page,
        page_size: args.page_size,
    };
    let bounds = compute_pagination(config, &pagination_info);
    let built = node_and_children_query(config, &[args.entity_id.clone()], &bounds)?;

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
    let response = handler.build_children_response(events, total).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    info!(
        "Origin {} with {} events",
        style(&response.origin.entity_id).bold(),
        response.origin.events.len(),
    );
    info!(
        "{} children (of {} total events, page {}, page size {})",
        response.children.len(),
        response.pagination.total,
        response.pagination.request_page_index,
        response.pagination.request_page_size,
    );
    if !response.children.is_empty() {
        info!("\n{}", build_children_table(&response));
    }

    Ok(())
}
