use std::collections::HashSet;

use clap::Args;
use console::style;
use tabled::settings::Style as TableStyle;
use tabled::{Table, Tabled};
use tokio::sync::mpsc::unbounded_channel;

use crate::config::ResolverConfig;
use crate::events::ResolverEvent;
use crate::pagination::{PaginationBounds, events_from_response};
use crate::prelude::*;
use crate::search_client::{SearchClient, SearchSource};
use crate::tree::dal::SearchBackendDal;
use crate::tree::fetcher::{
    NewResolverTree, ResolverAction, ResolverTreeFetcher, TreeFetchParameters,
};
use crate::tree::node_data::{
    IdToNodeInfo, first_event, group_received_events, ids_not_in_base, set_error_nodes,
    set_requested_nodes, update_with_received_nodes,
};
use crate::tree::partition_entity_ids;
use crate::tree::query_builder::node_query_for_group;

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// The document id to resolve into a process tree
    pub document_id: String,

    /// Comma-separated list of indices to resolve the document against
    #[arg(long, value_delimiter = ',')]
    pub indices: Vec<String>,

    /// Print the raw JSON tree instead of a table
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Entity ID")]
    entity_id: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn build_tree_table(tree: &NewResolverTree, node_info: &IdToNodeInfo) -> String {
    let rows: Vec<NodeRow> = tree
        .nodes
        .iter()
        .map(|node| {
            // A node without a name in the tree may still have one in its
            // fetched activity events.
            let name = node.name.clone().or_else(|| {
                first_event(node_info.get(&node.id)).and_then(|event| {
                    event
                        .field("process.name")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_owned)
                })
            });

            NodeRow {
                entity_id: node.id.clone(),
                parent: node.parent.clone().unwrap_or_else(|| "-".into()),
                name: name.unwrap_or_else(|| "-".into()),
                status: match node_info.get(&node.id) {
                    Some(data) => data.status.to_string(),
                    None => "-".to_owned(),
                },
            }
        })
        .collect();

    Table::new(&rows).with(TableStyle::modern()).to_string()
}

/// Fetch one page of lifecycle events for the requested nodes, reporting
/// whether any batch came back full (meaning more data may have been crowded
/// out).
async fn fetch_node_events(
    client: &SearchClient,
    config: &ResolverConfig,
    requested: &HashSet<String>,
    page_size: u64,
) -> Result<(Vec<ResolverEvent>, bool)> {
    let ids: Vec<String> = requested.iter().cloned().collect();
    let bounds = PaginationBounds {
        from: 0,
        page: 0,
        page_size,
    };

    let mut events = Vec::new();
    let mut reached_limit = false;
    for group in partition_entity_ids(&ids) {
        let built = node_query_for_group(config, &group, &bounds);
        let response = client
            .search(&built.request.index, &built.request.body)
            .await?;
        let (mut group_events, _) = events_from_response(response)?;
        reached_limit = reached_limit || group_events.len() as u64 >= page_size;
        events.append(&mut group_events);
    }

    Ok((events, reached_limit))
}

pub async fn run(args: TreeArgs, config: &ResolverConfig) -> Result<()> {
    let client = SearchClient::try_from(config)?;
    let dal = SearchBackendDal::new(&client, config.clone());
    let (sender, mut receiver) = unbounded_channel();
    let fetcher = ResolverTreeFetcher::new(dal, sender);

    fetcher
        .fetch(TreeFetchParameters::new(
            args.document_id.clone(),
            args.indices.clone(),
        ))
        .await;
    // Close the channel so the receive loop below drains and ends.
    drop(fetcher);

    let mut tree = None;
    while let Some(action) = receiver.recv().await {
        match action {
            ResolverAction::AppRequestedResolverData { parameters } => {
                info!("Resolving {}...", parameters.database_document_id);
            }
            ResolverAction::ServerReturnedResolverData { result, parameters } => {
                info!(
                    "Received {} nodes (ancestor limit {}, descendant limit {})",
                    result.nodes.len(),
                    parameters.requested_ancestors.unwrap_or_default(),
                    parameters.requested_descendants.unwrap_or_default(),
                );
                tree = Some(result);
            }
            ResolverAction::ServerFailedToReturnResolverData { parameters } => {
                bail!(
                    "Failed to retrieve the resolver tree for {}",
                    parameters.database_document_id
                );
            }
            ResolverAction::AppAbortedResolverDataRequest { parameters } => {
                warn!(
                    "The tree request for {} was aborted",
                    parameters.database_document_id
                );
            }
        }
    }

    let Some(tree) = tree else {
        bail!("The resolver tree request produced no data");
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    // Enrich the first page of nodes with their activity state.
    let page_size = config.result_list.default_page_size;
    let requested: HashSet<String> = tree
        .nodes
        .iter()
        .take(page_size as usize)
        .map(|node| node.id.clone())
        .collect();
    let mut node_info = set_requested_nodes(IdToNodeInfo::new(), &requested);

    match fetch_node_events(&client, config, &requested, page_size).await {
        Ok((events, reached_limit)) => {
            let received = group_received_events(events)?;
            node_info = update_with_received_nodes(node_info, received, &requested, reached_limit);
        }
        Err(err) => {
            warn!("Failed to fetch node activity: {err:#}");
            node_info = set_error_nodes(node_info, &requested);
        }
    }

    info!(
        "Process tree for {}",
        style(&tree.origin_id).bold(),
    );
    info!("\n{}", build_tree_table(&tree, &node_info));

    let crowded_out = ids_not_in_base(&node_info, &requested);
    if !crowded_out.is_empty() {
        info!(
            "{} nodes had their activity crowded out of the response; re-run to fetch it",
            crowded_out.len(),
        );
    }

    Ok(())
}
