use clap::Args;
use console::style;
use serde::Serialize;
use tabled::settings::Style as TableStyle;
use tabled::{Table, Tabled};

use crate::config::ResolverConfig;
use crate::events::ResolverEvent;
use crate::events::normalize::parse_legacy_entity_id;
use crate::pagination::{ExtractedHit, PaginationInfo, compute_pagination, reconcile_total};
use crate::prelude::*;
use crate::queries::{QueryKind, ResolverQuery};
use crate::search_client::{SearchClient, SearchSource};

use super::helpers::field_display;

#[derive(Args, Debug)]
pub struct AlertsArgs {
    /// The entity id of the process to find related alerts for
    pub entity_id: String,

    /// The page of alerts to retrieve
    #[arg(long)]
    pub page: Option<u64>,

    /// The number of alerts per page
    #[arg(long)]
    pub page_size: Option<u64>,

    /// Print the raw JSON response instead of a table
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Serialize)]
struct AlertsResponse {
    alerts: Vec<ResolverEvent>,
    total: u64,
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Event ID")]
    event_id: String,
    #[tabled(rename = "Category")]
    category: String,
}

fn build_alert_table(hits: &[ExtractedHit]) -> String {
    let rows: Vec<AlertRow> = hits
        .iter()
        .map(|hit| AlertRow {
            event_id: hit.event_id.clone(),
            category: field_display(&hit.event, "event.category"),
        })
        .collect();

    Table::new(&rows).with(TableStyle::modern()).to_string()
}

pub async fn run(args: AlertsArgs, config: &ResolverConfig) -> Result<()> {
    let client = SearchClient::try_from(config)?;
    let pagination_info = PaginationInfo {
        page: args.page,
        page_size: args.page_size,
    };
    let bounds = compute_pagination(config, &pagination_info);

    // A legacy composite id carries the endpoint scope the legacy query form
    // needs; a current id is queried as-is.
    let (endpoint_id, ids) = match parse_legacy_entity_id(&args.entity_id) {
        Some(legacy) => (Some(legacy.endpoint_id), vec![legacy.unique_pid.to_string()]),
        None => (None, vec![args.entity_id.clone()]),
    };

    let query = ResolverQuery::new(QueryKind::RelatedAlerts, config, endpoint_id, Some(bounds));
    let results = query.search(&client, &ids).await?;

    let count_request = query.count(&ids);
    let total = reconcile_total(results.totals, || {
        client.count(&count_request.index, &count_request.body)
    })
    .await?;

    if args.json {
        let response = AlertsResponse {
            alerts: results.results.iter().map(|hit| hit.event.clone()).collect(),
            total,
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    info!(
        "{} alerts related to {} ({} shown)",
        total,
        style(&args.entity_id).bold(),
        results.results.len(),
    );
    if !results.results.is_empty() {
        info!("\n{}", build_alert_table(&results.results));
    }

    Ok(())
}
