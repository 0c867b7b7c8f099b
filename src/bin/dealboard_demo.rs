//! Dealboard demo
//!
//! Drives the pipeline board against an in-memory backend and logs what
//! every view sees: a successful drag, a rejected drag out of an absorbing
//! stage, a drag the server refuses, and an out-of-band edit picked up by
//! invalidation.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: log filter (default: `dealboard=info`)
//! - `DEALBOARD_LATENCY_MS`: simulated backend latency (default: `150`)
//! - `DEALBOARD_{DEALS,PROPERTIES,SALES_COMPS,INTEREST_RATES}_STALE_SECS`,
//!   `DEALBOARD_{...}_REFETCH_SECS`, `DEALBOARD_GC_SECS`: cache policy

use std::sync::Arc;
use std::time::Duration;

use dealboard::prelude::*;
use dealboard::telemetry;

const DEFAULT_LATENCY_MS: u64 = 150;

fn latency_from_env() -> Duration {
    let millis = std::env::var("DEALBOARD_LATENCY_MS")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_LATENCY_MS);
    Duration::from_millis(millis)
}

fn raw(id: &str, name: &str, value: i64, stage: &str) -> RawDeal {
    RawDeal {
        id: id.into(),
        name: name.into(),
        value: Some(value),
        stage: stage.into(),
        property_type: Some("multifamily".into()),
        market: Some("Austin".into()),
    }
}

fn log_board(label: &str, view: &PipelineView) {
    for group in view.groups() {
        let names: Vec<&str> = group.deals.iter().map(|deal| deal.name.as_str()).collect();
        tracing::info!(
            board = label,
            stage = %group.stage,
            count = group.count,
            total_value = group.total_value,
            deals = ?names,
            "column"
        );
    }
}

async fn drag(
    queries: &DealQueries,
    commands: &DealCommands,
    notifier: Arc<dyn Notifier>,
    id: &str,
    target: Stage,
) -> Result<DragOutcome, QueryError> {
    let view = queries.pipeline().await?;
    let mut controller = DragController::new(&view, notifier);
    controller.press(&DealId::new(id));
    controller.hover(&DropTarget::Column(target));
    Ok(controller.drop_on(&DropTarget::Column(target), commands).await)
}

#[tokio::main]
async fn main() -> Result<(), QueryError> {
    telemetry::init();

    let api = InMemoryDealsApi::with_deals([
        raw("D1", "Harbor Point", 5_000_000, "underwriting"),
        raw("D2", "Elm Street Lofts", 1_200_000, "lead"),
        raw("D3", "Old Mill", 400_000, "closed_lost"),
        raw("D4", "Riverside Commons", 8_750_000, "loi_submitted"),
    ])
    .with_latency(latency_from_env());

    let config = CacheConfig::from_env();
    let client = QueryClient::new(QueryCache::new());
    let _gc = client.spawn_gc(Duration::from_secs(60));
    let remote: Arc<dyn DealsApi> = Arc::new(api.clone());
    let (notifier, mut toasts) = ChannelNotifier::channel();
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);

    let queries = DealQueries::new(client.clone(), Arc::clone(&remote), &config);
    let commands = DealCommands::new(OptimisticEngine::new(client.clone()), remote, Arc::clone(&notifier));

    let toast_task = tokio::spawn(async move {
        while let Some(toast) = toasts.recv().await {
            tracing::warn!(severity = ?toast.severity, "toast: {toast}");
        }
    });

    let mut board = queries.watch_pipeline();
    let initial = queries.pipeline().await?;
    log_board("initial", &initial);

    let outcome = drag(&queries, &commands, Arc::clone(&notifier), "D1", Stage::UnderContract).await?;
    tracing::info!(?outcome, "dragged Harbor Point to Under Contract");

    let outcome = drag(&queries, &commands, Arc::clone(&notifier), "D3", Stage::InitialReview).await?;
    tracing::info!(?outcome, "tried to revive a dead deal");

    api.fail_next_update(TransportError::status(409, "deal was edited by someone else"));
    let outcome = drag(&queries, &commands, Arc::clone(&notifier), "D2", Stage::ActiveReview).await?;
    tracing::info!(?outcome, "server refused the move; board restored");

    // Another analyst closes a deal from a different tool.
    api.upsert(raw("D4", "Riverside Commons", 8_750_000, "closed_won"));
    let marked = client.invalidate(&DealKeys::all());
    tracing::info!(marked, "invalidated deals after out-of-band edit");
    if let Ok(Some(kind)) = tokio::time::timeout(Duration::from_millis(50), board.changed()).await {
        tracing::debug!(?kind, "board observer woke");
    }

    let refreshed = board.refetch().await?;
    log_board("final", &refreshed);
    let stats = queries.stats().await?;
    tracing::info!(
        total = stats.total_deals,
        active = stats.active_deals,
        active_value = stats.active_value,
        closed = stats.count(Stage::Closed),
        "headline stats"
    );
    tracing::info!(
        list = api.list_calls(),
        detail = api.get_calls(),
        update = api.update_calls(),
        "backend calls"
    );

    toast_task.abort();
    Ok(())
}
