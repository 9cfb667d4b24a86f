//! Feature provider: the per-request pipeline.
//!
//! A request acquires a slot from the [`ConcurrencyBudget`], runs the meta
//! query (and the optional `numberMatched` count), then runs every value
//! query of the feature type at once, merges their rows in sort order and
//! decodes them. Events are forwarded one complete feature at a time.

use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use featsql_core::decode::{FeatureDecoder, RowOrdering};
use featsql_core::query::{
    ColumnType, CompiledQueries, KeyRange, MetaResult, TemplateRegistry, META_COLUMNS,
};
use featsql_proto::{Expr, FeatureEvent, QueryRequest, SqlRow, Value, ValueType};

use crate::budget::{ConcurrencyBudget, RequestPermit};
use crate::error::{Error, Result};
use crate::executor::{Statement, StoreExecutor};
use crate::merge::{MergedStream, SqlRowStream};

/// Decoded events of one page.
pub type FeatureStream = BoxStream<'static, Result<FeatureEvent>>;

/// Completed features buffered between the decoding task and the consumer.
const CHANNEL_SIZE: usize = 16;

/// Serves pages of features from compiled templates and a store.
pub struct FeatureProvider<E> {
    registry: Arc<TemplateRegistry>,
    executor: Arc<E>,
    budget: ConcurrencyBudget,
}

impl<E: StoreExecutor + 'static> FeatureProvider<E> {
    /// Create a provider whose budget is sized for the registered feature
    /// types.
    pub fn new(registry: Arc<TemplateRegistry>, executor: E) -> Result<Self> {
        let budget = ConcurrencyBudget::new(registry.config(), registry.max_value_queries())?;
        info!(
            feature_types = registry.len(),
            capacity = budget.capacity(),
            queue_size = budget.queue_size(),
            "feature provider ready"
        );
        Ok(Self {
            registry,
            executor: Arc::new(executor),
            budget,
        })
    }

    /// Replace the derived budget.
    pub fn with_budget(mut self, budget: ConcurrencyBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn budget(&self) -> &ConcurrencyBudget {
        &self.budget
    }

    /// Counts and key window of a page without reading any feature.
    pub async fn meta(&self, feature_type: &str, request: &QueryRequest) -> Result<MetaResult> {
        let queries = self.registry.require(feature_type)?;
        let _permit = self.budget.acquire().await?;
        run_meta(self.executor.as_ref(), &queries, request).await
    }

    /// Stream one page of features.
    ///
    /// The stream starts with [`FeatureEvent::Start`] and ends with
    /// [`FeatureEvent::End`]. Dropping it cancels the outstanding queries
    /// and releases the request's slot.
    pub async fn query(&self, feature_type: &str, request: QueryRequest) -> Result<FeatureStream> {
        let queries = self.registry.require(feature_type)?;
        let permit = self.budget.acquire().await?;
        let meta = run_meta(self.executor.as_ref(), &queries, &request).await?;
        debug!(
            feature_type,
            number_returned = meta.counts.number_returned,
            number_matched = meta.counts.number_matched,
            "meta query done"
        );

        let start = FeatureEvent::Start(meta.counts);
        if meta.counts.number_returned == 0 {
            return Ok(stream::iter(vec![Ok(start), Ok(FeatureEvent::End)]).boxed());
        }

        let window = meta.window.as_ref();
        let sources = open_sources(self.executor.as_ref(), &queries, &request, window).await?;
        let (tx, rx) = mpsc::channel::<Result<Vec<FeatureEvent>>>(CHANNEL_SIZE);
        let ordering = RowOrdering::new(&queries, &request);
        tokio::spawn(decode_task(queries, ordering, sources, tx, permit));

        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|batch| (batch, rx))
        })
        .flat_map(|batch| match batch {
            Ok(events) => stream::iter(events.into_iter().map(Ok).collect::<Vec<_>>()),
            Err(e) => stream::iter(vec![Err(e)]),
        });
        Ok(stream::iter(vec![Ok(start)]).chain(events).boxed())
    }

    /// Bounding box of a geometry property over the matching features.
    pub async fn spatial_extent(
        &self,
        feature_type: &str,
        property: &str,
        filter: Option<&Expr>,
    ) -> Result<Value> {
        let queries = self.registry.require(feature_type)?;
        let _permit = self.budget.acquire().await?;
        let sql = queries.render_spatial_extent(property, filter)?;
        let row = single_row(
            self.executor.as_ref(),
            Statement::new(sql, vec![ColumnType::Value(ValueType::String)]),
        )
        .await?;
        Ok(row.into_iter().next().unwrap_or(Value::Null))
    }

    /// Earliest start and latest end of one or two temporal properties.
    pub async fn temporal_extent(
        &self,
        feature_type: &str,
        start: &str,
        end: Option<&str>,
        filter: Option<&Expr>,
    ) -> Result<(Value, Value)> {
        let queries = self.registry.require(feature_type)?;
        let _permit = self.budget.acquire().await?;
        let sql = queries.render_temporal_extent(start, end, filter)?;
        let column = ColumnType::Value(ValueType::Datetime);
        let row = single_row(self.executor.as_ref(), Statement::new(sql, vec![column; 2])).await?;
        let mut values = row.into_iter();
        Ok((
            values.next().unwrap_or(Value::Null),
            values.next().unwrap_or(Value::Null),
        ))
    }
}

/// First row of a statement.
async fn single_row<E: StoreExecutor + ?Sized>(
    executor: &E,
    statement: Statement,
) -> Result<Vec<Value>> {
    let sql = statement.sql.clone();
    let mut rows = executor.execute(statement).await?;
    match rows.next().await {
        Some(row) => Ok(row?),
        None => Err(Error::MalformedMetaRow(format!("no row returned by: {}", sql))),
    }
}

/// Run the meta query. A failing `numberMatched` count is reported as -1.
async fn run_meta<E: StoreExecutor + ?Sized>(
    executor: &E,
    queries: &CompiledQueries,
    request: &QueryRequest,
) -> Result<MetaResult> {
    let meta = Statement::new(
        queries.render_meta_with(request, false)?,
        META_COLUMNS.to_vec(),
    );
    if !queries.computes_number_matched() {
        return Ok(MetaResult::from_row(&single_row(executor, meta).await?)?);
    }

    let matched = Statement::new(
        queries.render_number_matched(request)?,
        vec![ColumnType::Count],
    );
    let (meta_row, matched_row) =
        tokio::join!(single_row(executor, meta), single_row(executor, matched));
    let mut result = MetaResult::from_row(&meta_row?)?;
    result.counts.number_matched = match matched_row {
        Ok(row) => row.first().and_then(Value::as_i64).unwrap_or(-1),
        Err(e) => {
            warn!(
                feature_type = queries.feature_type(),
                error = %e,
                "numberMatched count failed, reporting -1"
            );
            -1
        }
    };
    Ok(result)
}

/// Start every value query and split its rows.
async fn open_sources<E: StoreExecutor + ?Sized>(
    executor: &E,
    queries: &CompiledQueries,
    request: &QueryRequest,
    window: Option<&KeyRange>,
) -> Result<Vec<SqlRowStream>> {
    let sort_count = request.sort_keys.len();
    let sqls = queries.render_values(request, window)?;
    let executions = queries
        .value_templates()
        .iter()
        .zip(sqls)
        .map(|(template, sql)| {
            executor.execute(Statement::new(sql, template.column_types(sort_count)))
        });
    let streams = futures::future::try_join_all(executions).await?;

    Ok(queries
        .value_templates()
        .iter()
        .cloned()
        .zip(streams)
        .map(|(template, rows)| {
            rows.map(move |row| -> Result<SqlRow> { Ok(template.split_row(row?, sort_count)?) })
                .boxed()
        })
        .collect())
}

/// Merge and decode the rows of one page, sending one batch per completed
/// feature. Stops at the first error or once the receiver is gone.
async fn decode_task(
    queries: Arc<CompiledQueries>,
    ordering: RowOrdering,
    sources: Vec<SqlRowStream>,
    tx: mpsc::Sender<Result<Vec<FeatureEvent>>>,
    _permit: RequestPermit,
) {
    let mut merged = MergedStream::new(ordering, sources);
    let mut decoder = FeatureDecoder::new(queries.layout());
    let mut pending = Vec::new();

    loop {
        let row = tokio::select! {
            _ = tx.closed() => {
                debug!(feature_type = queries.feature_type(), "request cancelled");
                return;
            }
            row = merged.next_row() => row,
        };
        let Some(row) = row else { break };
        let decoded = row.and_then(|row| Ok(decoder.on_row(&row, &mut pending)?));
        if let Err(e) = decoded {
            error!(feature_type = queries.feature_type(), error = %e, "decoding aborted");
            let _ = tx.send(Err(e)).await;
            return;
        }
        let complete = pending
            .iter()
            .rposition(|e| matches!(e, FeatureEvent::FeatureEnd));
        if let Some(last) = complete {
            let rest = pending.split_off(last + 1);
            let batch = std::mem::replace(&mut pending, rest);
            if tx.send(Ok(batch)).await.is_err() {
                return;
            }
        }
    }

    decoder.finish(&mut pending);
    pending.push(FeatureEvent::End);
    let _ = tx.send(Ok(pending)).await;
}
