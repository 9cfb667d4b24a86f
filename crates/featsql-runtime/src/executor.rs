//! Store executor abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;

use featsql_core::query::ColumnType;
use featsql_proto::Value;

use crate::error::StoreError;

/// One SQL statement with the expected type of every result column.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub columns: Vec<ColumnType>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, columns: Vec<ColumnType>) -> Self {
        Self {
            sql: sql.into(),
            columns,
        }
    }
}

/// Ordered rows of one statement.
pub type RowStream = BoxStream<'static, Result<Vec<Value>, StoreError>>;

/// Runs SQL against the store.
///
/// Implementations must yield rows in the order the store sends them and
/// stop work on the statement once the returned stream is dropped.
/// Timeouts and retries are theirs to handle.
#[async_trait]
pub trait StoreExecutor: Send + Sync {
    async fn execute(&self, statement: Statement) -> Result<RowStream, StoreError>;
}

#[async_trait]
impl<T: StoreExecutor + ?Sized> StoreExecutor for std::sync::Arc<T> {
    async fn execute(&self, statement: Statement) -> Result<RowStream, StoreError> {
        (**self).execute(statement).await
    }
}
