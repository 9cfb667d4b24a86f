//! Async k-way merge of value query row streams.

use futures::stream::BoxStream;
use futures::StreamExt;

use featsql_core::decode::{smallest_head, RowOrdering};
use featsql_proto::SqlRow;

use crate::error::Result;

/// Split rows of one value query.
pub type SqlRowStream = BoxStream<'static, Result<SqlRow>>;

/// Merges ordered row streams into one, holding at most one pending row per
/// source. Ties go to the source listed first.
pub struct MergedStream {
    ordering: RowOrdering,
    sources: Vec<SqlRowStream>,
    heads: Vec<Option<SqlRow>>,
    exhausted: Vec<bool>,
}

impl MergedStream {
    pub fn new(ordering: RowOrdering, sources: Vec<SqlRowStream>) -> Self {
        let count = sources.len();
        Self {
            ordering,
            sources,
            heads: vec![None; count],
            exhausted: vec![false; count],
        }
    }

    /// Next row in merge order, or the first source error.
    pub async fn next_row(&mut self) -> Option<Result<SqlRow>> {
        for i in 0..self.sources.len() {
            if self.heads[i].is_some() || self.exhausted[i] {
                continue;
            }
            match self.sources[i].next().await {
                Some(Ok(row)) => self.heads[i] = Some(row),
                Some(Err(e)) => return Some(Err(e)),
                None => self.exhausted[i] = true,
            }
        }
        let index = smallest_head(&self.ordering, &self.heads)?;
        self.heads[index].take().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, StoreError};
    use featsql_core::config::{FeatureTypeConfig, PropertyConfig, PropertyType, ProviderConfig};
    use featsql_core::query::compile_feature_type;
    use featsql_proto::{QueryRequest, TablePath, Value};
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn row(path: &TablePath, keys: &[i64]) -> Result<SqlRow> {
        Ok(SqlRow::new(
            path.clone(),
            keys.iter().map(|k| Value::Integer(*k)).collect(),
            Vec::new(),
        ))
    }

    #[tokio::test]
    async fn test_merge_streams() {
        let feature_type = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::value("name", PropertyType::String, "name"))
            .with_property(PropertyConfig::value(
                "tags",
                PropertyType::ValueArray,
                "[id=a_id]t/tag",
            ));
        let queries = compile_feature_type(&ProviderConfig::default(), &feature_type).unwrap();
        let root = queries.value_templates()[0].table_path.clone();
        let tags = queries.value_templates()[1].table_path.clone();

        let sources: Vec<SqlRowStream> = vec![
            stream::iter(vec![row(&root, &[1]), row(&root, &[2]), row(&root, &[3])]).boxed(),
            stream::iter(vec![row(&tags, &[1, 7]), row(&tags, &[3, 8])]).boxed(),
        ];
        let mut merged =
            MergedStream::new(RowOrdering::new(&queries, &QueryRequest::new()), sources);
        let mut keys = Vec::new();
        while let Some(row) = merged.next_row().await {
            keys.push(row.unwrap().keys);
        }
        let int = |v: i64| Value::Integer(v);
        assert_eq!(
            keys,
            vec![
                vec![int(1)],
                vec![int(1), int(7)],
                vec![int(2)],
                vec![int(3)],
                vec![int(3), int(8)],
            ]
        );
    }

    #[tokio::test]
    async fn test_source_error_is_returned() {
        let feature_type = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::value("name", PropertyType::String, "name"));
        let queries = compile_feature_type(&ProviderConfig::default(), &feature_type).unwrap();
        let root = queries.value_templates()[0].table_path.clone();
        let failing: Vec<Result<SqlRow>> = vec![
            row(&root, &[1]),
            Err(StoreError::Connection("reset".into()).into()),
        ];
        let mut merged = MergedStream::new(
            RowOrdering::new(&queries, &QueryRequest::new()),
            vec![stream::iter(failing).boxed()],
        );
        assert!(merged.next_row().await.unwrap().is_ok());
        assert!(matches!(
            merged.next_row().await,
            Some(Err(Error::Store(StoreError::Connection(_))))
        ));
    }
}
