//! Streaming decoding of value query rows into feature events.
//!
//! Value queries of one page are merged into a single ordered row stream
//! ([`MergedRows`]), which the [`FeatureDecoder`] turns into
//! `FeatureStart`/`ObjectStart`/`Value`/... events using the per-table
//! [`DecoderLayout`] and the running [`MultiplicityTracker`].

pub mod decoder;
pub mod geometry;
pub mod layout;
pub mod merge;
pub mod multiplicity;

use std::collections::VecDeque;

use featsql_proto::{FeatureEvent, QueryRequest, SqlRow};
use tracing::error;

pub use decoder::FeatureDecoder;
pub use geometry::{GeometryDecoder, WktPassthrough};
pub use layout::{ColumnLayout, DecoderLayout, ScopeKind, ScopeTemplate, TableLayout};
pub use merge::{smallest_head, MergedRows, RowOrdering};
pub use multiplicity::MultiplicityTracker;

use crate::error::DecodeError;
use crate::query::CompiledQueries;

/// Decode the row streams of one page, one stream per value template and
/// in template order.
pub fn decode<'a, I>(
    queries: &'a CompiledQueries,
    request: &QueryRequest,
    streams: Vec<I>,
) -> DecodeIter<'a, I>
where
    I: Iterator<Item = SqlRow>,
{
    let ordering = RowOrdering::new(queries, request);
    DecodeIter {
        rows: MergedRows::new(ordering, streams),
        decoder: FeatureDecoder::new(queries.layout()),
        pending: VecDeque::new(),
        done: false,
    }
}

/// Iterator over the events of a merged row stream.
///
/// Stops after the first error.
pub struct DecodeIter<'a, I> {
    rows: MergedRows<I>,
    decoder: FeatureDecoder<'a>,
    pending: VecDeque<FeatureEvent>,
    done: bool,
}

impl<'a, I: Iterator<Item = SqlRow>> Iterator for DecodeIter<'a, I> {
    type Item = Result<FeatureEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            let mut out = Vec::new();
            match self.rows.next() {
                Some(row) => {
                    if let Err(e) = self.decoder.on_row(&row, &mut out) {
                        error!(table = %row.table_path, error = %e, "row decoding failed");
                        self.done = true;
                        self.pending.clear();
                        return Some(Err(e));
                    }
                }
                None => {
                    self.decoder.finish(&mut out);
                    self.done = true;
                }
            }
            self.pending.extend(out);
        }
    }
}
