//! Realtime row changes: filters, the raw change stream and typed subscriptions.

use crate::client::{Realtime, Result};
use postwall_common::model::{Id, ModelValidationError};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fmt::Display, marker::PhantomData};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Table {
    Posts,
    Comments,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeKind),
}

/// `column = value` restriction on the rows a subscription sees.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct RowFilter {
    pub column: &'static str,
    pub value: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ChangeFilter {
    pub table: Table,
    pub events: EventFilter,
    pub row: Option<RowFilter>,
}

/// A change as the backend pushes it, before decoding into a model type.
#[derive(Clone, PartialEq, Debug)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub record: Value,
    pub old_record: Value,
}

/// Live changes of one subscription. Dropping the stream releases the subscription.
#[derive(Debug)]
pub struct ChangeStream {
    changes: mpsc::UnboundedReceiver<RawChange>,
    _release: Option<DropGuard>,
}

/// A model type stored as rows of one table.
pub trait Row: Sized {
    type Marker;
    type Record: DeserializeOwned;

    const TABLE: Table;

    fn from_record(record: Self::Record) -> Result<Self, ModelValidationError>;
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum RowChange<T: Row> {
    Insert(T),
    Update(T),
    Delete(Id<T::Marker>),
}

/// Typed view over a [`ChangeStream`].
#[derive(Debug)]
pub struct Subscription<T> {
    stream: ChangeStream,
    row: PhantomData<fn() -> T>,
}

#[derive(Deserialize)]
struct OldRow {
    id: i64,
}

impl Table {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Table::Posts => "posts",
            Table::Comments => "comments",
        }
    }
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl EventFilter {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(kind) => kind.as_str(),
        }
    }

    #[must_use]
    pub fn matches(self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(only) => only == kind,
        }
    }
}

impl RowFilter {
    pub fn eq(column: &'static str, value: impl Display) -> Self {
        Self {
            column,
            value: value.to_string(),
        }
    }

    fn matches(&self, row: &Value) -> bool {
        match row.get(self.column) {
            Some(Value::String(value)) => *value == self.value,
            Some(Value::Number(value)) => value.to_string() == self.value,
            Some(Value::Bool(value)) => value.to_string() == self.value,
            _ => false,
        }
    }
}

impl ChangeFilter {
    #[must_use]
    pub fn new(table: Table, events: EventFilter, row: Option<RowFilter>) -> Self {
        Self { table, events, row }
    }

    /// The filter in the `column=eq.value` syntax of the realtime service.
    #[must_use]
    pub fn realtime_filter(&self) -> Option<String> {
        self.row
            .as_ref()
            .map(|row| format!("{}=eq.{}", row.column, row.value))
    }

    #[must_use]
    pub fn matches(&self, table: Table, change: &RawChange) -> bool {
        if table != self.table || !self.events.matches(change.kind) {
            return false;
        }

        self.row.as_ref().is_none_or(|row| {
            let subject = match change.kind {
                ChangeKind::Delete => &change.old_record,
                ChangeKind::Insert | ChangeKind::Update => &change.record,
            };
            row.matches(subject)
        })
    }
}

impl ChangeStream {
    #[must_use]
    pub fn new(changes: mpsc::UnboundedReceiver<RawChange>, release: Option<DropGuard>) -> Self {
        Self {
            changes,
            _release: release,
        }
    }

    /// Waits for the next change. `None` once the backend side has gone away.
    pub async fn next(&mut self) -> Option<RawChange> {
        self.changes.recv().await
    }
}

impl<T: Row> Subscription<T> {
    pub async fn open<R>(realtime: &R, events: EventFilter, row: Option<RowFilter>) -> Result<Self>
    where
        R: Realtime + ?Sized,
    {
        let stream = realtime
            .subscribe(ChangeFilter::new(T::TABLE, events, row))
            .await?;

        Ok(Self {
            stream,
            row: PhantomData,
        })
    }

    pub async fn next(&mut self) -> Option<Result<RowChange<T>>> {
        let change = self.stream.next().await?;
        Some(decode(change))
    }
}

fn decode<T: Row>(change: RawChange) -> Result<RowChange<T>> {
    Ok(match change.kind {
        ChangeKind::Insert => RowChange::Insert(decode_record(change.record)?),
        ChangeKind::Update => RowChange::Update(decode_record(change.record)?),
        ChangeKind::Delete => {
            let old: OldRow = serde_json::from_value(change.old_record)?;
            RowChange::Delete(Id::new(old.id))
        }
    })
}

fn decode_record<T: Row>(record: Value) -> Result<T> {
    let record = serde_json::from_value(record)?;
    Ok(T::from_record(record)?)
}

#[cfg(test)]
mod tests {
    use crate::change::{ChangeFilter, ChangeKind, EventFilter, RawChange, RowFilter, Table};
    use serde_json::json;

    fn change(kind: ChangeKind, record: serde_json::Value) -> RawChange {
        RawChange {
            kind,
            old_record: record.clone(),
            record,
        }
    }

    #[test]
    fn filters_by_table_and_event() {
        let inserts = ChangeFilter::new(
            Table::Comments,
            EventFilter::Only(ChangeKind::Insert),
            None,
        );
        let row = json!({ "id": 1, "post_id": 7 });

        assert!(inserts.matches(Table::Comments, &change(ChangeKind::Insert, row.clone())));
        assert!(!inserts.matches(Table::Comments, &change(ChangeKind::Update, row.clone())));
        assert!(!inserts.matches(Table::Posts, &change(ChangeKind::Insert, row)));
    }

    #[test]
    fn filters_by_row_value() {
        let filter = ChangeFilter::new(
            Table::Comments,
            EventFilter::All,
            Some(RowFilter::eq("post_id", 7)),
        );

        assert_eq!(filter.realtime_filter().as_deref(), Some("post_id=eq.7"));
        assert!(filter.matches(
            Table::Comments,
            &change(ChangeKind::Insert, json!({ "id": 1, "post_id": 7 }))
        ));
        assert!(!filter.matches(
            Table::Comments,
            &change(ChangeKind::Insert, json!({ "id": 1, "post_id": 8 }))
        ));
        assert!(!filter.matches(
            Table::Comments,
            &change(ChangeKind::Insert, json!({ "id": 1 }))
        ));
    }
}
