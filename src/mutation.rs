//! Row mutations and the append-only chains that hold them.
//!
//! A chain is a singly linked list of [`Mutation`]s in commit order. Each
//! node's `next` link is published exactly once, so readers walking the chain
//! concurrently with writers observe a stable prefix: nodes are never
//! rewritten, reordered or removed.

use std::{fmt, sync::Arc};

use once_cell::sync::OnceCell;

use crate::{
    mvcc::Timestamp,
    row::{Row, Value},
    schema::{Schema, SchemaError},
};

/// New value for one non-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub column: usize,
    pub value: Value,
}

impl ColumnUpdate {
    pub fn new(column: usize, value: impl Into<Value>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

/// The change recorded by a single mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowChange {
    /// Overwrite the listed columns.
    Update(Vec<ColumnUpdate>),
    /// Logical delete of the whole row.
    Delete,
}

impl RowChange {
    pub fn is_delete(&self) -> bool {
        matches!(self, RowChange::Delete)
    }

    /// Check that every update targets an existing non-key column with a value
    /// of the right type.
    pub fn validate(&self, schema: &Schema) -> Result<(), SchemaError> {
        let RowChange::Update(updates) = self else {
            return Ok(());
        };
        for update in updates {
            if schema.is_key_column(update.column) {
                let name = schema
                    .column(update.column)
                    .map(|field| field.name().clone())
                    .unwrap_or_default();
                return Err(SchemaError::KeyColumnUpdate(name));
            }
            schema.validate_value(update.column, &update.value)?;
        }
        Ok(())
    }

    /// Apply this change to `row`. Returns `false` if the row is deleted.
    ///
    /// The change must have passed [`RowChange::validate`] against the row's
    /// schema.
    pub(crate) fn apply_to(&self, row: &mut Row) -> bool {
        match self {
            RowChange::Update(updates) => {
                for update in updates {
                    row.set(update.column, update.value.clone());
                }
                true
            }
            RowChange::Delete => false,
        }
    }

    /// Render as `SET name="x", age=3` or `DELETE`.
    pub fn to_string_with(&self, schema: &Schema) -> String {
        match self {
            RowChange::Delete => "DELETE".to_string(),
            RowChange::Update(updates) => {
                let columns = updates
                    .iter()
                    .map(|update| {
                        let name = schema
                            .column(update.column)
                            .map(|field| field.name().as_str())
                            .unwrap_or("?");
                        format!("{}={}", name, update.value)
                    })
                    .collect::<Vec<_>>();
                format!("SET {}", columns.join(", "))
            }
        }
    }
}

/// One committed change to a base row.
pub struct Mutation {
    ts: Timestamp,
    change: RowChange,
    next: OnceCell<Arc<Mutation>>,
}

impl Mutation {
    pub fn new(ts: Timestamp, change: RowChange) -> Self {
        Self {
            ts,
            change,
            next: OnceCell::new(),
        }
    }

    /// Commit timestamp of the transaction that produced this mutation.
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    pub fn change(&self) -> &RowChange {
        &self.change
    }

    pub fn next(&self) -> Option<&Arc<Mutation>> {
        self.next.get()
    }

    /// Walk the chain starting at this node.
    pub fn iter(&self) -> MutationIter<'_> {
        MutationIter {
            current: Some(self),
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("ts", &self.ts)
            .field("change", &self.change)
            .finish()
    }
}

/// Iterator over a mutation chain in commit order.
pub struct MutationIter<'a> {
    current: Option<&'a Mutation>,
}

impl<'a> MutationIter<'a> {
    pub fn from_head(head: Option<&'a Arc<Mutation>>) -> Self {
        Self {
            current: head.map(|head| head.as_ref()),
        }
    }
}

impl<'a> Iterator for MutationIter<'a> {
    type Item = &'a Mutation;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = current.next().map(|next| next.as_ref());
        Some(current)
    }
}

/// Head of an append-only mutation chain attached to one base row.
#[derive(Default)]
pub struct MutationChain {
    head: OnceCell<Arc<Mutation>>,
}

impl MutationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<&Arc<Mutation>> {
        self.head.get()
    }

    pub fn iter(&self) -> MutationIter<'_> {
        MutationIter::from_head(self.head())
    }

    pub fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    /// Whether the most recently appended mutation deletes the row.
    pub fn is_deleted(&self) -> bool {
        self.iter()
            .last()
            .map(|mutation| mutation.change().is_delete())
            .unwrap_or(false)
    }

    /// Append a mutation at the tail of the chain.
    ///
    /// Lock-free: if another writer publishes a tail first, the append moves
    /// on to the new tail. Callers that need commit order to match append
    /// order must serialise their commits.
    pub fn append(&self, ts: Timestamp, change: RowChange) -> Arc<Mutation> {
        let mut node = Arc::new(Mutation::new(ts, change));
        let appended = Arc::clone(&node);
        let mut slot = &self.head;
        loop {
            match slot.set(node) {
                Ok(()) => return appended,
                Err(rejected) => {
                    node = rejected;
                    if let Some(occupied) = slot.get() {
                        slot = &occupied.next;
                    }
                }
            }
        }
    }
}

impl fmt::Debug for MutationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use arrow::datatypes::{DataType, Field};

    use super::*;

    fn schema() -> Schema {
        Schema::try_new(
            vec![
                Field::new("id", DataType::Int64, false),
                Field::new("val", DataType::Int64, true),
            ],
            1,
        )
        .unwrap()
    }

    #[test]
    fn append_preserves_order() {
        let chain = MutationChain::new();
        assert!(chain.is_empty());
        chain.append(
            Timestamp::new(1),
            RowChange::Update(vec![ColumnUpdate::new(1, 10_i64)]),
        );
        chain.append(Timestamp::new(2), RowChange::Delete);
        let ts = chain.iter().map(|m| m.ts().get()).collect::<Vec<_>>();
        assert_eq!(ts, vec![1, 2]);
        assert!(chain.is_deleted());
    }

    #[test]
    fn head_snapshot_sees_later_appends_as_a_stable_prefix() {
        let chain = MutationChain::new();
        chain.append(Timestamp::new(1), RowChange::Delete);
        let head = chain.head().cloned();
        chain.append(Timestamp::new(2), RowChange::Delete);
        assert_eq!(MutationIter::from_head(head.as_ref()).count(), 2);
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let chain = Arc::new(MutationChain::new());
        let handles = (0..4)
            .map(|writer| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || {
                    for i in 0..100 {
                        chain.append(Timestamp::new(writer * 1000 + i), RowChange::Delete);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(chain.iter().count(), 400);
    }

    #[test]
    fn validate_rejects_key_and_unknown_columns() {
        let schema = schema();
        assert!(RowChange::Update(vec![ColumnUpdate::new(1, 3_i64)])
            .validate(&schema)
            .is_ok());
        assert!(RowChange::Update(vec![ColumnUpdate::new(0, 3_i64)])
            .validate(&schema)
            .is_err());
        assert!(RowChange::Update(vec![ColumnUpdate::new(5, 3_i64)])
            .validate(&schema)
            .is_err());
        assert!(RowChange::Update(vec![ColumnUpdate::new(1, "x")])
            .validate(&schema)
            .is_err());
        assert!(RowChange::Delete.validate(&schema).is_ok());
    }

    #[test]
    fn renders_changes() {
        let schema = schema();
        let change = RowChange::Update(vec![ColumnUpdate::new(1, 3_i64)]);
        assert_eq!(change.to_string_with(&schema), "SET val=3");
        assert_eq!(RowChange::Delete.to_string_with(&schema), "DELETE");
    }
}
