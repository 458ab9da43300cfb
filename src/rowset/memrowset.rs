use std::{fmt, ops::Bound, sync::Arc};

use crossbeam_skiplist::{map::Entry, SkipMap};

use super::{CompactionLock, RowSet};
use crate::{
    compaction::{CompactionError, CompactionInput, MemRowSetCompactionInput},
    id::RowSetId,
    mutation::{MutationChain, RowChange},
    mvcc::{MvccSnapshot, Timestamp},
    option::TabletOption,
    row::{Row, RowKey},
    schema::{SchemaError, SchemaRef},
};

/// A row stored in a [`MemRowSet`]: the inserted values plus every mutation
/// applied since.
#[derive(Debug)]
pub struct MemRow {
    row: Row,
    inserted_at: Timestamp,
    mutations: MutationChain,
}

impl MemRow {
    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn inserted_at(&self) -> Timestamp {
        self.inserted_at
    }

    pub fn mutations(&self) -> &MutationChain {
        &self.mutations
    }
}

/// Mutable, memory-resident row set.
///
/// Rows live in a lock-free skip list ordered by primary key, so inserts and
/// mutation appends from writers can run concurrently with compaction scans.
pub struct MemRowSet {
    id: RowSetId,
    schema: SchemaRef,
    data: SkipMap<RowKey, Arc<MemRow>>,
    compaction_lock: CompactionLock,
}

impl MemRowSet {
    pub fn new(id: RowSetId, schema: SchemaRef) -> Self {
        Self {
            id,
            schema,
            data: SkipMap::new(),
            compaction_lock: CompactionLock::new(),
        }
    }

    /// Insert `row` committed at `ts`.
    ///
    /// Returns `Ok(false)` without modifying anything if a row with the same
    /// key already exists.
    pub fn insert(&self, row: Row, ts: Timestamp) -> Result<bool, SchemaError> {
        self.schema.validate_row(&row)?;
        let key = self.schema.key_of(&row);
        let candidate = Arc::new(MemRow {
            row,
            inserted_at: ts,
            mutations: MutationChain::new(),
        });
        let entry = self.data.get_or_insert(key, Arc::clone(&candidate));
        Ok(Arc::ptr_eq(entry.value(), &candidate))
    }

    pub fn get(&self, key: &RowKey) -> Option<Arc<MemRow>> {
        self.data.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Entries with keys strictly greater than `after`, in key order.
    pub(crate) fn entries_after<'a>(
        &'a self,
        after: Option<&'a RowKey>,
    ) -> impl Iterator<Item = Entry<'a, RowKey, Arc<MemRow>>> + 'a {
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        self.data
            .range::<RowKey, (Bound<&RowKey>, Bound<&RowKey>)>((lower, Bound::Unbounded))
    }
}

impl RowSet for MemRowSet {
    fn id(&self) -> RowSetId {
        self.id
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn new_compaction_input(
        self: Arc<Self>,
        snap: &MvccSnapshot,
        option: &TabletOption,
    ) -> Result<Box<dyn CompactionInput>, CompactionError> {
        Ok(Box::new(MemRowSetCompactionInput::new(
            self,
            snap.clone(),
            option.block_size(),
        )))
    }

    fn mutate_row(
        &self,
        key: &RowKey,
        ts: Timestamp,
        change: RowChange,
    ) -> Result<bool, CompactionError> {
        let Some(entry) = self.data.get(key) else {
            return Ok(false);
        };
        let row = entry.value();
        if row.mutations.is_deleted() {
            return Ok(false);
        }
        change
            .validate(&self.schema)
            .map_err(|err| CompactionError::corruption("invalid mutation", err))?;
        row.mutations.append(ts, change);
        Ok(true)
    }

    fn check_row_present(&self, key: &RowKey) -> bool {
        self.data
            .get(key)
            .map(|entry| !entry.value().mutations.is_deleted())
            .unwrap_or(false)
    }

    fn count_rows(&self) -> u64 {
        self.data.len() as u64
    }

    fn estimate_on_disk_size(&self) -> u64 {
        0
    }

    fn compaction_lock(&self) -> &CompactionLock {
        &self.compaction_lock
    }
}

impl fmt::Display for MemRowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemRowSet({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use arrow::datatypes::{DataType, Field};

    use super::*;
    use crate::{mutation::ColumnUpdate, row::Value, schema::Schema};

    fn schema() -> SchemaRef {
        Arc::new(
            Schema::try_new(
                vec![
                    Field::new("id", DataType::Int64, false),
                    Field::new("val", DataType::Int64, true),
                ],
                1,
            )
            .unwrap(),
        )
    }

    fn row(id: i64, val: i64) -> Row {
        Row::new(vec![Value::Int64(id), Value::Int64(val)])
    }

    #[test]
    fn insert_rejects_duplicate_keys() {
        let mrs = MemRowSet::new(RowSetId::nil(), schema());
        assert!(mrs.insert(row(1, 1), Timestamp::new(1)).unwrap());
        assert!(!mrs.insert(row(1, 2), Timestamp::new(2)).unwrap());
        assert_eq!(mrs.len(), 1);
        let stored = mrs.get(&RowKey::from(Value::Int64(1))).unwrap();
        assert_eq!(stored.row(), &row(1, 1));
    }

    #[test]
    fn insert_validates_schema() {
        let mrs = MemRowSet::new(RowSetId::nil(), schema());
        assert!(mrs
            .insert(Row::new(vec![Value::from("x")]), Timestamp::new(1))
            .is_err());
    }

    #[test]
    fn mutate_row_appends_until_deleted() {
        let mrs = MemRowSet::new(RowSetId::nil(), schema());
        mrs.insert(row(1, 1), Timestamp::new(1)).unwrap();
        let key = RowKey::from(Value::Int64(1));
        let missing = RowKey::from(Value::Int64(2));

        assert!(!mrs
            .mutate_row(&missing, Timestamp::new(2), RowChange::Delete)
            .unwrap());
        assert!(mrs
            .mutate_row(
                &key,
                Timestamp::new(2),
                RowChange::Update(vec![ColumnUpdate::new(1, 5_i64)])
            )
            .unwrap());
        assert!(mrs
            .mutate_row(&key, Timestamp::new(3), RowChange::Delete)
            .unwrap());
        assert!(!mrs
            .mutate_row(&key, Timestamp::new(4), RowChange::Delete)
            .unwrap());
        assert!(!mrs.check_row_present(&key));
        assert_eq!(mrs.get(&key).unwrap().mutations().iter().count(), 2);
    }

    #[test]
    fn concurrent_inserts_keep_key_order() {
        let mrs = Arc::new(MemRowSet::new(RowSetId::nil(), schema()));
        let handles = (0..4_i64)
            .map(|writer| {
                let mrs = Arc::clone(&mrs);
                thread::spawn(move || {
                    for i in 0..50_i64 {
                        let id = i * 4 + writer;
                        mrs.insert(row(id, id), Timestamp::new(id as u64 + 1))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        let keys = mrs
            .entries_after(None)
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        assert_eq!(keys.len(), 200);
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
