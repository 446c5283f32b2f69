use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;

use parking_lot::RwLock;
use tracing::debug;
use trellis_refs::ObjectCodec;
use trellis_store::SlotStore;
use trellis_types::{ActivationPurpose, ObjectId};

use crate::error::{CommitError, CommitResult};
use crate::listener::{CommitContext, CommitListener, CommitObserver, Committed, VetoReason};
use crate::set::CommitSet;

// ---------------------------------------------------------------------------
// FieldIndex
// ---------------------------------------------------------------------------

/// Ordered index over field values of committed objects.
pub trait FieldIndex: Send + Sync {
    /// Returns `true` if `field` is indexed.
    fn indexes(&self, field: &str) -> bool;

    /// `(key, id)` pairs with `lower <= key <= upper` (per the bounds), in
    /// key order.
    fn search(&self, field: &str, lower: Bound<&str>, upper: Bound<&str>)
        -> Vec<(String, ObjectId)>;

    /// Ids holding exactly `key`.
    fn lookup(&self, field: &str, key: &str) -> Vec<ObjectId> {
        self.search(field, Bound::Included(key), Bound::Included(key))
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }
}

#[derive(Default)]
struct FieldEntries {
    by_key: BTreeMap<String, BTreeSet<ObjectId>>,
    by_id: HashMap<ObjectId, String>,
}

impl FieldEntries {
    fn remove(&mut self, id: ObjectId) {
        if let Some(old) = self.by_id.remove(&id) {
            if let Some(ids) = self.by_key.get_mut(&old) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_key.remove(&old);
                }
            }
        }
    }

    fn insert(&mut self, id: ObjectId, key: String) {
        self.remove(id);
        self.by_key.entry(key.clone()).or_default().insert(id);
        self.by_id.insert(id, key);
    }
}

/// In-memory [`FieldIndex`], kept current as a [`CommitObserver`].
pub struct InMemoryFieldIndex {
    fields: RwLock<HashMap<String, FieldEntries>>,
}

impl InMemoryFieldIndex {
    /// Index the given fields.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|f| (f.into(), FieldEntries::default()))
            .collect();
        Self {
            fields: RwLock::new(fields),
        }
    }

    /// Indexed field names, sorted.
    pub fn fields(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Set or clear the entry of `id` for one field.
    pub fn put(&self, field: &str, id: ObjectId, key: Option<String>) {
        if let Some(entries) = self.fields.write().get_mut(field) {
            match key {
                Some(key) => entries.insert(id, key),
                None => entries.remove(id),
            }
        }
    }

    /// Drop `id` from every field.
    pub fn remove(&self, id: ObjectId) {
        for entries in self.fields.write().values_mut() {
            entries.remove(id);
        }
    }

    /// Rebuild from every slot in `store`. Returns the number of objects
    /// scanned.
    pub fn rebuild(&self, store: &dyn SlotStore, codec: &dyn ObjectCodec) -> CommitResult<usize> {
        let names = self.fields();
        let mut fresh: HashMap<String, FieldEntries> = names
            .iter()
            .map(|f| (f.clone(), FieldEntries::default()))
            .collect();

        let ids = store.ids()?;
        for id in &ids {
            let Some(bytes) = store.read(*id)? else {
                continue;
            };
            let decoded = codec
                .decode(&bytes, ActivationPurpose::Read)
                .map_err(|e| CommitError::IndexRebuild {
                    id: *id,
                    reason: e.to_string(),
                })?;
            for name in &names {
                if let Some(key) = codec.field_value(&decoded.value, name) {
                    if let Some(entries) = fresh.get_mut(name) {
                        entries.insert(*id, key);
                    }
                }
            }
        }

        *self.fields.write() = fresh;
        debug!(objects = ids.len(), fields = names.len(), "field index rebuilt");
        Ok(ids.len())
    }
}

impl FieldIndex for InMemoryFieldIndex {
    fn indexes(&self, field: &str) -> bool {
        self.fields.read().contains_key(field)
    }

    fn search(
        &self,
        field: &str,
        lower: Bound<&str>,
        upper: Bound<&str>,
    ) -> Vec<(String, ObjectId)> {
        let empty = match (lower, upper) {
            (Bound::Included(l), Bound::Included(u)) => l > u,
            (Bound::Included(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u))
            | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
            _ => false,
        };
        if empty {
            return Vec::new();
        }

        let fields = self.fields.read();
        let Some(entries) = fields.get(field) else {
            return Vec::new();
        };
        entries
            .by_key
            .range::<str, _>((lower, upper))
            .flat_map(|(key, ids)| ids.iter().map(move |id| (key.clone(), *id)))
            .collect()
    }
}

impl CommitObserver for InMemoryFieldIndex {
    fn name(&self) -> &str {
        "field-index"
    }

    fn on_committed(&self, committed: &Committed<'_>) {
        let mut fields = self.fields.write();
        for (name, entries) in fields.iter_mut() {
            for id in &committed.set().deleted {
                entries.remove(*id);
            }
            for id in committed.set().written() {
                let key = committed
                    .value(id)
                    .and_then(|value| committed.codec().field_value(value, name));
                match key {
                    Some(key) => entries.insert(id, key),
                    None => entries.remove(id),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UniqueFieldConstraint
// ---------------------------------------------------------------------------

/// Vetoes a commit that would leave two objects with the same value in one
/// field.
///
/// For each added or updated id the constraint resolves the field's pending
/// value, range-searches the index for committed holders of that value, and
/// counts them together with other pending objects of the same value.
/// Holders being deleted or rewritten by this commit are not counted from
/// the index.
pub struct UniqueFieldConstraint<I: FieldIndex + ?Sized> {
    name: String,
    field: String,
    index: std::sync::Arc<I>,
}

impl<I: FieldIndex + ?Sized> UniqueFieldConstraint<I> {
    pub fn new(field: impl Into<String>, index: std::sync::Arc<I>) -> Self {
        let field = field.into();
        Self {
            name: format!("unique:{field}"),
            field,
            index,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl<I: FieldIndex + ?Sized> CommitListener for UniqueFieldConstraint<I> {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_commit(&self, set: &CommitSet, context: &CommitContext<'_>) -> Result<(), VetoReason> {
        let mut pending: HashMap<String, Vec<ObjectId>> = HashMap::new();
        for id in set.written() {
            if let Some(key) = context.field_value(id, &self.field)? {
                pending.entry(key).or_default().push(id);
            }
        }

        for (key, ids) in &pending {
            let rewritten: HashSet<ObjectId> = ids.iter().copied().collect();
            let committed = self
                .index
                .lookup(&self.field, key)
                .into_iter()
                .filter(|holder| !set.deleted.contains(holder) && !set.updated.contains(holder))
                .filter(|holder| !rewritten.contains(holder))
                .count();
            let total = committed + ids.len();
            if total > 1 {
                return Err(VetoReason::new(format!(
                    "field `{}` value `{}` is held by {} objects",
                    self.field, key, total
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use trellis_refs::{ActivationEngine, Record, RecordCodec, ReferenceTable};
    use trellis_store::InMemorySlotStore;
    use trellis_types::{ContainerId, OpaqueHandle};

    use super::*;
    use crate::pipeline::CommitPipeline;
    use crate::transaction::Transaction;

    fn id(raw: u64) -> ObjectId {
        ObjectId::new(raw)
    }

    fn user(email: &str) -> OpaqueHandle {
        Record::new("User").with("email", email).into()
    }

    fn setup() -> (CommitPipeline, Arc<InMemoryFieldIndex>) {
        let store = Arc::new(InMemorySlotStore::new());
        let engine = ActivationEngine::new(
            Arc::new(ReferenceTable::new(ContainerId::next())),
            store,
            Arc::new(RecordCodec::new()),
        );
        let pipeline = CommitPipeline::new(Arc::new(engine));
        let index = Arc::new(InMemoryFieldIndex::new(["email"]));
        pipeline
            .register(Arc::new(UniqueFieldConstraint::new("email", Arc::clone(&index))))
            .unwrap();
        pipeline.register_observer(index.clone()).unwrap();
        (pipeline, index)
    }

    // -----------------------------------------------------------------------
    // Index
    // -----------------------------------------------------------------------

    #[test]
    fn range_search_in_key_order() {
        let index = InMemoryFieldIndex::new(["k"]);
        index.put("k", id(1), Some("b".into()));
        index.put("k", id(2), Some("a".into()));
        index.put("k", id(3), Some("c".into()));
        let hits = index.search("k", Bound::Included("a"), Bound::Excluded("c"));
        assert_eq!(hits, vec![("a".into(), id(2)), ("b".into(), id(1))]);
        assert!(index
            .search("k", Bound::Included("z"), Bound::Included("a"))
            .is_empty());
        assert!(index.search("other", Bound::Unbounded, Bound::Unbounded).is_empty());
    }

    #[test]
    fn put_replaces_previous_key() {
        let index = InMemoryFieldIndex::new(["k"]);
        index.put("k", id(1), Some("old".into()));
        index.put("k", id(1), Some("new".into()));
        assert!(index.lookup("k", "old").is_empty());
        assert_eq!(index.lookup("k", "new"), vec![id(1)]);
        index.remove(id(1));
        assert!(index.lookup("k", "new").is_empty());
    }

    #[test]
    fn rebuild_from_store() {
        let store = InMemorySlotStore::new();
        let codec = RecordCodec::new();
        store.write(id(1), &codec.encode(&user("a@x")).unwrap()).unwrap();
        store.write(id(2), &codec.encode(&user("b@x")).unwrap()).unwrap();
        let index = InMemoryFieldIndex::new(["email"]);
        assert_eq!(index.rebuild(&store, &codec).unwrap(), 2);
        assert_eq!(index.lookup("email", "b@x"), vec![id(2)]);
    }

    // -----------------------------------------------------------------------
    // Constraint
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_in_one_commit_is_vetoed() {
        let (pipeline, _) = setup();
        let mut tx = Transaction::new();
        tx.add(id(1), user("a@x"));
        tx.add(id(2), user("a@x"));
        let err = pipeline.commit(&mut tx).unwrap_err();
        assert!(matches!(
            err,
            CommitError::ConstraintViolation { ref listener, .. } if listener == "unique:email"
        ));
    }

    #[test]
    fn duplicate_of_committed_value_is_vetoed() {
        let (pipeline, index) = setup();
        let mut tx = Transaction::new();
        tx.add(id(1), user("a@x"));
        pipeline.commit(&mut tx).unwrap();
        assert_eq!(index.lookup("email", "a@x"), vec![id(1)]);

        tx.add(id(2), user("a@x"));
        assert!(pipeline.commit(&mut tx).unwrap_err().is_veto());
    }

    #[test]
    fn updating_own_value_and_swapping_are_allowed() {
        let (pipeline, index) = setup();
        let mut tx = Transaction::new();
        tx.add(id(1), user("a@x"));
        tx.add(id(2), user("b@x"));
        pipeline.commit(&mut tx).unwrap();

        // Rewriting an object with its own value.
        tx.update(id(1), user("a@x"));
        pipeline.commit(&mut tx).unwrap();

        // Swapping values between two objects in one commit.
        tx.update(id(1), user("b@x"));
        tx.update(id(2), user("a@x"));
        pipeline.commit(&mut tx).unwrap();
        assert_eq!(index.lookup("email", "a@x"), vec![id(2)]);
    }

    #[test]
    fn value_freed_by_delete_can_be_reused() {
        let (pipeline, index) = setup();
        let mut tx = Transaction::new();
        tx.add(id(1), user("a@x"));
        pipeline.commit(&mut tx).unwrap();

        tx.delete([id(1)]);
        tx.add(id(2), user("a@x"));
        pipeline.commit(&mut tx).unwrap();
        assert_eq!(index.lookup("email", "a@x"), vec![id(2)]);
    }
}
