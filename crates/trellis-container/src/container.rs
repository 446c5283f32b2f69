use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};
use trellis_cascade::{CascadeDeleteEngine, DeletePlan};
use trellis_commit::{
    CommitListener, CommitObserver, CommitPipeline, CommitReport, FieldIndex, InMemoryFieldIndex,
    Transaction, TransactionReader, UniqueFieldConstraint,
};
use trellis_convert::{open_metadata, Converter, OpenReport, SystemMetadata};
use trellis_peer::{PeerEndpoint, PeerLink};
use trellis_refs::{ActivationEngine, ObjectCodec, RecordCodec, ReferenceTable};
use trellis_store::{FileSlotStore, SlotStore};
use trellis_types::{ActivationPurpose, ContainerId, ObjectId, OpaqueHandle};

use crate::config::ContainerConfig;
use crate::error::{ContainerError, ContainerResult};

/// One open store with its reference table, commit pipeline and peer
/// endpoint.
///
/// Transactions are plain values obtained from [`begin`](Self::begin); any
/// number may be open at once. Activation and commit are safe to call from
/// several threads through a shared reference.
pub struct ObjectContainer {
    id: ContainerId,
    config: ContainerConfig,
    opened: OpenReport,
    engine: Arc<ActivationEngine>,
    pipeline: CommitPipeline,
    cascade: CascadeDeleteEngine,
    index: Option<Arc<InMemoryFieldIndex>>,
    endpoint: Arc<PeerEndpoint>,
    closed: AtomicBool,
}

impl ObjectContainer {
    /// Open a container over `store`, converting its metadata with the
    /// default [`Converter`].
    pub fn open(
        store: Arc<dyn SlotStore>,
        codec: Arc<dyn ObjectCodec>,
        config: ContainerConfig,
    ) -> ContainerResult<Self> {
        Self::open_with(store, codec, config, &Converter::new())
    }

    /// Open a file-backed container using [`RecordCodec`].
    pub fn open_file(path: &Path, config: ContainerConfig) -> ContainerResult<Self> {
        let store = FileSlotStore::open(path, config.file_store())?;
        Self::open(Arc::new(store), Arc::new(RecordCodec::new()), config)
    }

    /// Open with an explicit converter. Conversion completes before any
    /// object is activated; a failed conversion aborts the open.
    pub fn open_with(
        store: Arc<dyn SlotStore>,
        codec: Arc<dyn ObjectCodec>,
        config: ContainerConfig,
        converter: &Converter,
    ) -> ContainerResult<Self> {
        let opened = open_metadata(store.as_ref(), converter, config.read_only)?;

        let id = ContainerId::next();
        let table = Arc::new(ReferenceTable::new(id));
        let engine = Arc::new(ActivationEngine::new(table, store.clone(), codec.clone()));
        let pipeline = CommitPipeline::new(engine.clone());
        let cascade = CascadeDeleteEngine::new(codec.clone(), config.policies());

        let index = if config.unique_fields.is_empty() {
            None
        } else {
            let index = Arc::new(InMemoryFieldIndex::new(config.unique_fields.iter().cloned()));
            let scanned = index.rebuild(store.as_ref(), codec.as_ref())?;
            pipeline.register_observer(index.clone())?;
            for field in &config.unique_fields {
                let constraint = UniqueFieldConstraint::new(field.clone(), index.clone());
                pipeline.register(Arc::new(constraint))?;
            }
            debug!(fields = config.unique_fields.len(), scanned, "unique constraints installed");
            Some(index)
        };

        info!(
            container = %id,
            converter_version = opened.metadata.converter_version,
            read_only = config.read_only,
            "container opened"
        );
        Ok(Self {
            id,
            config,
            opened,
            engine,
            pipeline,
            cascade,
            index,
            endpoint: PeerEndpoint::new(id),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// System metadata in effect after open.
    pub fn metadata(&self) -> &SystemMetadata {
        &self.opened.metadata
    }

    /// What the converter did at open.
    pub fn open_report(&self) -> &OpenReport {
        &self.opened
    }

    pub fn engine(&self) -> &Arc<ActivationEngine> {
        &self.engine
    }

    pub fn pipeline(&self) -> &CommitPipeline {
        &self.pipeline
    }

    pub fn endpoint(&self) -> &Arc<PeerEndpoint> {
        &self.endpoint
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    // ---- Transactions ----

    pub fn begin(&self) -> Transaction {
        Transaction::new()
    }

    /// Stage a new object. The id is allocated now and released again if
    /// the transaction drops the add or rolls back.
    pub fn store(&self, tx: &mut Transaction, value: OpaqueHandle) -> ContainerResult<ObjectId> {
        self.ensure_writable()?;
        let id = self.engine.store().alloc()?;
        tx.add(id, value);
        debug!(id = %id, "object staged");
        Ok(id)
    }

    /// Stage a new value for an existing object.
    pub fn update(
        &self,
        tx: &mut Transaction,
        id: ObjectId,
        value: OpaqueHandle,
    ) -> ContainerResult<()> {
        self.ensure_writable()?;
        if tx.pending_value(id).is_none() && !self.engine.store().exists(id)? {
            return Err(ContainerError::NotFound(id));
        }
        tx.update(id, value);
        Ok(())
    }

    /// Stage a cascading delete of `id` to `depth` levels. Returns the
    /// planned closure; nothing is freed until commit.
    ///
    /// Deleting an id that is already gone is a no-op: the plan is empty
    /// and lists the root under [`DeletePlan::missing`].
    pub fn delete(
        &self,
        tx: &mut Transaction,
        id: ObjectId,
        depth: u32,
    ) -> ContainerResult<DeletePlan> {
        self.ensure_writable()?;
        let plan = {
            let reader = TransactionReader::new(
                tx,
                self.engine.store().as_ref(),
                self.engine.codec().as_ref(),
            );
            self.cascade.plan(&reader, id, depth)?
        };
        if plan.is_empty() {
            debug!(id = %id, "delete of missing object ignored");
            return Ok(plan);
        }
        tx.delete(plan.ids().iter().copied());
        Ok(plan)
    }

    pub fn commit(&self, tx: &mut Transaction) -> ContainerResult<CommitReport> {
        self.ensure_writable()?;
        Ok(self.pipeline.commit(tx)?)
    }

    pub fn rollback(&self, tx: &mut Transaction) -> ContainerResult<()> {
        self.ensure_open()?;
        Ok(self.pipeline.rollback(tx)?)
    }

    // ---- Activation ----

    /// Activate `id` to the configured depth.
    pub fn activate(
        &self,
        id: ObjectId,
        purpose: ActivationPurpose,
    ) -> ContainerResult<OpaqueHandle> {
        self.activate_depth(id, purpose, self.config.activation_depth)
    }

    pub fn activate_depth(
        &self,
        id: ObjectId,
        purpose: ActivationPurpose,
        depth: u32,
    ) -> ContainerResult<OpaqueHandle> {
        if purpose.is_write() {
            self.ensure_writable()?;
        } else {
            self.ensure_open()?;
        }
        Ok(self.engine.activate(id, purpose, depth)?)
    }

    pub fn deactivate(&self, id: ObjectId, depth: u32) -> ContainerResult<()> {
        self.ensure_open()?;
        Ok(self.engine.deactivate(id, depth)?)
    }

    /// Ids of every stored object.
    pub fn ids(&self) -> ContainerResult<Vec<ObjectId>> {
        Ok(self.engine.store().ids()?)
    }

    /// Committed objects whose `field` equals `key`. Only fields listed in
    /// `unique_fields` are indexed.
    pub fn find(&self, field: &str, key: &str) -> ContainerResult<Vec<ObjectId>> {
        match &self.index {
            Some(index) if index.indexes(field) => Ok(index.lookup(field, key)),
            _ => Err(ContainerError::NotIndexed(field.to_string())),
        }
    }

    // ---- Listeners ----

    pub fn register_listener(&self, listener: Arc<dyn CommitListener>) -> ContainerResult<()> {
        Ok(self.pipeline.register(listener)?)
    }

    pub fn deregister_listener(&self, name: &str) -> bool {
        self.pipeline.deregister(name)
    }

    pub fn register_observer(&self, observer: Arc<dyn CommitObserver>) -> ContainerResult<()> {
        Ok(self.pipeline.register_observer(observer)?)
    }

    // ---- Peers ----

    /// Link this container to `source` for migration. Any link either side
    /// had is terminated first.
    pub fn migrate_from(&self, source: &ObjectContainer) -> ContainerResult<Arc<PeerLink>> {
        self.ensure_open()?;
        source.ensure_open()?;
        Ok(PeerLink::establish(&source.endpoint, &self.endpoint)?)
    }

    pub fn migration_link(&self) -> Option<Arc<PeerLink>> {
        self.endpoint.migration_source()
    }

    // ---- Lifecycle ----

    /// Terminate any peer link and drop all cached references. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(link) = self.migration_link() {
            link.terminate();
        }
        let dirty = self.engine.table().dirty_ids().len();
        self.engine.table().clear();
        info!(container = %self.id, discarded_dirty = dirty, "container closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> ContainerResult<()> {
        if self.is_closed() {
            Err(ContainerError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> ContainerResult<()> {
        self.ensure_open()?;
        if self.config.read_only {
            Err(ContainerError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl Drop for ObjectContainer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ObjectContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContainer")
            .field("id", &self.id)
            .field("read_only", &self.config.read_only)
            .field("closed", &self.is_closed())
            .field("references", &self.engine.table().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use trellis_refs::{Record, Value};
    use trellis_store::InMemorySlotStore;

    use super::*;

    fn memory(config: ContainerConfig) -> ObjectContainer {
        ObjectContainer::open(
            Arc::new(InMemorySlotStore::new()),
            Arc::new(RecordCodec::new()),
            config,
        )
        .unwrap()
    }

    fn name_of(value: &OpaqueHandle) -> Option<String> {
        value
            .downcast_ref::<Record>()
            .and_then(|r| r.get("name"))
            .and_then(Value::as_key)
    }

    // ----------------------------------------------------------------
    // Store / update / activate
    // ----------------------------------------------------------------

    #[test]
    fn store_commit_activate() {
        let db = memory(ContainerConfig::default());
        let mut tx = db.begin();
        let id = db.store(&mut tx, Record::new("Person").with("name", "Ada").into()).unwrap();
        let report = db.commit(&mut tx).unwrap();
        assert_eq!(report.added, 1);

        db.engine().evict(id);
        let value = db.activate(id, ActivationPurpose::Read).unwrap();
        assert_eq!(name_of(&value).as_deref(), Some("Ada"));
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let db = memory(ContainerConfig::default());
        let mut tx = db.begin();
        let err = db
            .update(&mut tx, ObjectId::new(42), Record::new("X").into())
            .unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));
    }

    #[test]
    fn update_replaces_committed_value() {
        let db = memory(ContainerConfig::default());
        let mut tx = db.begin();
        let id = db.store(&mut tx, Record::new("Person").with("name", "Ada").into()).unwrap();
        db.commit(&mut tx).unwrap();

        db.update(&mut tx, id, Record::new("Person").with("name", "Grace").into())
            .unwrap();
        let report = db.commit(&mut tx).unwrap();
        assert_eq!(report.updated, 1);
        db.engine().evict(id);
        let value = db.activate(id, ActivationPurpose::Read).unwrap();
        assert_eq!(name_of(&value).as_deref(), Some("Grace"));
    }

    // ----------------------------------------------------------------
    // Delete
    // ----------------------------------------------------------------

    #[test]
    fn delete_follows_configured_policies() {
        let config = ContainerConfig::from_toml_str(
            "[cascade]\nlines = \"force_cascade\"\ncustomer = \"force_no_cascade\"\n",
        )
        .unwrap();
        let db = memory(config);
        let mut tx = db.begin();
        let customer = db.store(&mut tx, Record::new("Customer").into()).unwrap();
        let line = db.store(&mut tx, Record::new("Line").into()).unwrap();
        let order = db
            .store(
                &mut tx,
                Record::new("Order")
                    .with("lines", Value::Ref(line))
                    .with("customer", Value::Ref(customer))
                    .into(),
            )
            .unwrap();
        db.commit(&mut tx).unwrap();

        let plan = db.delete(&mut tx, order, 0).unwrap();
        assert_eq!(plan.ids(), &[line, order]);
        let report = db.commit(&mut tx).unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(db.ids().unwrap(), vec![customer]);
    }

    #[test]
    fn second_delete_is_a_no_op() {
        let db = memory(ContainerConfig::default());
        let mut tx = db.begin();
        let id = db.store(&mut tx, Record::new("Item").into()).unwrap();
        db.commit(&mut tx).unwrap();

        assert_eq!(db.delete(&mut tx, id, 1).unwrap().ids(), &[id]);
        db.commit(&mut tx).unwrap();

        let again = db.delete(&mut tx, id, 1).unwrap();
        assert!(again.is_empty());
        assert_eq!(again.missing(), &[id]);
        assert!(tx.is_empty());
        assert!(db.commit(&mut tx).unwrap().is_empty());

        let never = db.delete(&mut tx, ObjectId::new(9), 0).unwrap();
        assert_eq!(never.missing(), &[ObjectId::new(9)]);
    }

    // ----------------------------------------------------------------
    // Read-only and close
    // ----------------------------------------------------------------

    #[test]
    fn read_only_rejects_mutation() {
        let db = memory(ContainerConfig {
            read_only: true,
            ..ContainerConfig::default()
        });
        let mut tx = db.begin();
        assert!(matches!(
            db.store(&mut tx, Record::new("X").into()).unwrap_err(),
            ContainerError::ReadOnly
        ));
        assert!(matches!(db.commit(&mut tx).unwrap_err(), ContainerError::ReadOnly));
        assert!(matches!(
            db.activate(ObjectId::new(1), ActivationPurpose::Write).unwrap_err(),
            ContainerError::ReadOnly
        ));
    }

    #[test]
    fn closed_container_rejects_everything() {
        let db = memory(ContainerConfig::default());
        db.close();
        db.close();
        assert!(db.is_closed());
        let mut tx = db.begin();
        assert!(matches!(
            db.store(&mut tx, Record::new("X").into()).unwrap_err(),
            ContainerError::Closed
        ));
        assert!(matches!(
            db.activate(ObjectId::new(1), ActivationPurpose::Read).unwrap_err(),
            ContainerError::Closed
        ));
    }

    #[test]
    fn close_terminates_peer_link() {
        let source = memory(ContainerConfig::default());
        let target = memory(ContainerConfig::default());
        let link = target.migrate_from(&source).unwrap();
        assert!(source.migration_link().is_some());

        target.close();
        assert!(link.is_terminated());
        assert!(source.migration_link().is_none());
    }

    // ----------------------------------------------------------------
    // Unique fields
    // ----------------------------------------------------------------

    #[test]
    fn unique_field_vetoes_duplicate() {
        let db = memory(ContainerConfig {
            unique_fields: vec!["email".into()],
            ..ContainerConfig::default()
        });
        let mut tx = db.begin();
        let first = db
            .store(&mut tx, Record::new("User").with("email", "a@x").into())
            .unwrap();
        db.commit(&mut tx).unwrap();
        assert_eq!(db.find("email", "a@x").unwrap(), vec![first]);

        let dup = db
            .store(&mut tx, Record::new("User").with("email", "a@x").into())
            .unwrap();
        let err = db.commit(&mut tx).unwrap_err();
        assert!(err.is_veto());

        tx.remove_mutation(dup);
        db.commit(&mut tx).unwrap();
        assert!(matches!(db.find("name", "x").unwrap_err(), ContainerError::NotIndexed(_)));
    }
}
