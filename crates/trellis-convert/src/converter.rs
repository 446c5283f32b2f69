use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};
use trellis_store::SlotStore;

use crate::error::{ConversionError, ConvertError, ConvertResult};
use crate::metadata::SystemMetadata;
use crate::stage::{ConversionStage, StageKind};

/// Converter version stamped on stores created by this build.
pub const VERSION: u32 = 6;

/// One versioned schema conversion.
///
/// A conversion registered for version `v` runs when a store persisted at
/// a version `<= v` is opened by an engine newer than the store. Both hooks
/// default to no-ops.
pub trait Conversion: Send + Sync {
    fn on_class_collection_available(
        &self,
        _stage: &mut ConversionStage<'_>,
    ) -> Result<(), ConversionError> {
        Ok(())
    }

    fn on_system_up(&self, _stage: &mut ConversionStage<'_>) -> Result<(), ConversionError> {
        Ok(())
    }
}

/// A conversion that only has work at system-up.
pub struct SystemUpConversion<F>(F);

impl<F> SystemUpConversion<F>
where
    F: Fn(&mut ConversionStage<'_>) -> Result<(), ConversionError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Conversion for SystemUpConversion<F>
where
    F: Fn(&mut ConversionStage<'_>) -> Result<(), ConversionError> + Send + Sync,
{
    fn on_system_up(&self, stage: &mut ConversionStage<'_>) -> Result<(), ConversionError> {
        (self.0)(stage)
    }
}

/// Registry of conversions keyed by target version.
pub struct Converter {
    version: u32,
    conversions: BTreeMap<u32, Box<dyn Conversion>>,
}

impl Converter {
    /// A converter targeting [`VERSION`] with nothing registered.
    pub fn new() -> Self {
        Self::with_version(VERSION)
    }

    /// A converter targeting an explicit version.
    pub fn with_version(version: u32) -> Self {
        Self {
            version,
            conversions: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Register the conversion that brings a store up to `version`.
    pub fn register(
        &mut self,
        version: u32,
        conversion: Box<dyn Conversion>,
    ) -> ConvertResult<()> {
        if self.conversions.contains_key(&version) {
            return Err(ConvertError::DuplicateConversion(version));
        }
        self.conversions.insert(version, conversion);
        Ok(())
    }

    /// Registered target versions, ascending.
    pub fn registered_versions(&self) -> Vec<u32> {
        self.conversions.keys().copied().collect()
    }

    pub fn needs_conversion(&self, system: &SystemMetadata) -> bool {
        system.converter_version < self.version
    }

    /// Run one stage: every registered conversion in
    /// `from_version..=version`, ascending. Returns how many ran.
    ///
    /// Stops at the first failure. The stage is not rolled back; callers
    /// discard it.
    pub fn convert(&self, stage: &mut ConversionStage<'_>) -> ConvertResult<usize> {
        let from = stage.from_version();
        if from >= self.version {
            return Ok(0);
        }
        let mut ran = 0;
        for (&version, conversion) in self.conversions.range(from..=self.version) {
            debug!(version, stage = %stage.kind(), "running conversion");
            let outcome = match stage.kind() {
                StageKind::ClassCollectionAvailable => {
                    conversion.on_class_collection_available(stage)
                }
                StageKind::SystemUp => conversion.on_system_up(stage),
            };
            outcome.map_err(|source| ConvertError::ConversionFailed { version, source })?;
            ran += 1;
        }
        Ok(ran)
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("version", &self.version)
            .field("registered", &self.registered_versions())
            .finish()
    }
}

/// Outcome of [`open_metadata`].
#[derive(Clone, Debug)]
pub struct OpenReport {
    /// Metadata in effect after open.
    pub metadata: SystemMetadata,
    /// Version persisted before open; `None` for a fresh store.
    pub from_version: Option<u32>,
    /// Conversions run per stage: `(class-collection-available, system-up)`.
    pub applied: (usize, usize),
    /// Whether header and staged writes were written back.
    pub persisted: bool,
}

/// Load system metadata from `store`, converting it up to the converter's
/// version if needed.
///
/// - No header: fresh metadata stamped with the converter version, written
///   unless `read_only`.
/// - Header newer than or equal to the converter version: returned as is.
/// - Older header: class-collection-available stage runs; a read-only open
///   stops there and persists nothing. Otherwise the system-up stage runs,
///   the version is bumped, and header plus staged slot writes are applied
///   as one batch.
///
/// On any conversion failure the store is left untouched.
pub fn open_metadata(
    store: &dyn SlotStore,
    converter: &Converter,
    read_only: bool,
) -> ConvertResult<OpenReport> {
    let Some(bytes) = store.read_header()? else {
        let metadata = SystemMetadata::fresh(converter.version());
        if !read_only {
            store.write_header(&metadata.to_bytes()?)?;
        }
        info!(version = converter.version(), "stamped fresh store");
        return Ok(OpenReport {
            metadata,
            from_version: None,
            applied: (0, 0),
            persisted: !read_only,
        });
    };

    let metadata = SystemMetadata::from_bytes(&bytes)?;
    let from = metadata.converter_version;
    if from > converter.version() {
        warn!(
            store_version = from,
            engine_version = converter.version(),
            "store written by a newer engine, not converting"
        );
    }
    if !converter.needs_conversion(&metadata) {
        return Ok(OpenReport {
            metadata,
            from_version: Some(from),
            applied: (0, 0),
            persisted: false,
        });
    }

    let mut stage =
        ConversionStage::new(StageKind::ClassCollectionAvailable, from, metadata, store);
    let early = converter.convert(&mut stage)?;
    if read_only {
        warn!(from, to = converter.version(), "read-only open, conversion not persisted");
        let (metadata, _) = stage.finish();
        return Ok(OpenReport {
            metadata,
            from_version: Some(from),
            applied: (early, 0),
            persisted: false,
        });
    }

    let mut stage = stage.advance(StageKind::SystemUp);
    let late = converter.convert(&mut stage)?;
    let (mut metadata, mut batch) = stage.finish();
    metadata.converter_version = converter.version();
    batch.header(metadata.to_bytes()?);
    store.apply(&batch)?;
    info!(from, to = converter.version(), early, late, "converted store");
    Ok(OpenReport {
        metadata,
        from_version: Some(from),
        applied: (early, late),
        persisted: true,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use trellis_store::{FileSlotStore, FileStoreConfig, InMemorySlotStore};
    use trellis_types::ObjectId;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        version: u32,
        log: Log,
    }

    impl Conversion for Recording {
        fn on_class_collection_available(
            &self,
            stage: &mut ConversionStage<'_>,
        ) -> Result<(), ConversionError> {
            self.log.lock().unwrap().push(format!("cca:{}", self.version));
            let from_version = stage.from_version().to_string();
            stage
                .system_mut()
                .properties
                .insert(format!("cca-{}", self.version), from_version);
            Ok(())
        }

        fn on_system_up(&self, stage: &mut ConversionStage<'_>) -> Result<(), ConversionError> {
            self.log.lock().unwrap().push(format!("up:{}", self.version));
            assert_eq!(stage.kind(), StageKind::SystemUp);
            Ok(())
        }
    }

    fn recording(converter: &mut Converter, version: u32, log: &Log) {
        converter
            .register(version, Box::new(Recording { version, log: log.clone() }))
            .unwrap();
    }

    fn seed(store: &dyn SlotStore, version: u32) {
        store
            .write_header(&SystemMetadata::fresh(version).to_bytes().unwrap())
            .unwrap();
    }

    // ----------------------------------------------------------------
    // Version walk
    // ----------------------------------------------------------------

    #[test]
    fn old_store_runs_pending_conversions_in_order() {
        let store = InMemorySlotStore::new();
        seed(&store, 2);
        let log: Log = Arc::default();
        let mut converter = Converter::with_version(6);
        for v in [1, 2, 4, 6] {
            recording(&mut converter, v, &log);
        }

        let report = open_metadata(&store, &converter, false).unwrap();
        assert_eq!(report.from_version, Some(2));
        assert_eq!(report.applied, (3, 3));
        assert!(report.persisted);
        assert_eq!(report.metadata.converter_version, 6);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["cca:2", "cca:4", "cca:6", "up:2", "up:4", "up:6"]
        );
        assert_eq!(report.metadata.properties.get("cca-4").map(String::as_str), Some("2"));

        log.lock().unwrap().clear();
        let again = open_metadata(&store, &converter, false).unwrap();
        assert_eq!(again.applied, (0, 0));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(again.metadata, report.metadata);
    }

    #[test]
    fn conversions_from_two_with_steps_two_and_four() {
        let store = InMemorySlotStore::new();
        seed(&store, 2);
        let log: Log = Arc::default();
        let mut converter = Converter::new();
        recording(&mut converter, 2, &log);
        recording(&mut converter, 4, &log);

        let report = open_metadata(&store, &converter, false).unwrap();
        assert_eq!(report.metadata.converter_version, VERSION);
        assert_eq!(*log.lock().unwrap(), vec!["cca:2", "cca:4", "up:2", "up:4"]);
    }

    #[test]
    fn newer_store_is_left_alone() {
        let store = InMemorySlotStore::new();
        seed(&store, 9);
        let log: Log = Arc::default();
        let mut converter = Converter::with_version(6);
        recording(&mut converter, 6, &log);

        let report = open_metadata(&store, &converter, false).unwrap();
        assert_eq!(report.metadata.converter_version, 9);
        assert!(!report.persisted);
        assert!(log.lock().unwrap().is_empty());
    }

    // ----------------------------------------------------------------
    // Failure and read-only
    // ----------------------------------------------------------------

    #[test]
    fn failed_conversion_leaves_header_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.trellis");
        let store = FileSlotStore::open(&path, FileStoreConfig::default()).unwrap();
        seed(&store, 1);
        let before = store.read_header().unwrap();

        let mut converter = Converter::with_version(3);
        converter
            .register(
                2,
                Box::new(SystemUpConversion::new(|stage: &mut ConversionStage<'_>| {
                    stage.stage_write(ObjectId::new(1), b"rewritten".to_vec());
                    Ok(())
                })),
            )
            .unwrap();
        converter
            .register(
                3,
                Box::new(SystemUpConversion::new(|_: &mut ConversionStage<'_>| {
                    Err(ConversionError::rejected("bad field layout"))
                })),
            )
            .unwrap();

        let err = open_metadata(&store, &converter, false).unwrap_err();
        assert!(matches!(err, ConvertError::ConversionFailed { version: 3, .. }));
        assert_eq!(err.to_string(), "conversion to version 3 failed: bad field layout");
        assert_eq!(store.read_header().unwrap(), before);
        assert!(store.read(ObjectId::new(1)).unwrap().is_none());

        drop(store);
        let reopened = FileSlotStore::open(&path, FileStoreConfig::default()).unwrap();
        assert_eq!(reopened.read_header().unwrap(), before);
    }

    #[test]
    fn staged_writes_persist_with_header() {
        let store = InMemorySlotStore::new();
        seed(&store, 1);
        store.write(ObjectId::new(2), b"stale").unwrap();
        let mut converter = Converter::with_version(2);
        converter
            .register(
                2,
                Box::new(SystemUpConversion::new(|stage: &mut ConversionStage<'_>| {
                    stage.stage_write(ObjectId::new(1), b"index".to_vec());
                    stage.stage_free(ObjectId::new(2));
                    Ok(())
                })),
            )
            .unwrap();

        open_metadata(&store, &converter, false).unwrap();
        assert_eq!(store.read(ObjectId::new(1)).unwrap().unwrap(), b"index");
        assert!(store.read(ObjectId::new(2)).unwrap().is_none());
    }

    #[test]
    fn read_only_runs_first_stage_only() {
        let store = InMemorySlotStore::new();
        seed(&store, 1);
        let before = store.read_header().unwrap();
        let log: Log = Arc::default();
        let mut converter = Converter::with_version(2);
        recording(&mut converter, 2, &log);

        let report = open_metadata(&store, &converter, true).unwrap();
        assert_eq!(report.applied, (1, 0));
        assert!(!report.persisted);
        assert_eq!(*log.lock().unwrap(), vec!["cca:2"]);
        assert_eq!(store.read_header().unwrap(), before);
    }

    // ----------------------------------------------------------------
    // Registration and fresh stores
    // ----------------------------------------------------------------

    #[test]
    fn duplicate_registration_rejected() {
        let mut converter = Converter::new();
        converter
            .register(3, Box::new(SystemUpConversion::new(|_: &mut ConversionStage<'_>| Ok(()))))
            .unwrap();
        let err = converter
            .register(3, Box::new(SystemUpConversion::new(|_: &mut ConversionStage<'_>| Ok(()))))
            .unwrap_err();
        assert!(matches!(err, ConvertError::DuplicateConversion(3)));
        assert_eq!(converter.registered_versions(), vec![3]);
    }

    #[test]
    fn fresh_store_is_stamped_without_conversions() {
        let store = InMemorySlotStore::new();
        let log: Log = Arc::default();
        let mut converter = Converter::new();
        recording(&mut converter, 1, &log);

        let report = open_metadata(&store, &converter, false).unwrap();
        assert_eq!(report.from_version, None);
        assert!(log.lock().unwrap().is_empty());
        let stored = SystemMetadata::from_bytes(&store.read_header().unwrap().unwrap()).unwrap();
        assert_eq!(stored.converter_version, VERSION);
    }

    #[test]
    fn fresh_read_only_store_writes_nothing() {
        let store = InMemorySlotStore::new();
        let report = open_metadata(&store, &Converter::new(), true).unwrap();
        assert!(!report.persisted);
        assert!(store.read_header().unwrap().is_none());
    }

    #[test]
    fn malformed_header_is_an_error() {
        let store = InMemorySlotStore::new();
        store.write_header(b"not json").unwrap();
        let err = open_metadata(&store, &Converter::new(), false).unwrap_err();
        assert!(matches!(err, ConvertError::Metadata(_)));
    }
}
