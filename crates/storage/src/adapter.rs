//! Typed, read-only data access adapters.
//!
//! Adapters return full, unfiltered snapshots. Privacy filtering is the
//! orchestrator's job; the only gate applied here is the access level on
//! crisis history.

use super::{KeyValueStore, Result, SecureStore, StateStore, StorageClass, StorageError};
use async_trait::async_trait;
use clinexport_core::{
    AccessLevel, AssessmentRecord, CategoryData, CrisisRecord, DataCategory, MoodEntry,
    SessionRecord, Time, TimeRange, UserId,
};
use serde::de::{self, DeserializeOwned, Deserializer as _, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Immutable snapshot of records read from one storage class.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    records: Vec<T>,
    source: StorageClass,
    retrieved_at: Time,
}

impl<T> Snapshot<T> {
    /// Wrap records read from `source`.
    pub fn new(records: Vec<T>, source: StorageClass) -> Self {
        Self {
            records,
            source,
            retrieved_at: chrono::Utc::now(),
        }
    }

    /// The records.
    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Storage class the snapshot came from.
    pub fn source(&self) -> StorageClass {
        self.source
    }

    /// When the snapshot was taken.
    pub fn retrieved_at(&self) -> Time {
        self.retrieved_at
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the records out of the snapshot.
    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

/// Assessment history snapshot.
pub type AssessmentDataResult = Snapshot<AssessmentRecord>;
/// Mood tracking snapshot.
pub type MoodTrackingResult = Snapshot<MoodEntry>;
/// MBCT progress snapshot.
pub type MbctProgressResult = Snapshot<SessionRecord>;
/// Crisis history snapshot.
pub type CrisisHistoryResult = Snapshot<CrisisRecord>;

/// Storage keys used by [`StoreBackedDataSource`].
pub mod keys {
    use clinexport_core::UserId;

    /// Key-value key of a user's assessments.
    pub fn assessments(user: &UserId) -> String {
        format!("assessments/{}", user)
    }

    /// State slice of a user's mood entries.
    pub fn mood(user: &UserId) -> String {
        format!("mood/{}", user)
    }

    /// Key-value key of a user's MBCT sessions.
    pub fn mbct(user: &UserId) -> String {
        format!("mbct/{}", user)
    }

    /// Secure-store key of a user's crisis history.
    pub fn crisis(user: &UserId) -> String {
        format!("crisis/{}", user)
    }
}

/// Read-only access to a user's therapeutic data.
#[async_trait]
pub trait ClinicalDataSource: Send + Sync {
    /// Questionnaire results inside `range`.
    async fn get_assessment_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<AssessmentDataResult>;

    /// Mood check-ins inside `range`.
    async fn get_mood_tracking_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<MoodTrackingResult>;

    /// MBCT sessions inside `range`.
    async fn get_mbct_progress_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<MbctProgressResult>;

    /// Full crisis history, gated by access level.
    async fn get_crisis_assessment_history(
        &self,
        user_id: &UserId,
        access_level: AccessLevel,
    ) -> Result<CrisisHistoryResult>;

    /// All records of one category inside `range`. Crisis history is
    /// restricted to the range as well.
    async fn fetch_category(
        &self,
        user_id: &UserId,
        category: DataCategory,
        range: &TimeRange,
        access_level: AccessLevel,
    ) -> Result<CategoryData> {
        let data = match category {
            DataCategory::Assessments => CategoryData::Assessments(
                self.get_assessment_data(user_id, range).await?.into_records(),
            ),
            DataCategory::MoodTracking => CategoryData::MoodTracking(
                self.get_mood_tracking_data(user_id, range).await?.into_records(),
            ),
            DataCategory::MbctProgress => CategoryData::MbctProgress(
                self.get_mbct_progress_data(user_id, range).await?.into_records(),
            ),
            DataCategory::CrisisSafety => {
                let history = self
                    .get_crisis_assessment_history(user_id, access_level)
                    .await?
                    .into_records();
                CategoryData::CrisisSafety(
                    history
                        .into_iter()
                        .filter(|r| in_range(r.recorded_at, range))
                        .collect(),
                )
            }
        };
        Ok(data)
    }

    /// Record count and serialized size of a category inside `range`,
    /// taken before the records themselves are read.
    async fn estimate_category(
        &self,
        user_id: &UserId,
        category: DataCategory,
        range: &TimeRange,
        access_level: AccessLevel,
    ) -> Result<CategoryEstimate> {
        let data = self
            .fetch_category(user_id, category, range, access_level)
            .await?;
        Ok(CategoryEstimate {
            records: data.len(),
            bytes: serde_json::to_vec(&data)?.len(),
        })
    }

    /// Hand the records of a category inside `range` to `sink` in chunks of
    /// at most `chunk_size`, reading the category once. An error from
    /// `sink` stops the read and is returned.
    async fn stream_category(
        &self,
        user_id: &UserId,
        category: DataCategory,
        range: &TimeRange,
        access_level: AccessLevel,
        chunk_size: usize,
        sink: &mut (dyn FnMut(CategoryData) -> Result<()> + Send),
    ) -> Result<()> {
        let data = self
            .fetch_category(user_id, category, range, access_level)
            .await?;
        for chunk in split(data, chunk_size.max(1)) {
            sink(chunk)?;
        }
        Ok(())
    }
}

/// Size of a category before it is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryEstimate {
    /// Records inside the range
    pub records: usize,
    /// Approximate serialized size of those records
    pub bytes: usize,
}

fn split(data: CategoryData, size: usize) -> Vec<CategoryData> {
    fn chunks<T>(
        records: Vec<T>,
        size: usize,
        wrap: fn(Vec<T>) -> CategoryData,
    ) -> Vec<CategoryData> {
        let mut out = Vec::new();
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            out.push(wrap(records.by_ref().take(size).collect()));
        }
        out
    }
    match data {
        CategoryData::Assessments(r) => chunks(r, size, CategoryData::Assessments),
        CategoryData::MoodTracking(r) => chunks(r, size, CategoryData::MoodTracking),
        CategoryData::MbctProgress(r) => chunks(r, size, CategoryData::MbctProgress),
        CategoryData::CrisisSafety(r) => chunks(r, size, CategoryData::CrisisSafety),
    }
}

/// Records without a timestamp are kept so clinical validation can flag them.
fn in_range(timestamp: Option<Time>, range: &TimeRange) -> bool {
    timestamp.map_or(true, |t| range.contains(t))
}

/// Stored records as read from their storage class, still serialized.
enum StoredBlob {
    Text(String),
    Value(serde_json::Value),
    Bytes(Vec<u8>),
}

impl StoredBlob {
    fn len(&self) -> Result<usize> {
        match self {
            StoredBlob::Text(text) => Ok(text.len()),
            StoredBlob::Bytes(bytes) => Ok(bytes.len()),
            StoredBlob::Value(value) => {
                let mut count = ByteCount(0);
                serde_json::to_writer(&mut count, value)?;
                Ok(count.0)
            }
        }
    }

    fn read<'de, V: Visitor<'de>>(&'de self, visitor: V) -> serde_json::Result<V::Value> {
        match self {
            StoredBlob::Text(text) => {
                let mut de = serde_json::Deserializer::from_str(text);
                let out = de.deserialize_seq(visitor)?;
                de.end()?;
                Ok(out)
            }
            StoredBlob::Bytes(bytes) => {
                let mut de = serde_json::Deserializer::from_slice(bytes);
                let out = de.deserialize_seq(visitor)?;
                de.end()?;
                Ok(out)
            }
            StoredBlob::Value(value) => value.deserialize_seq(visitor),
        }
    }
}

struct ByteCount(usize);

impl std::io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Timestamp of a stored record; every other field is skipped.
#[derive(Deserialize)]
struct Stamp {
    #[serde(default, alias = "completed_at", alias = "started_at")]
    recorded_at: Option<Time>,
}

/// Counts records, returning (inside range, total).
struct CountVisitor<'a> {
    range: &'a TimeRange,
}

impl<'de> Visitor<'de> for CountVisitor<'_> {
    type Value = (usize, usize);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of records")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let (mut inside, mut total) = (0, 0);
        while let Some(stamp) = seq.next_element::<Stamp>()? {
            total += 1;
            if in_range(stamp.recorded_at, self.range) {
                inside += 1;
            }
        }
        Ok((inside, total))
    }
}

/// Deserializes records one at a time and hands in-range ones to the sink
/// in chunks.
struct ChunkVisitor<'a, T> {
    range: &'a TimeRange,
    chunk_size: usize,
    stamp: fn(&T) -> Option<Time>,
    wrap: fn(Vec<T>) -> CategoryData,
    sink: &'a mut (dyn FnMut(CategoryData) -> Result<()> + Send),
    stopped: &'a mut Option<StorageError>,
}

impl<'a, T> ChunkVisitor<'a, T> {
    fn emit(&mut self, chunk: Vec<T>) -> bool {
        match (self.sink)((self.wrap)(chunk)) {
            Ok(()) => true,
            Err(e) => {
                *self.stopped = Some(e);
                false
            }
        }
    }
}

impl<'de, T: Deserialize<'de>> Visitor<'de> for ChunkVisitor<'_, T> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of records")
    }

    fn visit_seq<A: SeqAccess<'de>>(mut self, mut seq: A) -> std::result::Result<(), A::Error> {
        let size = self.chunk_size.max(1);
        let mut chunk = Vec::with_capacity(size);
        while let Some(record) = seq.next_element::<T>()? {
            if !in_range((self.stamp)(&record), self.range) {
                continue;
            }
            chunk.push(record);
            if chunk.len() >= size && !self.emit(std::mem::take(&mut chunk)) {
                return Err(de::Error::custom("read stopped by consumer"));
            }
        }
        if !chunk.is_empty() && !self.emit(chunk) {
            return Err(de::Error::custom("read stopped by consumer"));
        }
        Ok(())
    }
}

fn check_crisis_access(access_level: AccessLevel) -> Result<()> {
    if access_level < AccessLevel::Clinical {
        return Err(StorageError::AccessDenied {
            resource: "crisis history".to_string(),
            presented: access_level,
        });
    }
    Ok(())
}

/// Data source over the three storage classes:
/// assessments and MBCT sessions in the key-value store, mood entries in the
/// state store, crisis history in the secure store.
pub struct StoreBackedDataSource {
    kv: Arc<dyn KeyValueStore>,
    state: Arc<dyn StateStore>,
    secure: Arc<dyn SecureStore>,
}

impl StoreBackedDataSource {
    /// Create a data source over the given stores.
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        state: Arc<dyn StateStore>,
        secure: Arc<dyn SecureStore>,
    ) -> Self {
        Self { kv, state, secure }
    }

    async fn read_kv<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.kv.get_item(key).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn read_blob(
        &self,
        user_id: &UserId,
        category: DataCategory,
        access_level: AccessLevel,
    ) -> Result<Option<StoredBlob>> {
        let blob = match category {
            DataCategory::Assessments => self
                .kv
                .get_item(&keys::assessments(user_id))
                .await?
                .map(StoredBlob::Text),
            DataCategory::MbctProgress => {
                self.kv.get_item(&keys::mbct(user_id)).await?.map(StoredBlob::Text)
            }
            DataCategory::MoodTracking => self
                .state
                .get_slice(&keys::mood(user_id))
                .await?
                .map(StoredBlob::Value),
            DataCategory::CrisisSafety => {
                check_crisis_access(access_level)?;
                self.secure
                    .get_secure_item(&keys::crisis(user_id))
                    .await?
                    .map(StoredBlob::Bytes)
            }
        };
        Ok(blob)
    }
}

#[async_trait]
impl ClinicalDataSource for StoreBackedDataSource {
    async fn get_assessment_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<AssessmentDataResult> {
        let records: Vec<AssessmentRecord> = self.read_kv(&keys::assessments(user_id)).await?;
        let records: Vec<_> = records
            .into_iter()
            .filter(|r| in_range(r.completed_at, range))
            .collect();
        debug!("Read {} assessment records", records.len());
        Ok(Snapshot::new(records, StorageClass::KeyValue))
    }

    async fn get_mood_tracking_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<MoodTrackingResult> {
        let records: Vec<MoodEntry> = match self.state.get_slice(&keys::mood(user_id)).await? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };
        let records: Vec<_> = records
            .into_iter()
            .filter(|r| in_range(r.recorded_at, range))
            .collect();
        debug!("Read {} mood entries", records.len());
        Ok(Snapshot::new(records, StorageClass::State))
    }

    async fn get_mbct_progress_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<MbctProgressResult> {
        let records: Vec<SessionRecord> = self.read_kv(&keys::mbct(user_id)).await?;
        let records: Vec<_> = records
            .into_iter()
            .filter(|r| in_range(r.started_at, range))
            .collect();
        debug!("Read {} MBCT session records", records.len());
        Ok(Snapshot::new(records, StorageClass::KeyValue))
    }

    async fn get_crisis_assessment_history(
        &self,
        user_id: &UserId,
        access_level: AccessLevel,
    ) -> Result<CrisisHistoryResult> {
        check_crisis_access(access_level)?;
        let records: Vec<CrisisRecord> =
            match self.secure.get_secure_item(&keys::crisis(user_id)).await? {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => Vec::new(),
            };
        debug!("Read {} crisis records", records.len());
        Ok(Snapshot::new(records, StorageClass::Secure))
    }

    /// Counts timestamps only; the size is the blob's share for the
    /// in-range records.
    async fn estimate_category(
        &self,
        user_id: &UserId,
        category: DataCategory,
        range: &TimeRange,
        access_level: AccessLevel,
    ) -> Result<CategoryEstimate> {
        let Some(blob) = self.read_blob(user_id, category, access_level).await? else {
            return Ok(CategoryEstimate::default());
        };
        let (inside, total) = blob.read(CountVisitor { range })?;
        let bytes = if total == 0 {
            0
        } else {
            blob.len()?.saturating_mul(inside).div_ceil(total)
        };
        debug!(
            "Estimated {}: {} of {} records, ~{} bytes",
            category, inside, total, bytes
        );
        Ok(CategoryEstimate {
            records: inside,
            bytes,
        })
    }

    async fn stream_category(
        &self,
        user_id: &UserId,
        category: DataCategory,
        range: &TimeRange,
        access_level: AccessLevel,
        chunk_size: usize,
        sink: &mut (dyn FnMut(CategoryData) -> Result<()> + Send),
    ) -> Result<()> {
        let Some(blob) = self.read_blob(user_id, category, access_level).await? else {
            return Ok(());
        };
        let mut stopped = None;
        let read = match category {
            DataCategory::Assessments => blob.read(ChunkVisitor::<AssessmentRecord> {
                range,
                chunk_size,
                stamp: |r| r.completed_at,
                wrap: CategoryData::Assessments,
                sink,
                stopped: &mut stopped,
            }),
            DataCategory::MoodTracking => blob.read(ChunkVisitor::<MoodEntry> {
                range,
                chunk_size,
                stamp: |r| r.recorded_at,
                wrap: CategoryData::MoodTracking,
                sink,
                stopped: &mut stopped,
            }),
            DataCategory::MbctProgress => blob.read(ChunkVisitor::<SessionRecord> {
                range,
                chunk_size,
                stamp: |r| r.started_at,
                wrap: CategoryData::MbctProgress,
                sink,
                stopped: &mut stopped,
            }),
            DataCategory::CrisisSafety => blob.read(ChunkVisitor::<CrisisRecord> {
                range,
                chunk_size,
                stamp: |r| r.recorded_at,
                wrap: CategoryData::CrisisSafety,
                sink,
                stopped: &mut stopped,
            }),
        };
        if let Some(e) = stopped {
            return Err(e);
        }
        read?;
        debug!("Streamed {} in chunks of {}", category, chunk_size);
        Ok(())
    }
}
