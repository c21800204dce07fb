//! CSV implementations of the output traits

use crate::{FieldMap, RepositoryRecord};
use csv::{ReaderBuilder, Writer, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{EntityStore, OutputError, OutputResult, RepositorySink};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// One derived field value in long format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DerivedFieldRow {
    entity_id: u64,
    field: String,
    value: String,
    updated_at: String,
}

/// Open `path` for appending, reporting whether a header is still needed
fn open_append(path: &Path) -> OutputResult<(Writer<BufWriter<File>>, bool)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
    }
    let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;
    let writer = WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file));
    Ok((writer, needs_header))
}

fn sync_writer(writer: &mut Writer<BufWriter<File>>) -> OutputResult<()> {
    writer
        .flush()
        .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;
    writer
        .get_ref()
        .get_ref()
        .sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))
}

/// Entity store appending `entity_id,field,value,updated_at` rows.
///
/// Upserts are staged in memory and only reach the file on [`commit`],
/// so an uncommitted batch leaves no trace. Readers take the last row per
/// `(entity_id, field)`, which makes replays after a crash harmless.
///
/// [`commit`]: EntityStore::commit
pub struct CsvEntityStore {
    path: PathBuf,
    writer: Writer<BufWriter<File>>,
    staged: Vec<DerivedFieldRow>,
    rows_committed: u64,
}

impl CsvEntityStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (writer, fresh) = open_append(&path)?;
        info!(path = %path.display(), fresh = fresh, "Opened CSV entity store");
        Ok(Self {
            path,
            writer,
            staged: Vec::new(),
            rows_committed: 0,
        })
    }

    /// Store location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows made durable by this handle
    pub fn rows_committed(&self) -> u64 {
        self.rows_committed
    }

    /// Latest value of every field per entity
    pub fn load_latest<P: AsRef<Path>>(path: P) -> OutputResult<BTreeMap<u64, FieldMap>> {
        let mut latest: BTreeMap<u64, FieldMap> = BTreeMap::new();
        let path = path.as_ref();
        if !path.exists() {
            return Ok(latest);
        }
        let mut reader = ReaderBuilder::new()
            .from_path(path)
            .map_err(|e| OutputError::CsvError(e.to_string()))?;
        for row in reader.deserialize::<DerivedFieldRow>() {
            let row = row.map_err(|e| OutputError::CsvError(e.to_string()))?;
            let value = match serde_json::from_str(&row.value) {
                Ok(value) => value,
                Err(_) => serde_json::Value::String(row.value.clone()),
            };
            latest.entry(row.entity_id).or_default().insert(row.field, value);
        }
        Ok(latest)
    }
}

impl EntityStore for CsvEntityStore {
    fn upsert_derived_fields(&mut self, entity_id: u64, fields: &FieldMap) -> OutputResult<()> {
        let updated_at = chrono::Utc::now().to_rfc3339();
        for (field, value) in fields {
            self.staged.push(DerivedFieldRow {
                entity_id,
                field: field.clone(),
                value: value.to_string(),
                updated_at: updated_at.clone(),
            });
        }
        Ok(())
    }

    fn commit(&mut self) -> OutputResult<()> {
        for row in &self.staged {
            self.writer
                .serialize(row)
                .map_err(|e| OutputError::CsvError(format!("Failed to write row: {}", e)))?;
        }
        sync_writer(&mut self.writer)?;
        self.rows_committed += self.staged.len() as u64;
        debug!(rows = self.staged.len(), total = self.rows_committed, "Committed derived fields");
        self.staged.clear();
        Ok(())
    }
}

/// CSV row for a collected repository
#[derive(Debug, Serialize, Deserialize)]
struct RepositoryRow {
    id: u64,
    full_name: String,
    owner: String,
    name: String,
    created_at: String,
    stargazers_count: u64,
    forks_count: u64,
    language: String,
    html_url: String,
    #[serde(default)]
    owner_id: Option<u64>,
    #[serde(default)]
    owner_type: String,
}

impl From<&RepositoryRecord> for RepositoryRow {
    fn from(record: &RepositoryRecord) -> Self {
        Self {
            id: record.id,
            full_name: record.full_name.clone(),
            owner: record.owner.clone(),
            name: record.name.clone(),
            created_at: record.created_at.to_rfc3339(),
            stargazers_count: record.stargazers_count,
            forks_count: record.forks_count,
            language: record.language.clone().unwrap_or_default(),
            html_url: record.html_url.clone(),
            owner_id: record.owner_id,
            owner_type: record.owner_type.clone().unwrap_or_default(),
        }
    }
}

/// Repository sink appending to a CSV file, skipping ids already written
pub struct CsvRepositorySink {
    writer: Writer<BufWriter<File>>,
    staged: Vec<RepositoryRow>,
    /// Ids already in the file, for deduplicating replayed periods
    seen_ids: HashSet<u64>,
    written: u64,
    duplicates_skipped: u64,
}

impl CsvRepositorySink {
    /// Open or create the sink at `path`, loading ids already present
    pub fn open<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        let mut seen_ids = HashSet::new();
        if path.exists() {
            // Files written before the owner columns existed are still readable
            let mut reader = ReaderBuilder::new()
                .flexible(true)
                .from_path(path)
                .map_err(|e| OutputError::CsvError(e.to_string()))?;
            for row in reader.deserialize::<RepositoryRow>() {
                let row = row.map_err(|e| OutputError::CsvError(e.to_string()))?;
                seen_ids.insert(row.id);
            }
        }
        let (writer, _) = open_append(path)?;
        info!(path = %path.display(), existing = seen_ids.len(), "Opened repository sink");
        Ok(Self {
            writer,
            staged: Vec::new(),
            seen_ids,
            written: 0,
            duplicates_skipped: 0,
        })
    }

    /// Repositories made durable by this handle
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Replayed repositories ignored
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped
    }
}

impl RepositorySink for CsvRepositorySink {
    fn write_repository(&mut self, record: &RepositoryRecord) -> OutputResult<()> {
        if !self.seen_ids.insert(record.id) {
            self.duplicates_skipped += 1;
            debug!(id = record.id, "Skipping duplicate repository");
            return Ok(());
        }
        self.staged.push(RepositoryRow::from(record));
        Ok(())
    }

    fn commit(&mut self) -> OutputResult<()> {
        for row in &self.staged {
            self.writer
                .serialize(row)
                .map_err(|e| OutputError::CsvError(format!("Failed to write repository: {}", e)))?;
        }
        sync_writer(&mut self.writer)?;
        self.written += self.staged.len() as u64;
        self.staged.clear();
        Ok(())
    }
}

/// One row of a population file: `id,owner,name[,missing]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PopulationRecord {
    /// Entity id
    pub id: u64,
    /// Owner login
    pub owner: String,
    /// Repository name
    pub name: String,
    /// `;`-separated derived fields still missing; empty means all
    #[serde(default)]
    pub missing: String,
}

/// Read a population CSV
pub fn read_population<P: AsRef<Path>>(path: P) -> OutputResult<Vec<PopulationRecord>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| OutputError::CsvError(format!("Failed to open {}: {}", path.display(), e)))?;
    let records = reader
        .deserialize::<PopulationRecord>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OutputError::CsvError(e.to_string()))?;
    info!(path = %path.display(), records = records.len(), "Loaded population");
    Ok(records)
}

/// One row of a location file: `id,location`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationRecord {
    /// Entity id (user or organisation)
    pub id: u64,
    /// Free-text profile location
    #[serde(default)]
    pub location: String,
}

/// Read a location CSV, skipping rows with a blank location
pub fn read_locations<P: AsRef<Path>>(path: P) -> OutputResult<Vec<LocationRecord>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| OutputError::CsvError(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut records = Vec::new();
    for row in reader.deserialize::<LocationRecord>() {
        let row = row.map_err(|e| OutputError::CsvError(e.to_string()))?;
        if !row.location.is_empty() {
            records.push(row);
        }
    }
    info!(path = %path.display(), records = records.len(), "Loaded locations");
    Ok(records)
}

/// Locations held by an entity store, such as fetched owner profiles.
///
/// Entities whose latest `location` field is blank or not text are skipped.
pub fn read_store_locations<P: AsRef<Path>>(path: P) -> OutputResult<Vec<LocationRecord>> {
    let path = path.as_ref();
    let records: Vec<LocationRecord> = CsvEntityStore::load_latest(path)?
        .into_iter()
        .filter_map(|(id, fields)| {
            let location = fields.get("location")?.as_str()?.trim();
            (!location.is_empty()).then(|| LocationRecord {
                id,
                location: location.to_string(),
            })
        })
        .collect();
    info!(path = %path.display(), records = records.len(), "Loaded stored locations");
    Ok(records)
}

/// Owner of a collected repository
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OwnerRecord {
    /// Owner account id
    pub owner_id: u64,
    /// Owner login
    pub owner: String,
    /// `User` or `Organization`
    #[serde(default)]
    pub owner_type: String,
}

#[derive(Deserialize)]
struct OwnerColumns {
    owner: String,
    #[serde(default)]
    owner_id: Option<u64>,
    #[serde(default)]
    owner_type: String,
}

/// Distinct owners of a repository CSV, in first-seen order.
///
/// Rows without an owner id carry nothing to fetch and are skipped.
pub fn read_owners<P: AsRef<Path>>(path: P) -> OutputResult<Vec<OwnerRecord>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| OutputError::CsvError(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut without_id = 0u64;
    for row in reader.deserialize::<OwnerColumns>() {
        let row = row.map_err(|e| OutputError::CsvError(e.to_string()))?;
        let Some(owner_id) = row.owner_id else {
            without_id += 1;
            continue;
        };
        if seen.insert(owner_id) {
            records.push(OwnerRecord {
                owner_id,
                owner: row.owner,
                owner_type: row.owner_type,
            });
        }
    }
    info!(
        path = %path.display(),
        owners = records.len(),
        without_id = without_id,
        "Loaded repository owners"
    );
    Ok(records)
}
