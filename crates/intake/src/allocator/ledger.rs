//! Per-role assignment ledger and its on-disk form.

use nodegate_common::AddressBlock;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use super::AllocError;
use super::pool::PoolSpec;

/// Mapping of node name to its assigned block.
///
/// Serializes as a JSON object whose keys are ordered by subnet network
/// address, whatever order entries were inserted in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeMap<String, AddressBlock>,
}

/// Result of [`Ledger::assign`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub block: AddressBlock,
    /// False when the node already had this block
    pub created: bool,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AddressBlock> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries ordered by subnet address
    pub fn sorted(&self) -> Vec<(&String, &AddressBlock)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|(an, a), (bn, b)| {
            (u32::from(a.cidr.network()), a.cidr.prefix_len(), *an)
                .cmp(&(u32::from(b.cidr.network()), b.cidr.prefix_len(), *bn))
        });
        entries
    }

    /// Return the node's existing block, or carve the next free subnet out
    /// of `pool` and record it.
    ///
    /// The ledger is unchanged when an error is returned.
    pub fn assign(
        &mut self,
        pool: &PoolSpec,
        name: &str,
        globalip: Ipv4Addr,
    ) -> Result<Assignment, AllocError> {
        if let Some(existing) = self.entries.get(name) {
            return Ok(Assignment {
                block: existing.clone(),
                created: false,
            });
        }

        let cidr = pool
            .next_free(self.entries.values().map(|b| &b.cidr))
            .ok_or(AllocError::PoolExhausted {
                role: pool.role,
                pool: pool.base,
            })?;

        let block = AddressBlock {
            role: pool.role,
            name: name.to_string(),
            globalip,
            cidr,
            clasterip: pool.cluster_address(&cidr),
        };
        self.entries.insert(name.to_string(), block.clone());

        Ok(Assignment {
            block,
            created: true,
        })
    }

    /// Drop a node's entry
    pub fn release(&mut self, name: &str) -> Option<AddressBlock> {
        self.entries.remove(name)
    }

    /// Pretty JSON with 4-space indentation
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        // serde_json only emits valid UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Serialize for Ledger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sorted = self.sorted();
        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for (name, block) in sorted {
            map.serialize_entry(name, block)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Ledger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<String, AddressBlock>::deserialize(deserializer)?;
        Ok(Self { entries })
    }
}

/// A ledger file on disk
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
}

impl LedgerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger.
    ///
    /// A missing, unreadable, or corrupt file yields an empty ledger. A
    /// corrupt file is moved aside first so the next save does not destroy
    /// its contents.
    pub async fn load(&self) -> Ledger {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ledger::new(),
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Ledger unreadable, treating as empty");
                return Ledger::new();
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ledger::new();
        }

        match serde_json::from_slice::<Ledger>(&data) {
            Ok(ledger) => ledger,
            Err(e) => {
                let aside = self.quarantine_path();
                match tokio::fs::rename(&self.path, &aside).await {
                    Ok(()) => tracing::warn!(
                        path = ?self.path,
                        moved_to = ?aside,
                        error = %e,
                        "Ledger corrupt, treating as empty"
                    ),
                    Err(rename_err) => tracing::warn!(
                        path = ?self.path,
                        error = %e,
                        rename_error = %rename_err,
                        "Ledger corrupt and could not be moved aside, treating as empty"
                    ),
                }
                Ledger::new()
            }
        }
    }

    /// Write the ledger atomically (temp file + rename)
    pub async fn save(&self, ledger: &Ledger) -> Result<(), AllocError> {
        let json = ledger.to_json_pretty()?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| AllocError::Persist {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| AllocError::Persist {
                path: tmp.clone(),
                source,
            })?;

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| AllocError::Persist {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(path = ?self.path, entries = ledger.len(), "Ledger saved");
        Ok(())
    }

    fn quarantine_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".corrupt-{}", stamp));
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::Ipv4Net;
    use nodegate_common::Role;

    fn block(name: &str, cidr: &str) -> AddressBlock {
        let cidr: Ipv4Net = cidr.parse().unwrap();
        AddressBlock {
            role: Role::Worker,
            name: name.to_string(),
            globalip: Ipv4Addr::new(203, 0, 113, 5),
            cidr,
            clasterip: cidr.network(),
        }
    }

    #[test]
    fn test_serialized_order_follows_subnets() {
        let mut ledger = Ledger::new();
        ledger.entries.insert("z".into(), block("z", "10.244.3.0/24"));
        ledger.entries.insert("a".into(), block("a", "10.244.1.0/24"));
        ledger.entries.insert("m".into(), block("m", "10.244.10.0/24"));
        ledger.entries.insert("b".into(), block("b", "10.244.2.0/24"));

        let json = ledger.to_json_pretty().unwrap();
        let pos = |key: &str| json.find(&format!("\"{}\": {{", key)).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("z"));
        assert!(pos("z") < pos("m"));
        assert!(json.contains("\n    \"a\": {"));
    }

    #[test]
    fn test_assign_is_idempotent() {
        let pool = PoolSpec::default_for(Role::Worker);
        let mut ledger = Ledger::new();
        let ip = Ipv4Addr::new(203, 0, 113, 5);

        let first = ledger.assign(&pool, "node-a", ip).unwrap();
        let second = ledger.assign(&pool, "node-a", ip).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.block, second.block);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_contains_tracks_assign_and_release() {
        let pool = PoolSpec::default_for(Role::Worker);
        let mut ledger = Ledger::new();
        ledger.assign(&pool, "w1", Ipv4Addr::new(203, 0, 113, 5)).unwrap();

        assert!(ledger.contains("w1"));
        assert!(!ledger.contains("w2"));
        assert!(ledger.release("w1").is_some());
        assert!(!ledger.contains("w1"));
    }

    #[test]
    fn test_exhaustion_leaves_ledger_untouched() {
        let pool = PoolSpec::new(Role::Worker, "10.244.1.0/24".parse().unwrap(), 25, false, None).unwrap();
        let mut ledger = Ledger::new();
        let ip = Ipv4Addr::new(203, 0, 113, 5);
        ledger.assign(&pool, "w1", ip).unwrap();
        ledger.assign(&pool, "w2", ip).unwrap();
        let before = ledger.clone();

        let err = ledger.assign(&pool, "w3", ip).unwrap_err();
        assert!(matches!(err, AllocError::PoolExhausted { role: Role::Worker, .. }));
        assert_eq!(ledger, before);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = LedgerFile::new(dir.path().join("worker_map.json"));
        let pool = PoolSpec::default_for(Role::Worker);
        let mut ledger = Ledger::new();
        ledger.assign(&pool, "w1", Ipv4Addr::new(203, 0, 113, 5)).unwrap();

        file.save(&ledger).await.unwrap();
        assert_eq!(file.load().await, ledger);
        assert!(!dir.path().join("worker_map.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = LedgerFile::new(dir.path().join("absent.json"));
        assert!(file.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty_and_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_map.json");
        std::fs::write(&path, "{ not json").unwrap();

        let file = LedgerFile::new(&path);
        assert!(file.load().await.is_empty());
        assert!(!path.exists());

        let moved: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(moved.len(), 1);
    }
}
