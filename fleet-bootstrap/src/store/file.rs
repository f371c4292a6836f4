// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A store kept as JSON documents in a directory.
//!
//! ```text
//! <root>/nodes/<node>.json
//!     {"provision": {..}, "run_by_fleet_bootstrap": true, ..}
//! <root>/data_bags/cluster_flags/<cluster>.json
//!     {"abort": false, ..}
//! ```

use super::{
    check_key, AbortSignalStore, ServiceRegistry, StateStore, StoreError,
};
use crate::record::NodeProvisionRecord;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

const NODES_DIR: &str = "nodes";
const DATA_BAGS_DIR: &str = "data_bags";
const FLAGS_BAG: &str = "cluster_flags";
const PROVISION_KEY: &str = "provision";
const ABORT_KEY: &str = "abort";
const RUN_FLAG_KEY: &str = "run_by_fleet_bootstrap";
const SERVICE_REGISTRY_KEY: &str = "service_registry";

type Document = Map<String, Value>;

#[derive(Debug)]
pub struct FileStore {
    root: Utf8PathBuf,
    // Serializes read-modify-write of documents within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        FileStore { root: root.into(), write_lock: Mutex::new(()) }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn node_path(&self, node: &str) -> Result<Utf8PathBuf, StoreError> {
        let node = check_key(node)?;
        Ok(self.root.join(NODES_DIR).join(format!("{node}.json")))
    }

    fn flag_path(&self, cluster: &str) -> Result<Utf8PathBuf, StoreError> {
        let cluster = check_key(cluster)?;
        Ok(self
            .root
            .join(DATA_BAGS_DIR)
            .join(FLAGS_BAG)
            .join(format!("{cluster}.json")))
    }

    /// Update one key of a document, creating the document if needed.
    async fn update_key(
        &self,
        path: &Utf8Path,
        key: &str,
        value: Option<Value>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = read_document(path).await?.unwrap_or_default();
        match value {
            Some(value) => {
                doc.insert(key.to_string(), value);
            }
            None => {
                if doc.remove(key).is_none() {
                    return Ok(());
                }
            }
        }
        write_document(path, &doc).await
    }
}

async fn read_document(
    path: &Utf8Path,
) -> Result<Option<Document>, StoreError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None);
        }
        Err(error) => {
            return Err(StoreError::Io { error, path: path.to_owned() });
        }
    };
    match serde_json::from_slice(&data) {
        Ok(Value::Object(doc)) => Ok(Some(doc)),
        Ok(_) => Err(StoreError::NotAnObject { path: path.to_owned() }),
        Err(error) => Err(StoreError::Parse { error, path: path.to_owned() }),
    }
}

async fn write_document(
    path: &Utf8Path,
    doc: &Document,
) -> Result<(), StoreError> {
    let io_err =
        |error, path: &Utf8Path| StoreError::Io { error, path: path.to_owned() };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| io_err(error, parent))?;
    }
    let data = serde_json::to_vec_pretty(doc)
        .map_err(|error| StoreError::Parse { error, path: path.to_owned() })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data).await.map_err(|error| io_err(error, &tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(|error| io_err(error, path))
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(
        &self,
        node: &str,
    ) -> Result<Option<NodeProvisionRecord>, StoreError> {
        let path = self.node_path(node)?;
        let Some(mut doc) = read_document(&path).await? else {
            return Ok(None);
        };
        match doc.remove(PROVISION_KEY) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|error| StoreError::Parse { error, path }),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        node: &str,
        record: &NodeProvisionRecord,
    ) -> Result<(), StoreError> {
        let path = self.node_path(node)?;
        let value = serde_json::to_value(record).map_err(|error| {
            StoreError::Parse { error, path: path.clone() }
        })?;
        self.update_key(&path, PROVISION_KEY, Some(value)).await
    }

    async fn set_run_flag(
        &self,
        node: &str,
        driven: bool,
    ) -> Result<(), StoreError> {
        let path = self.node_path(node)?;
        self.update_key(&path, RUN_FLAG_KEY, Some(Value::Bool(driven))).await
    }
}

#[async_trait]
impl AbortSignalStore for FileStore {
    async fn set_abort(
        &self,
        cluster: &str,
        abort: bool,
    ) -> Result<(), StoreError> {
        let path = self.flag_path(cluster)?;
        self.update_key(&path, ABORT_KEY, Some(Value::Bool(abort))).await
    }

    async fn get_abort(
        &self,
        cluster: &str,
    ) -> Result<Option<bool>, StoreError> {
        let path = self.flag_path(cluster)?;
        let doc = read_document(&path).await?;
        Ok(doc.and_then(|doc| doc.get(ABORT_KEY).and_then(Value::as_bool)))
    }
}

#[async_trait]
impl ServiceRegistry for FileStore {
    async fn clear_entries(&self, nodes: &[String]) -> Result<(), StoreError> {
        for node in nodes {
            let path = self.node_path(node)?;
            self.update_key(&path, SERVICE_REGISTRY_KEY, None).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::ProvisionStatus;
    use camino_tempfile::Utf8TempDir;
    use serde_json::json;

    #[tokio::test]
    async fn save_keeps_rest_of_node_document() {
        let dir = Utf8TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let path = dir.path().join("nodes/hadoop-master-0.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            json!({
                "run_list": ["role[hadoop_namenode]"],
                "service_registry": {"namenode": "10.0.0.10:8020"},
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(store.load("hadoop-master-0").await.unwrap(), None);

        let mut record = NodeProvisionRecord::default();
        record.start_bootstrap();
        store.save("hadoop-master-0", &record).await.unwrap();
        assert_eq!(
            store.load("hadoop-master-0").await.unwrap(),
            Some(record.clone())
        );

        store
            .clear_entries(&["hadoop-master-0".to_string()])
            .await
            .unwrap();
        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
                .unwrap();
        assert_eq!(doc["run_list"], json!(["role[hadoop_namenode]"]));
        assert_eq!(doc["provision"]["status"], json!("VM Ready"));
        assert!(doc.get("run_by_fleet_bootstrap").is_none());
        assert!(doc.get("service_registry").is_none());
        assert!(!dir.path().join("nodes/hadoop-master-0.json.tmp").exists());

        assert_eq!(store.load("hadoop-worker-9").await.unwrap(), None);
        record.mark_bootstrap_failed("boom".to_string());
        store.save("hadoop-worker-9", &record).await.unwrap();
        let loaded = store.load("hadoop-worker-9").await.unwrap().unwrap();
        assert_eq!(loaded.status, ProvisionStatus::BootstrapFailed);
        assert_eq!(loaded.error_msg, "boom");
    }

    #[tokio::test]
    async fn run_flag_merges_into_node_document() {
        let dir = Utf8TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let mut record = NodeProvisionRecord::default();
        record.start_bootstrap();
        store.save("hadoop-worker-0", &record).await.unwrap();

        store.set_run_flag("hadoop-worker-0", true).await.unwrap();
        let path = dir.path().join("nodes/hadoop-worker-0.json");
        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
                .unwrap();
        assert_eq!(doc["run_by_fleet_bootstrap"], json!(true));
        assert_eq!(
            store.load("hadoop-worker-0").await.unwrap(),
            Some(record)
        );

        store.set_run_flag("hadoop-worker-0", false).await.unwrap();
        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
                .unwrap();
        assert_eq!(doc["run_by_fleet_bootstrap"], json!(false));
        assert!(matches!(
            store.set_run_flag("../x", true).await,
            Err(StoreError::BadKey(_))
        ));
    }

    #[tokio::test]
    async fn abort_flag_merges_into_bag_item() {
        let dir = Utf8TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.get_abort("hadoop").await.unwrap(), None);

        let path = dir.path().join("data_bags/cluster_flags/hadoop.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"id": "hadoop", "owner": "ops"}"#).unwrap();

        store.set_abort("hadoop", true).await.unwrap();
        assert_eq!(store.get_abort("hadoop").await.unwrap(), Some(true));
        store.set_abort("hadoop", false).await.unwrap();
        assert_eq!(store.get_abort("hadoop").await.unwrap(), Some(false));

        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
                .unwrap();
        assert_eq!(
            doc,
            json!({"id": "hadoop", "owner": "ops", "abort": false})
        );
    }

    #[tokio::test]
    async fn rejects_keys_that_escape_the_store() {
        let dir = Utf8TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::BadKey(_)));
        let err = store.set_abort("", true).await.unwrap_err();
        assert!(matches!(err, StoreError::BadKey(_)));

        std::fs::create_dir_all(dir.path().join("nodes")).unwrap();
        std::fs::write(dir.path().join("nodes/bad-node-0.json"), "[1, 2]")
            .unwrap();
        let err = store.load("bad-node-0").await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnObject { .. }));
    }
}
