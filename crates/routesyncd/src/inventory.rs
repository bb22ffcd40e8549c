//! JSON inventory file backend.
//!
//! A single document holds routers, allow-lists and nodes:
//!
//! ```json
//! {
//!   "routers": { "router-1": { "routes": [{"destination": "10.244.1.0/24", "nexthop": "10.0.0.11"}], "revision": 4 } },
//!   "allow_lists": { "sg-nodes": { "cidrs": ["10.0.0.0/16"], "revision": 1 } },
//!   "nodes": [{ "name": "node-a", "addresses": [{"type": "InternalIP", "address": "10.0.0.11"}] }]
//! }
//! ```
//!
//! Replaces enforce the same revision rule as a live control plane. Each
//! load-check-store cycle holds an exclusive `flock` on `<file>.lock`, so
//! separate processes sharing one inventory serialize their writes. The
//! file is rewritten through a uniquely named temporary sibling and a
//! rename.

use async_trait::async_trait;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{GatewayError, ResourceKind};
use crate::gateway::{AllowListGateway, NodeDirectory, RouterGateway};
use crate::types::{AllowList, Node, RouterRouteList};

/// On-disk document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDocument {
    #[serde(default)]
    pub routers: BTreeMap<String, RouterRouteList>,
    #[serde(default)]
    pub allow_lists: BTreeMap<String, AllowList>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Gateway and node directory backed by an inventory file.
#[derive(Debug)]
pub struct FileInventory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Reads and parses the whole document.
    pub async fn load(&self) -> Result<InventoryDocument, GatewayError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            GatewayError::transport(format!("read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            GatewayError::transport(format!("parse {}: {}", self.path.display(), e))
        })
    }

    /// Writes the whole document, replacing the file atomically.
    ///
    /// Does not take the inventory lock; use it to seed a file nobody else
    /// is writing yet.
    pub async fn store(&self, doc: &InventoryDocument) -> Result<(), GatewayError> {
        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| GatewayError::transport(format!("serialize inventory: {}", e)))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, content.as_bytes()))
            .await
            .map_err(|e| GatewayError::transport(format!("store task: {}", e)))?
    }

    /// Applies `edit` to the loaded document and stores the result. Other
    /// replaces, from this handle or from another process, are held off in
    /// between.
    async fn update<F>(&self, edit: F) -> Result<(), GatewayError>
    where
        F: FnOnce(&mut InventoryDocument) -> Result<(), GatewayError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_exclusive().await?;
        let mut doc = self.load().await?;
        edit(&mut doc)?;
        self.store(&doc).await
    }

    fn lock_path(&self) -> PathBuf {
        let mut lock = self.path.clone().into_os_string();
        lock.push(".lock");
        PathBuf::from(lock)
    }

    /// Blocks until the advisory lock on `<file>.lock` is ours. Released
    /// when the returned guard is dropped.
    async fn lock_exclusive(&self) -> Result<Flock<File>, GatewayError> {
        let path = self.lock_path();
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| GatewayError::transport(format!("open {}: {}", path.display(), e)))?;
            Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
                GatewayError::transport(format!("lock {}: {}", path.display(), errno))
            })
        })
        .await
        .map_err(|e| GatewayError::transport(format!("lock task: {}", e)))?
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), GatewayError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
        GatewayError::transport(format!("create temp in {}: {}", dir.display(), e))
    })?;
    tmp.write_all(content)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| GatewayError::transport(format!("write {}: {}", tmp.path().display(), e)))?;
    tmp.persist(path).map_err(|e| {
        GatewayError::transport(format!("rename to {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

#[async_trait]
impl RouterGateway for FileInventory {
    async fn fetch_routes(&self, router_id: &str) -> Result<RouterRouteList, GatewayError> {
        self.load()
            .await?
            .routers
            .remove(router_id)
            .ok_or_else(|| GatewayError::not_found(ResourceKind::Router, router_id))
    }

    #[instrument(
        skip(self, routes),
        fields(path = %self.path.display(), revision = %routes.revision)
    )]
    async fn replace_routes(
        &self,
        router_id: &str,
        routes: RouterRouteList,
    ) -> Result<(), GatewayError> {
        self.update(|doc| {
            let stored = doc
                .routers
                .get_mut(router_id)
                .ok_or_else(|| GatewayError::not_found(ResourceKind::Router, router_id))?;
            if stored.revision != routes.revision {
                return Err(GatewayError::conflict(ResourceKind::Router, router_id));
            }
            stored.routes = routes.routes;
            stored.revision = stored.revision.next();
            Ok(())
        })
        .await?;
        debug!("Stored route list");
        Ok(())
    }
}

#[async_trait]
impl AllowListGateway for FileInventory {
    async fn fetch_allow_list(&self, list_id: &str) -> Result<AllowList, GatewayError> {
        self.load()
            .await?
            .allow_lists
            .remove(list_id)
            .ok_or_else(|| GatewayError::not_found(ResourceKind::AllowList, list_id))
    }

    async fn replace_allow_list(
        &self,
        list_id: &str,
        list: AllowList,
    ) -> Result<(), GatewayError> {
        self.update(|doc| {
            let stored = doc
                .allow_lists
                .get_mut(list_id)
                .ok_or_else(|| GatewayError::not_found(ResourceKind::AllowList, list_id))?;
            if stored.revision != list.revision {
                return Err(GatewayError::conflict(ResourceKind::AllowList, list_id));
            }
            stored.cidrs = list.cidrs;
            stored.revision = stored.revision.next();
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl NodeDirectory for FileInventory {
    async fn list_nodes(&self) -> Result<Vec<Node>, GatewayError> {
        Ok(self.load().await?.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Revision, RouterRoute};
    use pretty_assertions::assert_eq;

    async fn inventory_with(doc: &InventoryDocument) -> (tempfile::TempDir, FileInventory) {
        let dir = tempfile::tempdir().unwrap();
        let inventory = FileInventory::new(dir.path().join("inventory.json"));
        inventory.store(doc).await.unwrap();
        (dir, inventory)
    }

    fn sample() -> InventoryDocument {
        let mut doc = InventoryDocument::default();
        doc.routers.insert(
            "r".to_string(),
            RouterRouteList::new(
                vec![RouterRoute::new("10.244.0.0/24", "10.0.0.1")],
                Revision(3),
            ),
        );
        doc.allow_lists.insert("sg".to_string(), AllowList::default());
        doc.nodes.push(Node::with_internal_addresses("a", ["10.0.0.1"]));
        doc
    }

    #[tokio::test]
    async fn test_fetch_and_replace() {
        let (_dir, inventory) = inventory_with(&sample()).await;

        let mut list = inventory.fetch_routes("r").await.unwrap();
        assert_eq!(list.revision, Revision(3));
        list.routes.push(RouterRoute::new("10.244.1.0/24", "10.0.0.2"));
        inventory.replace_routes("r", list).await.unwrap();

        let stored = inventory.fetch_routes("r").await.unwrap();
        assert_eq!(stored.revision, Revision(4));
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let (_dir, inventory) = inventory_with(&sample()).await;

        let stale = inventory.fetch_routes("r").await.unwrap();
        inventory.replace_routes("r", stale.clone()).await.unwrap();
        let err = inventory.replace_routes("r", stale).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_allow_list_and_nodes() {
        let (_dir, inventory) = inventory_with(&sample()).await;

        let mut list = inventory.fetch_allow_list("sg").await.unwrap();
        list.cidrs.push("10.0.0.0/8".to_string());
        inventory.replace_allow_list("sg", list).await.unwrap();
        assert_eq!(
            inventory.fetch_allow_list("sg").await.unwrap().cidrs,
            vec!["10.0.0.0/8"]
        );

        let nodes = inventory.list_nodes().await.unwrap();
        assert_eq!(nodes[0].name, "a");
    }

    #[tokio::test]
    async fn test_missing_resources() {
        let (_dir, inventory) = inventory_with(&sample()).await;
        assert_eq!(
            inventory.fetch_routes("other").await.unwrap_err(),
            GatewayError::not_found(ResourceKind::Router, "other")
        );
        assert!(matches!(
            inventory.fetch_allow_list("other").await,
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_separate_handles_do_not_lose_updates() {
        let (dir, first) = inventory_with(&sample()).await;
        let second = FileInventory::new(dir.path().join("inventory.json"));

        let mut a = first.fetch_routes("r").await.unwrap();
        let mut b = second.fetch_routes("r").await.unwrap();
        a.routes.push(RouterRoute::new("10.244.1.0/24", "10.0.0.2"));
        b.routes.push(RouterRoute::new("10.244.2.0/24", "10.0.0.3"));

        let (ra, rb) = tokio::join!(first.replace_routes("r", a), second.replace_routes("r", b));
        let conflicts = [&ra, &rb]
            .iter()
            .filter(|r| matches!(r, Err(GatewayError::Conflict { .. })))
            .count();
        assert_eq!(conflicts, 1);
        assert!(ra.is_ok() || rb.is_ok());

        let stored = first.fetch_routes("r").await.unwrap();
        assert_eq!(stored.revision, Revision(4));
        let winner = if ra.is_ok() { "10.244.1.0/24" } else { "10.244.2.0/24" };
        assert_eq!(stored.routes[1].destination, winner);
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_store_leaves_no_temp_files() {
        let (dir, inventory) = inventory_with(&sample()).await;
        let list = inventory.fetch_routes("r").await.unwrap();
        inventory.replace_routes("r", list).await.unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["inventory.json", "inventory.json.lock"]);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_transport_error() {
        let inventory = FileInventory::new("/nonexistent/inventory.json");
        assert!(matches!(
            inventory.list_nodes().await,
            Err(GatewayError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_document_accepts_missing_sections() {
        let doc: InventoryDocument = serde_json::from_str(r#"{"nodes": []}"#).unwrap();
        assert!(doc.routers.is_empty());
        assert!(doc.allow_lists.is_empty());
    }
}
