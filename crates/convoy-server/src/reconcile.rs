//! Reconciliation loop
//!
//! Every tick refreshes the services advertised by each zone ingress, then
//! rebuilds the configuration of every dataplane, zone ingress and zone egress
//! and publishes the results into the snapshot cache. A proxy whose build
//! fails keeps the snapshot it had before the tick.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use convoy_common::{LookupIp, Result};
use convoy_mesh::model::{CoreResource, Dataplane, ZoneEgress, ZoneIngress};
use convoy_mesh::{
    BuilderConfig, DataplaneProxyBuilder, EgressProxyBuilder, IngressAvailabilityRefresher,
    IngressProxyBuilder, InMemoryStore, MadsSnapshot, MonitoringAssignmentGenerator,
    ProfileRegistry, Proxy, ProxyGenerator, ResourceKey, ResourceManager, ResourceSnapshot,
    SnapshotCache, Snapshotter,
};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub published: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Snapshots dropped because their proxy no longer exists
    pub removed: usize,
    /// Refresh locks released for deleted zone ingresses
    pub released_locks: usize,
    pub mads_version: Option<String>,
}

pub struct Reconciler {
    manager: ResourceManager,
    refresher: IngressAvailabilityRefresher,
    dataplanes: DataplaneProxyBuilder,
    ingresses: IngressProxyBuilder,
    egresses: EgressProxyBuilder,
    generator: ProxyGenerator,
    cache: Arc<SnapshotCache>,
    snapshotter: Option<Snapshotter>,
    mads: watch::Sender<Option<Arc<MadsSnapshot>>>,
}

impl Reconciler {
    pub fn new(
        manager: ResourceManager,
        lookup: Arc<dyn LookupIp>,
        config: BuilderConfig,
        mads_enabled: bool,
    ) -> Self {
        let snapshotter = mads_enabled.then(|| {
            Snapshotter::new(manager.clone(), Arc::new(MonitoringAssignmentGenerator))
        });
        let (mads, _) = watch::channel(None);

        Self {
            refresher: IngressAvailabilityRefresher::new(manager.clone(), config.clone()),
            dataplanes: DataplaneProxyBuilder::new(manager.clone(), lookup.clone(), config.clone()),
            ingresses: IngressProxyBuilder::new(manager.clone(), lookup.clone(), config.clone()),
            egresses: EgressProxyBuilder::new(manager.clone(), lookup, config),
            generator: ProxyGenerator::new(Arc::new(ProfileRegistry::with_defaults())),
            cache: Arc::new(SnapshotCache::new()),
            snapshotter,
            mads,
            manager,
        }
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        self.cache.clone()
    }

    /// Latest published MADS snapshot
    pub fn subscribe_mads(&self) -> watch::Receiver<Option<Arc<MadsSnapshot>>> {
        self.mads.subscribe()
    }

    /// One full pass. Only failing to list the proxies aborts it; individual
    /// build failures are logged and counted.
    pub async fn tick(&self) -> Result<ReconcileReport> {
        self.refresh_ingresses().await?;

        let dataplanes = keys(self.manager.list::<Dataplane>().await?);
        let ingresses = keys(self.manager.list::<ZoneIngress>().await?);
        let egresses = keys(self.manager.list::<ZoneEgress>().await?);
        let live_ingresses: HashSet<ResourceKey> = ingresses.iter().cloned().collect();

        let mut builds: Vec<BoxFuture<'_, (ResourceKey, Result<Proxy>)>> =
            Vec::with_capacity(dataplanes.len() + ingresses.len() + egresses.len());
        for key in dataplanes {
            builds.push(
                async move {
                    let result = self.dataplanes.build(&key).await;
                    (key, result)
                }
                .boxed(),
            );
        }
        for key in ingresses {
            builds.push(
                async move {
                    let result = self.ingresses.build(&key).await;
                    (key, result)
                }
                .boxed(),
            );
        }
        for key in egresses {
            builds.push(
                async move {
                    let result = self.egresses.build(&key).await;
                    (key, result)
                }
                .boxed(),
            );
        }

        let mut report = ReconcileReport::default();
        let mut live = HashSet::new();
        for (key, result) in join_all(builds).await {
            live.insert(key.node_id());
            match result.and_then(|proxy| self.publish(&proxy)) {
                Ok(true) => report.published += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        proxy = %key,
                        error = %e,
                        "Failed to build proxy configuration, keeping previous snapshot"
                    );
                }
            }
        }
        report.removed = self.cache.retain_nodes(&live);
        report.released_locks = self.refresher.retain(&live_ingresses);

        if let Some(snapshotter) = &self.snapshotter {
            match snapshotter.snapshot().await {
                Ok(snapshot) => {
                    report.mads_version = Some(snapshot.version.clone());
                    self.publish_mads(snapshot);
                }
                Err(e) => error!(error = %e, "Failed to build monitoring assignment snapshot"),
            }
        }

        info!(
            published = report.published,
            unchanged = report.unchanged,
            failed = report.failed,
            removed = report.removed,
            released_locks = report.released_locks,
            "Reconciled proxy snapshots"
        );
        Ok(report)
    }

    /// Ticks every `interval` until shutdown is signalled
    pub async fn run(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Reconciliation loop stopped");
                    break;
                }
            }
        }
    }

    async fn refresh_ingresses(&self) -> Result<()> {
        let ingresses = keys(self.manager.list::<ZoneIngress>().await?);
        let results = join_all(ingresses.iter().map(|key| self.refresher.refresh(key))).await;
        for (key, result) in ingresses.iter().zip(results) {
            if let Err(e) = result {
                warn!(ingress = %key, error = %e, "Failed to refresh available services");
            }
        }
        Ok(())
    }

    fn publish(&self, proxy: &Proxy) -> Result<bool> {
        let resources = self.generator.generate(proxy)?;
        let snapshot = ResourceSnapshot::from_resource_set(&resources)?;
        Ok(self.cache.set_snapshot(&proxy.node_id(), snapshot))
    }

    fn publish_mads(&self, snapshot: MadsSnapshot) {
        self.mads.send_if_modified(|current| {
            if current.as_ref().is_some_and(|c| c.version == snapshot.version) {
                return false;
            }
            debug!(
                version = %snapshot.version,
                assignments = snapshot.len(),
                "Publishing monitoring assignments"
            );
            *current = Some(Arc::new(snapshot));
            true
        });
    }
}

fn keys<T: CoreResource>(resources: Vec<T>) -> Vec<ResourceKey> {
    resources.iter().map(|r| r.meta().key()).collect()
}

/// Seeds the store from a resources file; no file means an empty mesh
pub async fn load_store(path: Option<&Path>) -> anyhow::Result<InMemoryStore> {
    let Some(path) = path else {
        warn!("No resources file configured, starting with an empty store");
        return Ok(InMemoryStore::new());
    };

    let yaml = tokio::fs::read_to_string(path).await?;
    let store = InMemoryStore::from_yaml(&yaml)?;
    info!(path = %path.display(), resources = store.len(), "Loaded mesh resources");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use convoy_common::SystemLookup;
    use convoy_mesh::ResourceType;
    use convoy_mesh::model::StoredResource;

    use super::*;

    const RESOURCES: &str = r#"
- type: Mesh
  name: default
  metrics:
    port: 9100
- type: Dataplane
  name: web-1
  mesh: default
  networking:
    address: 10.0.0.1
    inbound:
      - port: 10001
        service_port: 8080
        tags:
          kuma.io/service: web
    outbound:
      - port: 20001
        service: backend
- type: Dataplane
  name: backend-1
  mesh: default
  networking:
    address: 10.0.0.5
    inbound:
      - port: 8080
        tags:
          kuma.io/service: backend
- type: TrafficRoute
  name: route-all
  mesh: default
  sources:
    - kuma.io/service: "*"
  destinations:
    - kuma.io/service: "*"
  conf:
    - weight: 1
      destination:
        kuma.io/service: "*"
- type: ZoneIngress
  name: ingress-1
  zone: default
  networking:
    address: 10.0.1.1
    port: 10001
- type: ZoneEgress
  name: egress-1
  zone: default
  networking:
    address: 10.0.2.1
    port: 10002
"#;

    fn reconciler(store: Arc<InMemoryStore>, mads_enabled: bool) -> Reconciler {
        Reconciler::new(
            ResourceManager::new(store),
            Arc::new(SystemLookup),
            BuilderConfig::default(),
            mads_enabled,
        )
    }

    fn parse(yaml: &str) -> Vec<StoredResource> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_tick_publishes_every_proxy() {
        let store = Arc::new(InMemoryStore::from_yaml(RESOURCES).unwrap());
        let reconciler = reconciler(store, true);
        let mut mads = reconciler.subscribe_mads();

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.published, 4);
        assert_eq!(report.failed, 0);

        let cache = reconciler.cache();
        assert_eq!(
            cache.node_ids(),
            vec!["default.backend-1", "default.web-1", "egress-1", "ingress-1"]
        );
        let web = cache.get_snapshot("default.web-1").unwrap();
        assert!(web.contains(ResourceType::Cluster, "backend"));
        assert!(web.contains(ResourceType::Listener, "outbound:127.0.0.1:20001"));

        assert!(mads.has_changed().unwrap());
        let published = mads.borrow_and_update().clone().unwrap();
        assert_eq!(Some(published.version.clone()), report.mads_version);
        assert_eq!(published.len(), 2);
    }

    #[tokio::test]
    async fn test_second_tick_is_unchanged() {
        let store = Arc::new(InMemoryStore::from_yaml(RESOURCES).unwrap());
        let reconciler = reconciler(store, true);
        let mut mads = reconciler.subscribe_mads();

        reconciler.tick().await.unwrap();
        mads.borrow_and_update();
        let report = reconciler.tick().await.unwrap();

        assert_eq!(report.published, 0);
        assert_eq!(report.unchanged, 4);
        assert!(!mads.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_snapshot() {
        let store = Arc::new(InMemoryStore::from_yaml(RESOURCES).unwrap());
        let reconciler = reconciler(store.clone(), false);
        reconciler.tick().await.unwrap();
        let before = reconciler.cache().get_snapshot("default.web-1").unwrap();

        let broken = RESOURCES
            .replace(
                "      - port: 20001\n        service: backend\n",
                "      - port: 20001\n        service: backend\n      - port: 20002\n        service: payments\n",
            )
            .replace(
                "  destinations:\n    - kuma.io/service: \"*\"",
                "  destinations:\n    - kuma.io/service: backend",
            );
        store.replace_all(parse(&broken));

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.removed, 0);
        let after = reconciler.cache().get_snapshot("default.web-1").unwrap();
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn test_deleted_proxies_are_dropped() {
        let store = Arc::new(InMemoryStore::from_yaml(RESOURCES).unwrap());
        let reconciler = reconciler(store.clone(), false);
        reconciler.tick().await.unwrap();

        let without_gateways: Vec<StoredResource> = parse(RESOURCES)
            .into_iter()
            .filter(|r| !matches!(r, StoredResource::ZoneEgress(_) | StoredResource::ZoneIngress(_)))
            .collect();
        store.replace_all(without_gateways);

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.released_locks, 1);
        assert!(!reconciler.cache().has_snapshot("egress-1"));
        assert!(!reconciler.cache().has_snapshot("ingress-1"));

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.released_locks, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::from_yaml(RESOURCES).unwrap());
        let reconciler = Arc::new(reconciler(store, false));
        let (shutdown, rx) = broadcast::channel(1);

        let running = reconciler.clone();
        let handle = tokio::spawn(async move { running.run(Duration::from_millis(10), rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(reconciler.cache().has_snapshot("default.web-1"));
    }

    #[tokio::test]
    async fn test_load_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RESOURCES.as_bytes()).unwrap();

        let store = load_store(Some(file.path())).await.unwrap();
        assert_eq!(store.len(), 6);
        assert!(load_store(None).await.unwrap().is_empty());
        assert!(load_store(Some(Path::new("/nonexistent/resources.yml"))).await.is_err());
    }
}
