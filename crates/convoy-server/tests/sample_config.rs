//! The configuration shipped in `conf/` loads and reconciles cleanly

use std::path::PathBuf;
use std::sync::Arc;

use convoy_common::SystemLookup;
use convoy_mesh::{ResourceManager, ResourceType};
use convoy_server::config::{Cli, environment};
use convoy_server::{Configuration, Reconciler, load_store};

fn conf_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../conf")
}

#[tokio::test]
async fn test_sample_configuration_reconciles() {
    let args = Cli {
        config: Some(conf_dir().join("convoy.yml")),
        resources: Some(conf_dir().join("resources.yml")),
        ..Default::default()
    };
    let configuration =
        Configuration::load(&args, environment().source(Some(Default::default()))).unwrap();
    assert_eq!(configuration.zone(), "default");
    assert!(configuration.mads_enabled());

    let store = load_store(configuration.resources_path().as_deref()).await.unwrap();
    let reconciler = Reconciler::new(
        ResourceManager::new(Arc::new(store)),
        Arc::new(SystemLookup),
        configuration.builder_config(),
        configuration.mads_enabled(),
    );

    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.published, 4);
    assert!(report.mads_version.is_some());

    let cache = reconciler.cache();
    let web = cache.get_snapshot("default.web-1").unwrap();
    assert!(web.contains(ResourceType::Cluster, "backend"));
    assert!(web.contains(ResourceType::Cluster, "httpbin"));

    let egress = cache.get_snapshot("egress-1").unwrap();
    assert!(egress.contains(ResourceType::Cluster, "default:httpbin"));
}
