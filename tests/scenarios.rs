use assetsync_lib::config::EngineConfig;
use assetsync_lib::core::{Status, SyncEngine};
use assetsync_lib::remote::MemoryStore;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;

fn set_mtime(path: &Path, time: DateTime<Utc>) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(time)).unwrap();
}

struct Fixture {
    dir: TempDir,
    store: Arc<MemoryStore>,
    projects: String,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let projects = store.add_folder(None, "Projects");
        Self {
            dir: TempDir::new().unwrap(),
            store,
            projects,
        }
    }

    fn write_local(&self, relative: &str, content: &[u8], mtime: DateTime<Utc>) {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        set_mtime(&path, mtime);
    }

    async fn engine(&self) -> SyncEngine {
        let config = EngineConfig::default().with_download_root(self.dir.path().to_string_lossy());
        let engine = SyncEngine::new(self.store.clone(), config, vec![self.projects.clone()]);
        let report = engine.rebuild().await.unwrap();
        assert!(report.local_scanned);
        engine
    }

    async fn status(&self, relative: &str) -> Status {
        let engine = self.engine().await;
        let tree = engine.tree();
        let node = tree.find_by_path(Path::new(relative)).unwrap();
        engine.model().status_of(node)
    }
}

#[tokio::test]
async fn identical_content_with_older_local_time_is_synced() {
    let fx = Fixture::new();
    let t1 = Utc::now() - Duration::hours(1);
    let t0 = t1 - Duration::hours(5);
    fx.store
        .add_file(Some(&fx.projects), "Alpha", b"same bytes", t1);
    fx.write_local("Projects/Alpha", b"same bytes", t0);

    let engine = fx.engine().await;
    let tree = engine.tree();
    let alpha = tree.find_by_path(Path::new("Projects/Alpha")).unwrap();
    let node = tree.node(alpha);
    assert!(node.has_local() && node.has_remote());
    assert_eq!(tree.children_of(tree.node(alpha).parent()).len(), 1);
    assert_eq!(engine.model().status_of(alpha), Status::Synced);
}

#[tokio::test]
async fn different_content_with_newer_local_time_is_modified_locally() {
    let fx = Fixture::new();
    let t1 = Utc::now() - Duration::hours(2);
    fx.store.add_file(Some(&fx.projects), "Alpha", b"remote", t1);
    fx.write_local("Projects/Alpha", b"local edit", t1 + Duration::hours(1));

    assert_eq!(fx.status("Projects/Alpha").await, Status::ModifiedLocally);
}

#[tokio::test]
async fn unmatched_nodes_keep_their_side() {
    let fx = Fixture::new();
    fx.store.add_folder(Some(&fx.projects), "Beta");
    fs::create_dir_all(fx.dir.path().join("Projects/Gamma")).unwrap();

    let engine = fx.engine().await;
    let tree = engine.tree();
    let model = engine.model();
    let projects = tree.find_by_path(Path::new("Projects")).unwrap();

    assert_eq!(model.child_count(Some(projects)), 2);
    let beta = model.child(Some(projects), 0).unwrap();
    let gamma = model.child(Some(projects), 1).unwrap();
    assert_eq!(tree.node(beta).name(), "Beta");
    assert_eq!(model.status_of(beta), Status::RemoteOnly);
    assert_eq!(tree.node(gamma).name(), "Gamma");
    assert_eq!(model.status_of(gamma), Status::LocalOnly);
}

#[tokio::test]
async fn download_isolates_failing_sibling() {
    let fx = Fixture::new();
    let assets = fx.store.add_folder(Some(&fx.projects), "Assets");
    fx.store
        .add_file(Some(&assets), "logo.png", b"png bytes", Utc::now());
    fx.store.add_native_document(
        Some(&assets),
        "Notes",
        "application/vnd.google-apps.document",
    );

    let engine = fx.engine().await;
    let tree = engine.tree();
    let folder = tree.find_by_path(Path::new("Projects/Assets")).unwrap();
    let notes = tree.find_by_path(Path::new("Projects/Assets/Notes")).unwrap();
    let logo = tree.find_by_path(Path::new("Projects/Assets/logo.png")).unwrap();

    let report = engine.download(folder).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(report.failed(notes));
    assert!(!report.failed(logo));
    assert!(report.completed.contains(&logo));
    assert_eq!(
        fs::read(fx.dir.path().join("Projects/Assets/logo.png")).unwrap(),
        b"png bytes"
    );

    // 重建后下载的文件与远程一致
    assert_eq!(fx.status("Projects/Assets/logo.png").await, Status::Synced);
    assert_eq!(fx.status("Projects/Assets/Notes").await, Status::RemoteOnly);
}
