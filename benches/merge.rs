use assetsync_lib::config::EngineConfig;
use assetsync_lib::core::{NodeKind, Origin, RemoteMeta, SyncTree, TreeMerger};
use assetsync_lib::remote::FOLDER_MIME_TYPE;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn meta(id: String, kind: NodeKind) -> RemoteMeta {
    RemoteMeta {
        id,
        mime_type: match kind {
            NodeKind::Folder => FOLDER_MIME_TYPE.to_string(),
            NodeKind::File => "application/octet-stream".to_string(),
        },
        modified_time: None,
        checksum: None,
        url: None,
        size: None,
    }
}

/// 每层 `fanout` 个文件夹、每个文件夹 `fanout` 个文件
fn synthetic(depth: usize, fanout: usize, remote: bool) -> SyncTree {
    let resolver = EngineConfig::default()
        .with_download_root("/tmp/assetsync-bench")
        .resolver();
    let mut tree = SyncTree::new(resolver);
    let origin = |id: String, kind| {
        if remote {
            Origin::Remote(meta(id, kind))
        } else {
            Origin::Local
        }
    };

    let root = tree.add_root("Projects", NodeKind::Folder, origin("root".into(), NodeKind::Folder));
    let mut level = vec![root];
    for d in 0..depth {
        let mut next = Vec::new();
        for &parent in &level {
            for i in 0..fanout {
                let folder = tree.append_child(
                    parent,
                    format!("dir-{}-{}", d, i),
                    NodeKind::Folder,
                    origin(format!("{}-{}-d{}", parent.index(), d, i), NodeKind::Folder),
                );
                next.push(folder);
                // 本地多一个文件，制造仅本地节点
                let files = if remote { fanout } else { fanout + 1 };
                for f in 0..files {
                    tree.append_child(
                        parent,
                        format!("file-{}-{}-{}.png", d, i, f),
                        NodeKind::File,
                        origin(format!("{}-{}-f{}-{}", parent.index(), d, i, f), NodeKind::File),
                    );
                }
            }
        }
        level = next;
    }
    tree
}

fn merge_bench(c: &mut Criterion) {
    let remote = synthetic(3, 8, true);
    let local = synthetic(3, 8, false);
    let merger = TreeMerger::new();

    c.bench_function("merge_synthetic", |b| {
        b.iter(|| merger.merge(black_box(&remote), black_box(&local)));
    });

    let merged = merger.merge(&remote, &local);
    c.bench_function("find_by_path", |b| {
        let path = std::path::Path::new("Projects/dir-0-3/dir-1-5/file-2-7-7.png");
        b.iter(|| merged.find_by_path(black_box(path)));
    });
}

criterion_group!(benches, merge_bench);
criterion_main!(benches);
