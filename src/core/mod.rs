pub mod classifier;
pub mod engine;
pub mod local_builder;
pub mod merger;
pub mod model;
pub mod path;
pub mod remote_builder;
pub mod transfer;
pub mod tree;

pub use classifier::{content_digest, file_digest, Status, StatusClassifier};
pub use engine::{SyncEngine, TreeHandle};
pub use local_builder::LocalTreeBuilder;
pub use merger::TreeMerger;
pub use model::{Column, TreeModel};
pub use path::PathResolver;
pub use remote_builder::{RemoteBuild, RemoteTreeBuilder};
pub use transfer::{TransferEngine, TransferGuard, TransferReport};
pub use tree::{Node, NodeId, NodeKind, Origin, RemoteMeta, SyncTree};
