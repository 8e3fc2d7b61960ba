// Virtual project file system. Nothing here touches the real disk: the tree
// lives in memory and is snapshotted to the key-value store on every change.

pub(crate) mod language;
pub(crate) mod session;
pub(crate) mod skeleton;
pub(crate) mod tree;

pub(crate) use language::Language;
pub(crate) use session::{BufferLoad, VirtualFileSystem};
