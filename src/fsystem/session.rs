// Session layer over the project tree: which files are open as tabs, which
// one is bound to the editor buffer, and the explorer's view state. Every
// tree mutation replaces the tree and writes the full snapshot.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

use super::language::{language_for_path, Language};
use super::skeleton::{
    default_expanded_folders, default_project, DEFAULT_PROJECT_NAME, NEW_FILE_CONTENT,
    NEW_FILE_NAME, NEW_FOLDER_NAME,
};
use super::tree::{PathNode, PathTree};
use crate::errors::Result;
use crate::storage::{load_or_log, persist_or_log, SnapshotKey, SnapshotStore};

/// Content and language handed to the editor buffer when a file becomes active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct BufferLoad {
    pub(crate) path: String,
    pub(crate) content: String,
    pub(crate) language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionState {
    pub(crate) active_file: Option<String>,
    pub(crate) open_files: Vec<String>,
    pub(crate) expanded_folders: BTreeSet<String>,
    pub(crate) explorer_visible: bool,
    pub(crate) project_name: String,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            active_file: None,
            open_files: Vec::new(),
            expanded_folders: default_expanded_folders().into_iter().collect(),
            explorer_visible: true,
            project_name: DEFAULT_PROJECT_NAME.to_string(),
        }
    }
}

pub(crate) struct VirtualFileSystem {
    tree: PathTree,
    session: SessionState,
    store: Arc<dyn SnapshotStore>,
}

fn restore_tree(store: &dyn SnapshotStore) -> PathTree {
    match load_or_log(store, SnapshotKey::ProjectFiles) {
        None => default_project(),
        Some(raw) => match PathTree::from_json(&raw) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::error!("Stored project files are unreadable, using defaults: {}", e);
                default_project()
            }
        },
    }
}

fn restore_expanded(store: &dyn SnapshotStore) -> Option<BTreeSet<String>> {
    let raw = load_or_log(store, SnapshotKey::ExpandedFolders)?;
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(folders) => Some(folders.into_iter().collect()),
        Err(e) => {
            tracing::warn!("Ignoring unreadable expanded folder list: {}", e);
            None
        }
    }
}

impl VirtualFileSystem {
    /// Restore the tree and persisted session fields, falling back to the
    /// built-in project when nothing was saved.
    pub(crate) fn load(store: Arc<dyn SnapshotStore>) -> VirtualFileSystem {
        let tree = restore_tree(store.as_ref());
        let mut session = SessionState::default();
        if let Some(name) = load_or_log(store.as_ref(), SnapshotKey::ProjectName) {
            session.project_name = name;
        }
        if let Some(expanded) = restore_expanded(store.as_ref()) {
            session.expanded_folders = expanded;
        }
        tracing::info!(
            "Loaded project {} with {} files in {} folders",
            session.project_name,
            tree.file_paths().len(),
            tree.folder_paths().len()
        );
        VirtualFileSystem {
            tree,
            session,
            store,
        }
    }

    pub(crate) fn tree(&self) -> &PathTree {
        &self.tree
    }

    pub(crate) fn session(&self) -> &SessionState {
        &self.session
    }

    pub(crate) fn get_file_content(&self, path: &str) -> Result<&str> {
        self.tree.get_content(path)
    }

    fn load_for(&self, path: &str) -> Result<BufferLoad> {
        let content = self.tree.get_content(path)?;
        Ok(BufferLoad {
            path: path.to_string(),
            content: content.to_string(),
            language: language_for_path(path),
        })
    }

    /// Make `path` the active file, opening a tab for it if needed.
    #[instrument(skip(self))]
    pub(crate) fn select_file(&mut self, path: &str) -> Result<BufferLoad> {
        let load = match self.load_for(path) {
            Ok(load) => load,
            Err(e) => {
                tracing::warn!("Cannot select {}: {}", path, e);
                return Err(e);
            }
        };
        self.session.active_file = Some(path.to_string());
        if !self.session.open_files.iter().any(|open| open == path) {
            self.session.open_files.push(path.to_string());
        }
        Ok(load)
    }

    /// Close the tab for `path`. When the active file is closed the tab before
    /// it takes over, else the first remaining tab, else nothing is active. The
    /// returned load must be replayed into the editor buffer.
    #[instrument(skip(self))]
    pub(crate) fn close_file(&mut self, path: &str) -> Option<BufferLoad> {
        let position = self.session.open_files.iter().position(|open| open == path);
        let position = match position {
            Some(p) => p,
            None => {
                tracing::debug!("{} is not open", path);
                return None;
            }
        };
        self.session.open_files.remove(position);

        if self.session.active_file.as_deref() != Some(path) {
            return None;
        }

        let successor = if position > 0 {
            self.session.open_files.get(position - 1).cloned()
        } else {
            self.session.open_files.first().cloned()
        };

        self.session.active_file = successor.clone();
        let successor = successor?;
        match self.load_for(&successor) {
            Ok(load) => Some(load),
            Err(e) => {
                tracing::warn!("New active file {} could not be loaded: {}", successor, e);
                None
            }
        }
    }

    /// Create the default new file at the root and select it.
    #[instrument(skip(self))]
    pub(crate) fn create_file(&mut self) -> Result<BufferLoad> {
        let tree = self
            .tree
            .insert_at_root(PathNode::file(NEW_FILE_NAME, NEW_FILE_CONTENT))?;
        self.replace_tree(tree);
        tracing::info!("Created file {}", NEW_FILE_NAME);
        self.select_file(NEW_FILE_NAME)
    }

    #[instrument(skip(self))]
    pub(crate) fn create_folder(&mut self) -> Result<String> {
        let tree = self
            .tree
            .insert_at_root(PathNode::folder(NEW_FOLDER_NAME, Vec::new()))?;
        self.replace_tree(tree);
        tracing::info!("Created folder {}", NEW_FOLDER_NAME);
        Ok(NEW_FOLDER_NAME.to_string())
    }

    #[instrument(skip(self, content))]
    pub(crate) fn save_file_content(&mut self, path: &str, content: &str) -> Result<()> {
        match self.tree.set_content(path, content) {
            Ok(tree) => {
                self.replace_tree(tree);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Dropping save for {}: {}", path, e);
                Err(e)
            }
        }
    }

    /// Flip the expansion state of `path`; returns whether it is now expanded.
    pub(crate) fn toggle_folder_expand(&mut self, path: &str) -> bool {
        if !self.tree.exists(path) {
            tracing::debug!("Toggling expansion of unknown path {}", path);
        }
        let expanded = if self.session.expanded_folders.remove(path) {
            false
        } else {
            self.session.expanded_folders.insert(path.to_string());
            true
        };
        let folders: Vec<&String> = self.session.expanded_folders.iter().collect();
        match serde_json::to_string(&folders) {
            Ok(raw) => {
                persist_or_log(self.store.as_ref(), SnapshotKey::ExpandedFolders, &raw);
            }
            Err(e) => tracing::error!("Failed to serialize expanded folders: {}", e),
        }
        expanded
    }

    pub(crate) fn toggle_explorer_visibility(&mut self) -> bool {
        self.session.explorer_visible = !self.session.explorer_visible;
        self.session.explorer_visible
    }

    #[instrument(skip(self))]
    pub(crate) fn rename_project(&mut self, name: &str) {
        self.session.project_name = name.to_string();
        persist_or_log(self.store.as_ref(), SnapshotKey::ProjectName, name);
    }

    fn replace_tree(&mut self, tree: PathTree) {
        self.tree = tree;
        match self.tree.to_json() {
            Ok(raw) => {
                persist_or_log(self.store.as_ref(), SnapshotKey::ProjectFiles, &raw);
            }
            Err(e) => tracing::error!("Failed to serialize project files: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CodeboxErrorType;
    use crate::storage::tests::BrokenStore;
    use crate::storage::MemoryStore;

    fn fresh() -> (VirtualFileSystem, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (VirtualFileSystem::load(store.clone()), store)
    }

    fn assert_invariants(vfs: &VirtualFileSystem) {
        let open = &vfs.session().open_files;
        let unique: BTreeSet<&String> = open.iter().collect();
        assert_eq!(unique.len(), open.len(), "duplicate tabs: {:?}", open);
        if let Some(active) = &vfs.session().active_file {
            assert!(open.contains(active), "{} active but not open", active);
        }
    }

    #[test]
    fn starts_from_default_project() {
        let (vfs, _) = fresh();
        assert!(vfs.tree().exists("src/components/App.js"));
        assert_eq!(vfs.session().project_name, "Untitled");
        assert!(vfs.session().expanded_folders.contains("src/components"));
        assert!(vfs.session().explorer_visible);
        assert_eq!(vfs.session().active_file, None);
    }

    #[test]
    fn restores_from_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                SnapshotKey::ProjectFiles,
                r#"[{"type":"file","name":"main.ts","content":"let x = 1;"}]"#,
            )
            .unwrap();
        store.put(SnapshotKey::ProjectName, "Saved").unwrap();
        let vfs = VirtualFileSystem::load(store);
        assert_eq!(vfs.tree().file_paths(), vec!["main.ts"]);
        assert_eq!(vfs.session().project_name, "Saved");
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_defaults() {
        let store = Arc::new(MemoryStore::new());
        store.put(SnapshotKey::ProjectFiles, "{not json").unwrap();
        let vfs = VirtualFileSystem::load(store);
        assert!(vfs.tree().exists("index.html"));
    }

    #[test]
    fn snapshot_with_duplicate_names_falls_back_to_defaults() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                SnapshotKey::ProjectFiles,
                r#"[{"type":"file","name":"a.js"},{"type":"folder","name":"a.js"},{"type":"file","name":"x/y"}]"#,
            )
            .unwrap();
        let vfs = VirtualFileSystem::load(store);
        assert!(vfs.tree().exists("index.html"));
        assert!(!vfs.tree().exists("a.js"));
        assert_invariants(&vfs);
    }

    #[test]
    fn select_emits_content_and_language() {
        let (mut vfs, _) = fresh();
        let load = vfs.select_file("src/styles.css").unwrap();
        assert_eq!(load.language, Language::Css);
        assert!(load.content.starts_with("body"));
        vfs.select_file("src/styles.css").unwrap();
        assert_eq!(vfs.session().open_files, vec!["src/styles.css"]);
        assert_invariants(&vfs);
    }

    #[test]
    fn selecting_missing_file_changes_nothing() {
        let (mut vfs, _) = fresh();
        vfs.select_file("index.html").unwrap();
        let before = vfs.session().clone();
        let err = vfs.select_file("gone.js").unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::NotFound);
        assert!(vfs.select_file("src").is_err());
        assert_eq!(vfs.session(), &before);
    }

    #[test]
    fn closing_active_tab_prefers_predecessor() {
        let (mut vfs, _) = fresh();
        vfs.select_file("index.html").unwrap();
        vfs.select_file("package.json").unwrap();
        vfs.select_file("src/index.js").unwrap();
        vfs.select_file("package.json").unwrap();

        let replay = vfs.close_file("package.json").unwrap();
        assert_eq!(replay.path, "index.html");
        assert_eq!(replay.language, Language::Html);
        assert_eq!(vfs.session().active_file.as_deref(), Some("index.html"));
        assert_eq!(vfs.session().open_files, vec!["index.html", "src/index.js"]);
        assert_invariants(&vfs);
    }

    #[test]
    fn closing_first_tab_falls_back_to_first_remaining() {
        let (mut vfs, _) = fresh();
        vfs.select_file("index.html").unwrap();
        vfs.select_file("package.json").unwrap();
        vfs.select_file("index.html").unwrap();

        let replay = vfs.close_file("index.html").unwrap();
        assert_eq!(replay.path, "package.json");
        assert_eq!(vfs.session().active_file.as_deref(), Some("package.json"));

        assert_eq!(vfs.close_file("package.json"), None);
        assert_eq!(vfs.session().active_file, None);
        assert!(vfs.session().open_files.is_empty());
    }

    #[test]
    fn closing_inactive_tab_keeps_active() {
        let (mut vfs, _) = fresh();
        vfs.select_file("index.html").unwrap();
        vfs.select_file("package.json").unwrap();
        assert_eq!(vfs.close_file("index.html"), None);
        assert_eq!(vfs.session().active_file.as_deref(), Some("package.json"));
        assert_eq!(vfs.close_file("never-open.js"), None);
        assert_invariants(&vfs);
    }

    #[test]
    fn select_then_close_restores_previous_active() {
        let (mut vfs, _) = fresh();
        vfs.select_file("index.html").unwrap();
        vfs.select_file("src/index.js").unwrap();
        let replay = vfs.close_file("src/index.js").unwrap();
        assert_eq!(replay.path, "index.html");
        assert_eq!(vfs.session().active_file.as_deref(), Some("index.html"));
    }

    #[test]
    fn create_file_inserts_selects_and_persists() {
        let (mut vfs, store) = fresh();
        let load = vfs.create_file().unwrap();
        assert_eq!(load.path, NEW_FILE_NAME);
        assert_eq!(load.content, NEW_FILE_CONTENT);
        assert_eq!(load.language, Language::Javascript);
        assert_eq!(vfs.tree().get_content(NEW_FILE_NAME).unwrap(), NEW_FILE_CONTENT);
        assert_eq!(vfs.session().active_file.as_deref(), Some(NEW_FILE_NAME));

        let saved = store.get(SnapshotKey::ProjectFiles).unwrap().unwrap();
        assert_eq!(&PathTree::from_json(&saved).unwrap(), vfs.tree());

        let err = vfs.create_file().unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::AlreadyExists);
        assert_invariants(&vfs);
    }

    #[test]
    fn create_folder_is_resolvable() {
        let (mut vfs, _) = fresh();
        let path = vfs.create_folder().unwrap();
        assert!(matches!(vfs.tree().resolve(&path).unwrap(), PathNode::Folder { .. }));
        assert_eq!(
            vfs.create_folder().unwrap_err().error_type,
            CodeboxErrorType::AlreadyExists
        );
    }

    #[test]
    fn save_persists_and_ignores_stale_paths() {
        let (mut vfs, store) = fresh();
        vfs.save_file_content("src/index.js", "console.log(1)").unwrap();
        let saved = store.get(SnapshotKey::ProjectFiles).unwrap().unwrap();
        let restored = PathTree::from_json(&saved).unwrap();
        assert_eq!(restored.get_content("src/index.js").unwrap(), "console.log(1)");

        let before = vfs.tree().clone();
        assert!(vfs.save_file_content("src/deleted.js", "x").is_err());
        assert_eq!(vfs.tree(), &before);
    }

    #[test]
    fn toggles_and_rename() {
        let (mut vfs, store) = fresh();
        assert!(!vfs.toggle_folder_expand("src"));
        assert!(vfs.toggle_folder_expand("src"));
        assert!(vfs.toggle_folder_expand("newFolder"));
        assert!(store.get(SnapshotKey::ExpandedFolders).unwrap().unwrap().contains("newFolder"));

        assert!(!vfs.toggle_explorer_visibility());
        assert!(vfs.toggle_explorer_visibility());

        vfs.rename_project("Playground");
        assert_eq!(vfs.session().project_name, "Playground");
        assert_eq!(store.get(SnapshotKey::ProjectName).unwrap().as_deref(), Some("Playground"));

        let reloaded = VirtualFileSystem::load(store);
        assert_eq!(reloaded.session().project_name, "Playground");
        assert!(reloaded.session().expanded_folders.contains("newFolder"));
    }

    #[test]
    fn storage_failures_keep_memory_state() {
        let mut vfs = VirtualFileSystem::load(Arc::new(BrokenStore));
        vfs.create_file().unwrap();
        vfs.save_file_content(NEW_FILE_NAME, "kept").unwrap();
        assert_eq!(vfs.get_file_content(NEW_FILE_NAME).unwrap(), "kept");
        vfs.rename_project("Offline");
        assert_eq!(vfs.session().project_name, "Offline");
    }
}
