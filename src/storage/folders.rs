use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};

use super::schema::Database;
use super::types::{Feed, Folder, ROOT_FOLDER_NAME};
use crate::util::strip_control_chars;

// ============================================================================
// Folder Tree
// ============================================================================

/// One folder in a [`FolderTree`], with arena indices of its child folders.
#[derive(Debug, Clone)]
pub struct FolderNode {
    pub folder: Folder,
    pub children: Vec<usize>,
    pub feeds: Vec<Feed>,
}

/// A user's folders and feeds as an arena rooted at the `<root>` folder.
///
/// Built from the flat `folders` and `feeds` tables. Folders whose parent is
/// missing and feeds whose folder is missing are dropped with a warning, and
/// traversal never visits a node twice, so corrupted parent links cannot
/// produce cycles.
#[derive(Debug, Clone)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
    root: usize,
}

impl FolderTree {
    /// Build the tree. Returns `None` when no root folder is present.
    pub fn build(folders: Vec<Folder>, feeds: Vec<Feed>) -> Option<Self> {
        let root = folders.iter().position(Folder::is_root)?;

        let index: HashMap<i64, usize> = folders
            .iter()
            .enumerate()
            .map(|(idx, folder)| (folder.id, idx))
            .collect();
        let parents: Vec<Option<i64>> = folders.iter().map(|f| f.parent_id).collect();

        let mut nodes: Vec<FolderNode> = folders
            .into_iter()
            .map(|folder| FolderNode {
                folder,
                children: Vec::new(),
                feeds: Vec::new(),
            })
            .collect();

        for (idx, parent_id) in parents.into_iter().enumerate() {
            let Some(parent_id) = parent_id else { continue };
            match index.get(&parent_id) {
                Some(&parent) if parent != idx => nodes[parent].children.push(idx),
                _ => tracing::warn!(
                    folder_id = nodes[idx].folder.id,
                    parent_id = parent_id,
                    "Folder has no valid parent, dropping from tree"
                ),
            }
        }

        for feed in feeds {
            match index.get(&feed.folder_id) {
                Some(&idx) => nodes[idx].feeds.push(feed),
                None => tracing::warn!(
                    feed_id = feed.id,
                    folder_id = feed.folder_id,
                    "Feed references unknown folder, dropping from tree"
                ),
            }
        }

        Some(Self { nodes, root })
    }

    pub fn root(&self) -> &FolderNode {
        &self.nodes[self.root]
    }

    pub fn node(&self, idx: usize) -> Option<&FolderNode> {
        self.nodes.get(idx)
    }

    /// Folders reachable from the root, depth first, root included.
    pub fn folders(&self) -> Vec<&FolderNode> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            let node = &self.nodes[idx];
            out.push(node);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Feeds of every folder reachable from the root.
    pub fn feeds(&self) -> impl Iterator<Item = &Feed> {
        self.folders().into_iter().flat_map(|node| node.feeds.iter())
    }
}

impl Database {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// Strip control characters and whitespace, reject empty and reserved names.
    fn sanitize_folder_name(name: &str) -> Result<String> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            bail!("Folder name cannot be empty or whitespace-only");
        }
        if trimmed == ROOT_FOLDER_NAME {
            bail!("Folder name {ROOT_FOLDER_NAME} is reserved");
        }
        Ok(trimmed.to_owned())
    }

    /// Create a folder under `parent_id`, which must belong to the same user.
    pub async fn create_folder(&self, user_id: &str, name: &str, parent_id: i64) -> Result<i64> {
        let clean_name = Self::sanitize_folder_name(name)?;

        let parent: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM folders WHERE id = ? AND user_id = ?")
                .bind(parent_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        if parent.is_none() {
            bail!("Parent folder {parent_id} does not exist for user");
        }

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO folders (user_id, name, parent_id) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(user_id)
        .bind(&clean_name)
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// All folders of a user as a flat list.
    pub async fn get_folders(&self, user_id: &str) -> Result<Vec<Folder>> {
        let rows: Vec<(i64, String, Option<i64>)> =
            sqlx::query_as("SELECT id, name, parent_id FROM folders WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, parent_id)| Folder {
                id,
                name,
                parent_id,
            })
            .collect())
    }

    pub async fn get_root_folder(&self, user_id: &str) -> Result<Folder> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM folders WHERE user_id = ? AND parent_id IS NULL AND name = ?",
        )
        .bind(user_id)
        .bind(ROOT_FOLDER_NAME)
        .fetch_optional(&self.pool)
        .await?;

        let (id,) = row.ok_or_else(|| anyhow!("User {user_id} has no root folder"))?;
        Ok(Folder {
            id,
            name: ROOT_FOLDER_NAME.to_string(),
            parent_id: None,
        })
    }

    /// A user's folders and feeds as a tree rooted at `<root>`.
    pub async fn get_folder_tree(&self, user_id: &str) -> Result<FolderTree> {
        let folders = self.get_folders(user_id).await?;
        let feeds = self.get_feeds(user_id).await?;
        FolderTree::build(folders, feeds).ok_or_else(|| anyhow!("User {user_id} has no root folder"))
    }
}
