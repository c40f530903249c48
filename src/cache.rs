//! Cache (C3) — a path-indexed tree holding the merged key/value and
//! per-node metadata view for the active session.

use std::collections::HashMap;

use crate::error::{ProvmanError, ProvmanResult};
use crate::path;

#[derive(Debug, Default)]
struct CacheNode {
    /// Non-null only for a leaf.
    value: Option<String>,
    meta: HashMap<String, String>,
    children: HashMap<String, CacheNode>,
    /// Child names in the order they were first inserted.
    order: Vec<String>,
}

impl CacheNode {
    fn is_leaf(&self) -> bool {
        self.value.is_some()
    }
}

/// The session's merged settings + metadata tree. Independent of any
/// particular plugin's schema.
#[derive(Debug, Default)]
pub struct Cache {
    root: CacheNode,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates missing ancestors as interior nodes, then sets the value
    /// at `path`, replacing any existing value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> ProvmanResult<()> {
        let segments = path::split(key)?;
        if segments.is_empty() {
            return Err(ProvmanError::BadKey(
                "cannot set a value at the root".to_string(),
            ));
        }
        let mut node = &mut self.root;
        for (i, seg) in segments.iter().enumerate() {
            let last = i == segments.len() - 1;
            if !last && node.is_leaf() {
                return Err(ProvmanError::BadArgs(format!(
                    "cannot descend through leaf ancestor while setting {key:?}"
                )));
            }
            let seg = (*seg).to_string();
            if !node.children.contains_key(&seg) {
                node.order.push(seg.clone());
            }
            node = node.children.entry(seg).or_default();
        }
        node.value = Some(value.into());
        node.children.clear();
        node.order.clear();
        Ok(())
    }

    /// For a leaf, the stored value. For an interior node, a `/`-joined
    /// list of its children's names in cache insertion order.
    pub fn get(&self, key: &str) -> ProvmanResult<String> {
        self.get_ordered(key, None)
    }

    /// Like [`Cache::get`], but for an interior node, orders children
    /// per `preferred_order` when given — typically the owning plugin's
    /// schema order — appending any children it doesn't mention in cache
    /// insertion order. Falls back to cache insertion order when
    /// `preferred_order` is `None`.
    pub fn get_ordered(&self, key: &str, preferred_order: Option<&[String]>) -> ProvmanResult<String> {
        let node = self.find(key)?;
        if let Some(v) = &node.value {
            return Ok(v.clone());
        }
        let names: Vec<&str> = match preferred_order {
            Some(order) => {
                let mut out: Vec<&str> = order
                    .iter()
                    .filter(|name| node.children.contains_key(*name))
                    .map(|name| name.as_str())
                    .collect();
                for name in &node.order {
                    if !order.iter().any(|o| o == name) {
                        out.push(name.as_str());
                    }
                }
                out
            }
            None => node.order.iter().map(|s| s.as_str()).collect(),
        };
        Ok(names.join("/"))
    }

    /// Removes the subtree rooted at `key`, then prunes the longest chain
    /// of now-childless ancestors. The root itself is never removed, but
    /// its children table may end up empty.
    pub fn remove(&mut self, key: &str) -> ProvmanResult<()> {
        let segments = path::split(key)?;
        if segments.is_empty() {
            self.root.children.clear();
            self.root.order.clear();
            self.root.value = None;
            return Ok(());
        }
        Self::remove_rec(&mut self.root, &segments)?;
        Ok(())
    }

    fn remove_rec(node: &mut CacheNode, segments: &[&str]) -> ProvmanResult<bool> {
        let (head, rest) = (segments[0], &segments[1..]);
        if rest.is_empty() {
            if node.children.remove(head).is_none() {
                return Err(ProvmanError::NotFound(format!("no such path: {head}")));
            }
            node.order.retain(|s| s != head);
        } else {
            let child = node
                .children
                .get_mut(head)
                .ok_or_else(|| ProvmanError::NotFound(format!("no such path: {head}")))?;
            let child_now_empty = Self::remove_rec(child, rest)?;
            if child_now_empty {
                node.children.remove(head);
                node.order.retain(|s| s != head);
            }
        }
        Ok(node.children.is_empty() && node.value.is_none())
    }

    /// `(exists, is_leaf)`.
    pub fn exists(&self, key: &str) -> (bool, bool) {
        match self.find(key) {
            Ok(node) => (true, node.is_leaf()),
            Err(_) => (false, false),
        }
    }

    pub fn set_meta(&mut self, key: &str, prop: &str, value: impl Into<String>) -> ProvmanResult<()> {
        let node = self.find_mut(key)?;
        node.meta.insert(prop.to_string(), value.into());
        Ok(())
    }

    pub fn get_meta(&self, key: &str, prop: &str) -> ProvmanResult<String> {
        let node = self.find(key)?;
        node.meta
            .get(prop)
            .cloned()
            .ok_or_else(|| ProvmanError::NotFound(format!("no metadata {prop:?} on {key:?}")))
    }

    /// Every leaf under `prefix`, as absolute paths.
    pub fn get_all(&self, prefix: &str) -> ProvmanResult<HashMap<String, String>> {
        let node = self.find(prefix)?;
        let mut out = HashMap::new();
        let base = path::normalize(prefix).to_string();
        let base = if base == "/" { String::new() } else { base };
        Self::collect_leaves(node, &base, &mut out);
        Ok(out)
    }

    fn collect_leaves(node: &CacheNode, base: &str, out: &mut HashMap<String, String>) {
        if let Some(v) = &node.value {
            let key = if base.is_empty() { "/".to_string() } else { base.to_string() };
            out.insert(key, v.clone());
            return;
        }
        for (name, child) in &node.children {
            let child_path = format!("{base}/{name}");
            Self::collect_leaves(child, &child_path, out);
        }
    }

    /// Every `(path, prop, value)` under `prefix`.
    pub fn get_all_meta(&self, prefix: &str) -> ProvmanResult<Vec<(String, String, String)>> {
        let node = self.find(prefix)?;
        let mut out = Vec::new();
        let base = path::normalize(prefix).to_string();
        let base = if base == "/" { String::new() } else { base };
        Self::collect_meta(node, &base, &mut out);
        Ok(out)
    }

    fn collect_meta(node: &CacheNode, base: &str, out: &mut Vec<(String, String, String)>) {
        let key = if base.is_empty() { "/".to_string() } else { base.to_string() };
        for (prop, value) in &node.meta {
            out.push((key.clone(), prop.clone(), value.clone()));
        }
        for (name, child) in &node.children {
            let child_path = format!("{base}/{name}");
            Self::collect_meta(child, &child_path, out);
        }
    }

    /// Bulk-insert settings; later duplicates overwrite.
    pub fn merge_settings(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (k, v) in entries {
            let _ = self.set(&k, v);
        }
    }

    /// Bulk-insert metadata; later duplicates overwrite. Entries whose
    /// node does not exist are created as empty interior/leaf nodes up to
    /// that point is not attempted — the node must already exist (callers
    /// merge settings first).
    pub fn merge_meta(&mut self, entries: impl IntoIterator<Item = (String, String, String)>) {
        for (k, prop, v) in entries {
            let _ = self.set_meta(&k, &prop, v);
        }
    }

    fn find(&self, key: &str) -> ProvmanResult<&CacheNode> {
        let segments = path::split(key)?;
        let mut node = &self.root;
        for seg in segments {
            node = node
                .children
                .get(seg)
                .ok_or_else(|| ProvmanError::NotFound(format!("no such path: {key}")))?;
        }
        Ok(node)
    }

    fn find_mut(&mut self, key: &str) -> ProvmanResult<&mut CacheNode> {
        let segments = path::split(key)?;
        let mut node = &mut self.root;
        for seg in segments {
            node = node
                .children
                .get_mut(seg)
                .ok_or_else(|| ProvmanError::NotFound(format!("no such path: {key}")))?;
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut cache = Cache::new();
        cache.set("/telephony/contexts/acct/apn", "test-apn").unwrap();
        assert_eq!(cache.get("/telephony/contexts/acct/apn").unwrap(), "test-apn");
    }

    #[test]
    fn set_then_remove_then_absent() {
        let mut cache = Cache::new();
        cache.set("/a/b", "v").unwrap();
        cache.remove("/a/b").unwrap();
        assert_eq!(cache.exists("/a/b"), (false, false));
    }

    #[test]
    fn last_write_wins() {
        let mut cache = Cache::new();
        cache.set("/a", "v1").unwrap();
        cache.set("/a", "v2").unwrap();
        assert_eq!(cache.get("/a").unwrap(), "v2");
    }

    #[test]
    fn remove_root_empties_but_root_survives() {
        let mut cache = Cache::new();
        cache.set("/a/b", "v").unwrap();
        cache.remove("/").unwrap();
        assert_eq!(cache.get("/").unwrap(), "");
        assert_eq!(cache.exists("/"), (true, false));
    }

    #[test]
    fn remove_prunes_empty_ancestor_chain() {
        let mut cache = Cache::new();
        cache.set("/a/b/c", "v").unwrap();
        cache.remove("/a/b/c").unwrap();
        // /a/b and /a should both have been pruned away.
        assert_eq!(cache.exists("/a"), (false, false));
        assert_eq!(cache.get("/").unwrap(), "");
    }

    #[test]
    fn remove_does_not_prune_siblings_with_content() {
        let mut cache = Cache::new();
        cache.set("/a/b/c", "v").unwrap();
        cache.set("/a/d", "v2").unwrap();
        cache.remove("/a/b/c").unwrap();
        assert_eq!(cache.exists("/a/b"), (false, false));
        assert_eq!(cache.exists("/a"), (true, false));
        assert_eq!(cache.get("/a/d").unwrap(), "v2");
    }

    #[test]
    fn get_all_and_union_over_children() {
        let mut cache = Cache::new();
        cache.set("/telephony/contexts/acct/apn", "apn1").unwrap();
        cache.set("/telephony/contexts/acct/name", "Name").unwrap();
        cache.set("/telephony/other", "x").unwrap();

        let all = cache.get_all("/telephony").unwrap();
        assert_eq!(all.len(), 3);

        let contexts = cache.get_all("/telephony/contexts").unwrap();
        let other = cache.get_all("/telephony/other").unwrap();
        assert_eq!(contexts.len() + other.len(), all.len());
    }

    #[test]
    fn trailing_slash_is_same_node() {
        let mut cache = Cache::new();
        cache.set("/a/b/", "v").unwrap();
        assert_eq!(cache.get("/a/b").unwrap(), "v");
    }

    #[test]
    fn metadata_tied_to_existing_node() {
        let mut cache = Cache::new();
        assert!(cache.set_meta("/missing", "prop", "v").is_err());
        cache.set("/a", "v").unwrap();
        cache.set_meta("/a", "prop", "val").unwrap();
        assert_eq!(cache.get_meta("/a", "prop").unwrap(), "val");
    }

    #[test]
    fn removing_node_removes_its_metadata() {
        let mut cache = Cache::new();
        cache.set("/a", "v").unwrap();
        cache.set_meta("/a", "prop", "val").unwrap();
        cache.remove("/a").unwrap();
        cache.set("/a", "v2").unwrap();
        assert!(cache.get_meta("/a", "prop").is_err());
    }

    #[test]
    fn get_all_meta_covers_subtree() {
        let mut cache = Cache::new();
        cache.set("/a/b", "v").unwrap();
        cache.set("/a/c", "v2").unwrap();
        cache.set_meta("/a/b", "p1", "x").unwrap();
        cache.set_meta("/a/c", "p2", "y").unwrap();
        let all = cache.get_all_meta("/a").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn interior_get_returns_insertion_order_joined() {
        let mut cache = Cache::new();
        cache.set("/a/zzz", "1").unwrap();
        cache.set("/a/aaa", "2").unwrap();
        assert_eq!(cache.get("/a").unwrap(), "zzz/aaa");
    }

    #[test]
    fn get_ordered_prefers_schema_order_then_appends_the_rest() {
        let mut cache = Cache::new();
        cache.set("/a/zzz", "1").unwrap();
        cache.set("/a/aaa", "2").unwrap();
        cache.set("/a/mmm", "3").unwrap();
        let order = vec!["aaa".to_string(), "mmm".to_string()];
        assert_eq!(cache.get_ordered("/a", Some(&order)).unwrap(), "aaa/mmm/zzz");
    }
}
