//! Hierarchical, dotted-name directory of services.
//!
//! The directory is a tree keyed by path segment. Interior nodes are groups,
//! leaves are services, and removed subtrees are kept as tombstones so that
//! walks never chase dangling parents; [`ServiceDirectory::prune`] drops the
//! tombstones for real. Listing order is insertion order per group.

use crate::error::BrokerError;

/// Normalizes a dotted service name: runs of dots collapse to one and
/// leading/trailing dots are trimmed (`..a..b.` becomes `a.b`).
#[must_use]
pub fn normalize(name: &str) -> String {
    name.split('.')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Kind of a live directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Interior node addressing a set of services.
    Group,
    /// Leaf node holding a registered service.
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Group,
    Service,
    Tombstone,
}

#[derive(Debug)]
struct Node {
    label: String,
    kind: Kind,
    children: Vec<Node>,
}

impl Node {
    fn new(label: &str, kind: Kind) -> Self {
        Self {
            label: label.to_string(),
            kind,
            children: Vec::new(),
        }
    }
}

/// Insertion-ordered tree of service names.
#[derive(Debug, Default)]
pub struct ServiceDirectory {
    roots: Vec<Node>,
}

impl ServiceDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service under the normalized `name`, creating missing groups.
    ///
    /// Tombstoned nodes along the path are resurrected: as groups for
    /// interior segments, as the new leaf for the final one.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NameInvalid`] when the normalized name is empty;
    /// [`BrokerError::NameConflict`] when the name is already a live service
    /// or group, or when an interior segment is a live service.
    pub fn add(&mut self, name: &str) -> Result<(), BrokerError> {
        let name = normalize(name);
        if name.is_empty() {
            return Err(BrokerError::NameInvalid);
        }

        let segments: Vec<&str> = name.split('.').collect();
        let last = segments.len() - 1;
        let mut children = &mut self.roots;

        for (depth, segment) in segments.iter().enumerate() {
            let index = match children.iter().position(|node| node.label == *segment) {
                Some(index) => index,
                None => {
                    let kind = if depth == last { Kind::Service } else { Kind::Group };
                    children.push(Node::new(segment, kind));
                    if depth == last {
                        return Ok(());
                    }
                    children.len() - 1
                }
            };

            let node = &mut children[index];
            if depth == last {
                return match node.kind {
                    Kind::Group | Kind::Service => {
                        Err(BrokerError::NameConflict { name: name.clone() })
                    }
                    Kind::Tombstone => {
                        node.kind = Kind::Service;
                        node.children.clear();
                        Ok(())
                    }
                };
            }
            match node.kind {
                Kind::Service => {
                    return Err(BrokerError::NameConflict { name: name.clone() })
                }
                Kind::Tombstone => node.kind = Kind::Group,
                Kind::Group => {}
            }
            children = &mut node.children;
        }
        unreachable!("loop returns on the last segment");
    }

    /// Tombstones the subtree rooted at `name`, descendants included.
    /// Unknown names are a no-op; the empty name tombstones everything.
    pub fn remove(&mut self, name: &str) {
        let name = normalize(name);
        if name.is_empty() {
            for node in &mut self.roots {
                node.kind = Kind::Tombstone;
                node.children.clear();
            }
            return;
        }
        if let Some(node) = Self::find_mut(&mut self.roots, &name) {
            node.kind = Kind::Tombstone;
            node.children.clear();
        }
    }

    /// Physically drops tombstoned nodes and any groups left empty by them.
    pub fn prune(&mut self) {
        Self::prune_level(&mut self.roots);
    }

    fn prune_level(children: &mut Vec<Node>) {
        children.retain_mut(|node| {
            if node.kind == Kind::Tombstone {
                return false;
            }
            Self::prune_level(&mut node.children);
            node.kind != Kind::Group || !node.children.is_empty()
        });
    }

    /// Lists the fully-qualified names of all services under `name`, in
    /// pre-order with insertion order per group. Groups themselves are not
    /// listed; a service name lists itself; unknown names yield nothing.
    #[must_use]
    pub fn list(&self, name: &str) -> Vec<String> {
        let name = normalize(name);
        let mut result = Vec::new();

        if name.is_empty() {
            for node in &self.roots {
                Self::collect(node, "", &mut result);
            }
            return result;
        }

        let Some(node) = Self::find(&self.roots, &name) else {
            return result;
        };
        match node.kind {
            Kind::Service => result.push(name),
            Kind::Group => {
                let prefix = format!("{name}.");
                for child in &node.children {
                    Self::collect(child, &prefix, &mut result);
                }
            }
            Kind::Tombstone => {}
        }
        result
    }

    /// Reports whether `name` is a live group or service. Tombstones and
    /// unknown names (including the empty root) report `None`.
    #[must_use]
    pub fn node_type(&self, name: &str) -> Option<NodeType> {
        let name = normalize(name);
        if name.is_empty() {
            return None;
        }
        match Self::find(&self.roots, &name)?.kind {
            Kind::Group => Some(NodeType::Group),
            Kind::Service => Some(NodeType::Service),
            Kind::Tombstone => None,
        }
    }

    /// Removes every node from the directory.
    pub fn clear(&mut self) {
        self.roots.clear();
    }

    fn collect(node: &Node, prefix: &str, result: &mut Vec<String>) {
        match node.kind {
            Kind::Service => result.push(format!("{prefix}{}", node.label)),
            Kind::Group => {
                let prefix = format!("{prefix}{}.", node.label);
                for child in &node.children {
                    Self::collect(child, &prefix, result);
                }
            }
            Kind::Tombstone => {}
        }
    }

    fn find<'a>(mut children: &'a [Node], name: &str) -> Option<&'a Node> {
        let mut found = None;
        for segment in name.split('.') {
            let node = children.iter().find(|node| node.label == segment)?;
            children = &node.children;
            found = Some(node);
        }
        found
    }

    fn find_mut<'a>(mut children: &'a mut [Node], name: &str) -> Option<&'a mut Node> {
        let mut segments = name.split('.').peekable();
        loop {
            let segment = segments.next()?;
            let index = children.iter().position(|node| node.label == segment)?;
            if segments.peek().is_none() {
                return Some(&mut children[index]);
            }
            children = &mut children[index].children;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_and_trims_dots() {
        assert_eq!(normalize(".."), "");
        assert_eq!(normalize(".a"), "a");
        assert_eq!(normalize(".a."), "a");
        assert_eq!(normalize(".a.b"), "a.b");
        assert_eq!(normalize("a.b.c"), "a.b.c");
        assert_eq!(normalize("..a..b."), "a.b");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["..a..b.", "a.b", ".", "", "a..b..c"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn add_rejects_empty_and_duplicate_names() {
        let mut directory = ServiceDirectory::new();
        assert!(matches!(directory.add(""), Err(BrokerError::NameInvalid)));
        assert!(matches!(directory.add("..."), Err(BrokerError::NameInvalid)));

        directory.add("a.b").unwrap();
        assert!(matches!(
            directory.add(".a.b"),
            Err(BrokerError::NameConflict { .. })
        ));
        directory.add("a.c").unwrap();
        assert!(matches!(
            directory.add("a.c"),
            Err(BrokerError::NameConflict { .. })
        ));
    }

    #[test]
    fn add_rejects_group_names_and_service_parents() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.b").unwrap();

        // "a" is a group, "a.b" a service; neither may be re-added, and a
        // live service cannot become a parent.
        assert!(matches!(
            directory.add("a"),
            Err(BrokerError::NameConflict { .. })
        ));
        assert!(matches!(
            directory.add("a.b.c"),
            Err(BrokerError::NameConflict { .. })
        ));
    }

    #[test]
    fn remove_tombstones_a_subtree_for_reuse() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.b").unwrap();
        directory.add("a.c").unwrap();
        directory.add("b.a").unwrap();
        directory.add("b.b").unwrap();

        directory.remove("a.c");
        directory.add("a.c").unwrap();

        directory.remove("a");
        directory.add("a.b").unwrap();
        directory.add("a.c").unwrap();
        assert!(matches!(
            directory.add("b.a"),
            Err(BrokerError::NameConflict { .. })
        ));
        assert!(matches!(
            directory.add("b.b"),
            Err(BrokerError::NameConflict { .. })
        ));

        directory.remove("");
        directory.add("a.b").unwrap();
        directory.add("a.c").unwrap();
        directory.add("b.a").unwrap();
        directory.add("b.b").unwrap();
    }

    #[test]
    fn remove_unknown_name_is_a_noop() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.b").unwrap();
        directory.remove("z.z");
        assert_eq!(directory.list(""), vec!["a.b"]);
    }

    #[test]
    fn list_walks_groups_in_insertion_order() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.b").unwrap();
        directory.add("a.c").unwrap();
        directory.add("b.a").unwrap();
        directory.add("b.b").unwrap();

        assert_eq!(directory.list(""), vec!["a.b", "a.c", "b.a", "b.b"]);
        assert_eq!(directory.list("a"), vec!["a.b", "a.c"]);
        assert_eq!(directory.list("b"), vec!["b.a", "b.b"]);
        assert_eq!(directory.list("a.b"), vec!["a.b"]);
        assert_eq!(directory.list("missing"), Vec::<String>::new());

        directory.remove("b");
        assert_eq!(directory.list(""), vec!["a.b", "a.c"]);
    }

    #[test]
    fn list_is_depth_first() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.x.one").unwrap();
        directory.add("a.y").unwrap();
        directory.add("a.x.two").unwrap();

        assert_eq!(directory.list("a"), vec!["a.x.one", "a.x.two", "a.y"]);
    }

    #[test]
    fn node_type_distinguishes_groups_and_services() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.b").unwrap();

        assert_eq!(directory.node_type("a"), Some(NodeType::Group));
        assert_eq!(directory.node_type("a.b"), Some(NodeType::Service));
        assert_eq!(directory.node_type("a.c"), None);

        directory.remove("a.b");
        assert_eq!(directory.node_type("a.b"), None);
    }

    #[test]
    fn prune_drops_tombstones_and_empty_groups() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.b").unwrap();
        directory.add("c.d").unwrap();
        directory.remove("a.b");
        directory.prune();

        assert_eq!(directory.node_type("a"), None);
        assert_eq!(directory.list(""), vec!["c.d"]);
        directory.add("a").unwrap();
    }

    #[test]
    fn clear_empties_the_tree() {
        let mut directory = ServiceDirectory::new();
        directory.add("a.b").unwrap();
        directory.clear();
        assert!(directory.list("").is_empty());
        directory.add("a.b").unwrap();
    }
}
