//! Types for describing desired state as a tree.

use crate::core::applier::Applier;
#[cfg(doc)]
use crate::core::runner::Runner;
use std::fmt;
use std::sync::Arc;

/// A node in a tree of desired state: at most one [Applier] plus an ordered list of children.
///
/// A [Configuration] is a description, not an action. [Runner::new] calls [Self::applier] and
/// [Self::children] exactly once per node and freezes the result, so builders are free to do
/// expensive or fallible work, e.g. look up a secret that the applier needs.
pub trait Configuration: Send + Sync {
    /// A label for logs and error paths. Defaults to the implementing type's name.
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>()).to_owned()
    }

    /// Builds this node's [Applier], if it has one.
    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>>;

    /// Builds this node's children.
    fn children(&self) -> anyhow::Result<Children>;
}

/// Strips module paths and generic arguments, e.g. `a::b::File<x::Y>` becomes `File`.
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// The children of a [Configuration], in apply order.
///
/// Order is significant: children are applied one at a time, first to last, and a child may
/// assume that every sibling before it has already converged (the directory exists before the
/// file is written into it, the unit file exists before the service is started).
#[derive(Clone, Default)]
pub struct Children(Vec<Arc<dyn Configuration>>);

impl Children {
    /// Creates an empty list.
    pub fn new() -> Self {
        Children(Vec::new())
    }

    /// Appends `child`; it will be applied after every child already in the list.
    pub fn push(&mut self, child: impl Configuration + 'static) {
        self.0.push(Arc::new(child));
    }

    /// Like [Self::push], for an already shared [Configuration].
    pub fn push_shared(&mut self, child: Arc<dyn Configuration>) {
        self.0.push(child);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates in apply order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn Configuration>> {
        self.0.iter()
    }
}

impl From<Vec<Arc<dyn Configuration>>> for Children {
    fn from(children: Vec<Arc<dyn Configuration>>) -> Self {
        Children(children)
    }
}

impl FromIterator<Arc<dyn Configuration>> for Children {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Configuration>>>(iter: I) -> Self {
        Children(iter.into_iter().collect())
    }
}

impl IntoIterator for Children {
    type Item = Arc<dyn Configuration>;
    type IntoIter = std::vec::IntoIter<Arc<dyn Configuration>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'c> IntoIterator for &'c Children {
    type Item = &'c Arc<dyn Configuration>;
    type IntoIter = std::slice::Iter<'c, Arc<dyn Configuration>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for Children {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|child| child.name()))
            .finish()
    }
}

/// Builds [Children] from a list of [Configuration] values, preserving order.
///
/// ```
/// use converge::children;
/// use converge::core::Node;
///
/// let children = children![Node::new("first"), Node::new("second")];
/// assert_eq!(2, children.len());
/// ```
#[macro_export]
macro_rules! children {
    ($($child:expr),* $(,)?) => {
        $crate::core::Children::from(::std::vec![
            $(::std::sync::Arc::new($child) as ::std::sync::Arc<dyn $crate::core::Configuration>),*
        ])
    };
}

/// A [Configuration] assembled in code from an optional [Applier] and children.
///
/// Use this to group resources under a named node ("nginx", "etcd") so that error paths say
/// where a failure happened, or to attach a parent action that must run after its children.
#[derive(Clone)]
pub struct Node {
    name: String,
    applier: Option<Arc<dyn Applier>>,
    children: Children,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            applier: None,
            children: Children::new(),
        }
    }

    /// Sets the action that runs after all children have converged.
    pub fn with_applier(mut self, applier: impl Applier + 'static) -> Self {
        self.applier = Some(Arc::new(applier));
        self
    }

    /// Appends one child.
    pub fn with_child(mut self, child: impl Configuration + 'static) -> Self {
        self.children.push(child);
        self
    }

    /// Appends `children`, in order, after any existing children.
    pub fn with_children(mut self, children: Children) -> Self {
        self.children.0.extend(children);
        self
    }
}

impl Configuration for Node {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(self.applier.clone())
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(self.children.clone())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("applier", &self.applier.is_some())
            .field("children", &self.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unnamed;

    impl Configuration for Unnamed {
        fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
            Ok(None)
        }

        fn children(&self) -> anyhow::Result<Children> {
            Ok(Children::new())
        }
    }

    mod short_type_name {
        use super::*;

        #[test]
        fn works() {
            assert_eq!("File", short_type_name("converge::core::resource::File"));
            assert_eq!("Wrapper", short_type_name("a::Wrapper<b::Inner>"));
            assert_eq!("Plain", short_type_name("Plain"));
        }
    }

    mod name {
        use super::*;

        #[test]
        fn defaults_to_type_name() {
            assert_eq!("Unnamed", Unnamed.name());
        }

        #[test]
        fn survives_dynamic_dispatch() {
            let configuration: Arc<dyn Configuration> = Arc::new(Unnamed);
            assert_eq!("Unnamed", configuration.name());
        }
    }

    mod children {
        use super::*;

        #[test]
        fn preserves_order() {
            let mut children = children![Node::new("a"), Node::new("b")];
            children.push(Node::new("c"));
            children.push_shared(Arc::new(Node::new("d")));

            let names: Vec<_> = children.iter().map(|c| c.name()).collect();
            assert_eq!(vec!["a", "b", "c", "d"], names);
        }

        #[test]
        fn macro_accepts_empty_list() {
            assert!(children![].is_empty());
        }
    }

    mod node {
        use super::*;

        #[test]
        fn works() {
            let node = Node::new("server")
                .with_child(Node::new("directory"))
                .with_children(children![Node::new("file"), Node::new("service")]);

            assert_eq!("server", node.name());
            assert!(node.applier().unwrap().is_none());
            let names: Vec<_> = node
                .children()
                .unwrap()
                .iter()
                .map(|c| c.name())
                .collect();
            assert_eq!(vec!["directory", "file", "service"], names);
        }
    }
}
