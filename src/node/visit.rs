use std::iter::FusedIterator;

use super::Node;

/// Depth-first, pre-order walk over a borrowed tree.
///
/// Each call to [`Node::visit`] starts a new walk with its own stack, so
/// several walks over the same tree can run side by side.
#[derive(Debug, Clone)]
pub struct Visit<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Visit<'a> {
    pub(crate) fn new(root: &'a Node) -> Self {
        Self { stack: vec![root] }
    }
}

impl<'a> Iterator for Visit<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // right pushed first so the left subtree comes out next
        self.stack.extend(node.children().rev());
        Some(node)
    }
}

impl FusedIterator for Visit<'_> {}
