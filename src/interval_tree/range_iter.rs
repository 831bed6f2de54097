//! Resumable range-overlap cursor
//!

use super::{IntervalId, IntervalTree};

/// A resumable, stack-free overlap traversal over one query range
///
/// The cursor carries only plain state: the current node, the position within that node's packed
/// list, whether the packed list is still in play, and whether the node's left subtree has
/// already been explored. It borrows the tree per [`next`](RangeIter::next) call instead of
/// holding a borrow across calls, so a caller can collect the yielded ids and apply deferred
/// removals once the traversal has finished; that interleaved collect-then-delete sequence is
/// the reason this exists alongside the recursive query.
///
/// The cursor must not be advanced after the tree has been mutated: removals reshape nodes the
/// cursor may still be pointing at. Collect first, then mutate.
///
pub struct RangeIter {
    start: i64,
    end: i64,
    node: Option<usize>,
    cursor: usize,
    in_node: bool,
    done_left: bool,
}

impl<T> IntervalTree<T> {
    /// Start a resumable traversal over every interval overlapping `[start, end]`
    ///
    /// Yields the same multiset of intervals as [`query`](IntervalTree::query) over the same
    /// bounds, one id at a time, in node order.
    ///
    pub fn range_iter(&self, start: i64, end: i64) -> RangeIter {
        let mut iter = RangeIter {
            start,
            end,
            node: self.root,
            cursor: 0,
            in_node: false,
            done_left: false,
        };
        if let Some(root) = self.root {
            iter.in_node = iter.node_overlaps(self, root);
        }
        iter
    }
}

impl RangeIter {
    /// Whether any interval packed in this node can overlap the query range
    fn node_overlaps<T>(&self, tree: &IntervalTree<T>, n: usize) -> bool {
        let node = &tree.nodes[n];
        self.end >= node.start && self.start <= node.end
    }

    fn enter<T>(&mut self, tree: &IntervalTree<T>, n: usize) {
        self.node = Some(n);
        self.cursor = 0;
        self.in_node = self.node_overlaps(tree, n);
        self.done_left = false;
    }

    /// Advance to the next overlapping interval, or None when the traversal is exhausted
    pub fn next<T>(&mut self, tree: &IntervalTree<T>) -> Option<IntervalId> {
        'descend: loop {
            let n = self.node?;

            // Left subtree first, unless already explored for this node or prunable
            if !self.done_left {
                if let Some(left) = tree.nodes[n].left
                    && tree.nodes[left].last >= self.start
                {
                    self.enter(tree, left);
                    continue 'descend;
                }
                self.done_left = true;
            }

            loop {
                let n = self.node?;

                if self.in_node {
                    let node = &tree.nodes[n];
                    while self.cursor < node.entries.len() {
                        let id = node.entries[self.cursor];
                        self.cursor += 1;
                        let range = &tree.entries[id.0].range;
                        if range.start <= self.end && range.end >= self.start {
                            return Some(id);
                        }
                    }
                    self.in_node = false;
                }

                // Then the right subtree, when the node key hasn't passed the query end
                if tree.nodes[n].start <= self.end
                    && let Some(right) = tree.nodes[n].right
                {
                    self.enter(tree, right);
                    continue 'descend;
                }

                // Climb until arriving at a parent from its left side
                let mut cur = n;
                loop {
                    match tree.nodes[cur].parent {
                        None => {
                            self.node = None;
                            return None;
                        }
                        Some(parent) => {
                            let from_right = tree.nodes[parent].right == Some(cur);
                            cur = parent;
                            if !from_right {
                                break;
                            }
                        }
                    }
                }
                self.node = Some(cur);
                self.cursor = 0;
                self.in_node = self.node_overlaps(tree, cur);
                self.done_left = true;
            }
        }
    }
}
