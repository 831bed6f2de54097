//! An augmented interval tree with overlap queries and interleave-safe deletion
//!
//! The tree is an AVL tree over interval start coordinates. Every interval sharing a start is
//! packed into one node, which caches the max end over its packed list; each node additionally
//! carries the max end reachable anywhere in its subtree, which is what lets an overlap query
//! prune whole subtrees.
//!
//! Nodes and intervals live in index arenas rather than owned child pointers. Interval slots are
//! never recycled, so an [`IntervalId`] stays valid (and unambiguous) for the life of the tree;
//! that stability is what makes "collect overlaps now, remove them later" sequences safe when
//! combined with the resumable [`RangeIter`] cursor.
//!

mod range_iter;

pub use range_iter::RangeIter;

use simple_error::{SimpleResult, bail};

use crate::int_range::IntRange;

/// Stable handle to one interval stored in an [`IntervalTree`]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash, Debug)]
pub struct IntervalId(pub(crate) usize);

/// Visitor verdict for [`IntervalTree::query`]
///
/// `Stop` ends the query while keeping the match count accumulated so far; `Abort` surfaces as a
/// query error.
///
pub enum QueryFlow {
    Continue,
    Stop,
    Abort,
}

struct IntervalEntry<T> {
    range: IntRange,
    payload: Option<T>,
}

struct Node {
    start: i64,

    /// Max end over the packed interval list
    end: i64,

    /// Max end over this node and its whole subtree
    last: i64,

    height: i32,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,

    /// Every stored interval whose start equals this node's start
    entries: Vec<IntervalId>,
}

impl Node {
    fn leaf(range: &IntRange, id: IntervalId, parent: Option<usize>) -> Self {
        Self {
            start: range.start,
            end: range.end,
            last: range.end,
            height: 1,
            parent,
            left: None,
            right: None,
            entries: vec![id],
        }
    }
}

pub struct IntervalTree<T> {
    nodes: Vec<Node>,
    free_nodes: Vec<usize>,
    entries: Vec<IntervalEntry<T>>,
    root: Option<usize>,
    len: usize,
}

impl<T> Default for IntervalTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntervalTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            entries: Vec::new(),
            root: None,
            len: 0,
        }
    }

    /// Number of intervals currently stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The span `id` was inserted with
    ///
    /// Interval spans are immutable once stored: higher layers that grow their payload's logical
    /// span must leave the tree key alone or node lookup breaks.
    ///
    pub fn span(&self, id: IntervalId) -> &IntRange {
        &self.entries[id.0].range
    }

    pub fn contains(&self, id: IntervalId) -> bool {
        self.entries.get(id.0).is_some_and(|e| e.payload.is_some())
    }

    pub fn payload(&self, id: IntervalId) -> &T {
        self.entries[id.0]
            .payload
            .as_ref()
            .expect("interval payload accessed after removal")
    }

    pub fn payload_mut(&mut self, id: IntervalId) -> &mut T {
        self.entries[id.0]
            .payload
            .as_mut()
            .expect("interval payload accessed after removal")
    }

    /// Store an interval and return its handle
    ///
    /// When a node with the same start already exists the interval packs into that node and only
    /// the end/last caches are re-augmented; otherwise a new leaf is attached and the insertion
    /// path is rebalanced.
    ///
    pub fn insert(&mut self, range: IntRange, payload: T) -> IntervalId {
        assert!(
            range.start <= range.end,
            "can't store an empty interval {range:?}"
        );

        let id = IntervalId(self.entries.len());
        self.entries.push(IntervalEntry {
            range: range.clone(),
            payload: Some(payload),
        });
        self.len += 1;

        let Some(mut cur) = self.root else {
            let node = self.alloc_node(Node::leaf(&range, id, None));
            self.root = Some(node);
            return id;
        };

        loop {
            let (node_start, left, right) = {
                let node = &self.nodes[cur];
                (node.start, node.left, node.right)
            };

            if range.start == node_start {
                let node = &mut self.nodes[cur];
                node.entries.push(id);
                if node.end < range.end {
                    node.end = range.end;
                }
                // Only the max-end augmentation can change; push it up until it stops growing
                let mut up = Some(cur);
                while let Some(i) = up {
                    if self.nodes[i].last >= range.end {
                        break;
                    }
                    self.nodes[i].last = range.end;
                    up = self.nodes[i].parent;
                }
                return id;
            }

            let child = if range.start < node_start { left } else { right };
            match child {
                Some(c) => cur = c,
                None => {
                    let leaf = self.alloc_node(Node::leaf(&range, id, Some(cur)));
                    if range.start < node_start {
                        self.nodes[cur].left = Some(leaf);
                    } else {
                        self.nodes[cur].right = Some(leaf);
                    }
                    self.retrace(Some(cur));
                    return id;
                }
            }
        }
    }

    /// Remove an interval, returning its payload
    ///
    /// Fails if the interval was already removed, without disturbing tree state. Must not be
    /// called while a [`RangeIter`] over this tree is still being advanced; collect the ids
    /// first and remove afterwards.
    ///
    pub fn remove(&mut self, id: IntervalId) -> SimpleResult<T> {
        let range = match self.entries.get(id.0) {
            Some(entry) if entry.payload.is_some() => entry.range.clone(),
            _ => bail!("interval {:?} is not present in the tree", id),
        };

        // Locate the owning node by start key
        let mut cur = self.root;
        let node = loop {
            match cur {
                None => bail!("no tree node found for interval start {}", range.start),
                Some(i) => {
                    let node_start = self.nodes[i].start;
                    if range.start == node_start {
                        break i;
                    }
                    cur = if range.start < node_start {
                        self.nodes[i].left
                    } else {
                        self.nodes[i].right
                    };
                }
            }
        };

        let pos = match self.nodes[node].entries.iter().position(|&e| e == id) {
            Some(pos) => pos,
            None => bail!("interval {:?} missing from its packed node", id),
        };
        self.nodes[node].entries.remove(pos);
        self.len -= 1;
        let payload = self.entries[id.0].payload.take().unwrap();

        if self.nodes[node].entries.is_empty() {
            self.remove_node(node);
        } else {
            // Removing the max-end member means the cached end may shrink; rescan to find out
            let end = self.nodes[node]
                .entries
                .iter()
                .map(|e| self.entries[e.0].range.end)
                .max()
                .unwrap();
            self.nodes[node].end = end;
            self.retrace(Some(node));
        }

        Ok(payload)
    }

    /// Visit every stored interval overlapping `[start, end]`
    ///
    /// Returns the number of overlapping intervals visited. The visitor controls traversal via
    /// [`QueryFlow`]; an `Abort` verdict halts the walk and surfaces as an error.
    ///
    pub fn query<F>(&self, start: i64, end: i64, mut visit: F) -> SimpleResult<usize>
    where
        F: FnMut(IntervalId, &IntRange, &T) -> QueryFlow,
    {
        let mut count = 0;
        self.query_node(self.root, start, end, &mut visit, &mut count)?;
        Ok(count)
    }

    /// Ok(true) keeps descending, Ok(false) is an early stop
    fn query_node<F>(
        &self,
        n: Option<usize>,
        start: i64,
        end: i64,
        visit: &mut F,
        count: &mut usize,
    ) -> SimpleResult<bool>
    where
        F: FnMut(IntervalId, &IntRange, &T) -> QueryFlow,
    {
        let Some(i) = n else {
            return Ok(true);
        };
        let node = &self.nodes[i];

        if let Some(left) = node.left {
            // Nothing in the left subtree can reach the query unless its max end does
            if self.nodes[left].last >= start
                && !self.query_node(Some(left), start, end, visit, count)?
            {
                return Ok(false);
            }
        }

        if end >= node.start && start <= node.end {
            for &id in &node.entries {
                let entry = &self.entries[id.0];
                if entry.range.start <= end && entry.range.end >= start {
                    *count += 1;
                    match visit(id, &entry.range, entry.payload.as_ref().unwrap()) {
                        QueryFlow::Continue => {}
                        QueryFlow::Stop => return Ok(false),
                        QueryFlow::Abort => bail!("range query aborted by visitor"),
                    }
                }
            }
        }

        if node.start <= end && !self.query_node(node.right, start, end, visit, count)? {
            return Ok(false);
        }

        Ok(true)
    }

    /// Non-runtime validation pass: recompute every invariant and cross-check the caches
    ///
    /// Checks BST ordering, parent links, AVL height/balance, per-node start/end caches and the
    /// max-end augmentation. Meant for test harnesses, not production paths.
    ///
    pub fn validate(&self) -> SimpleResult<()> {
        let mut live = 0usize;
        if let Some(root) = self.root {
            if self.nodes[root].parent.is_some() {
                bail!("root node has a parent link");
            }
            self.validate_node(root, None, None, &mut live)?;
        }
        if live != self.len {
            bail!(
                "live interval count {} does not match tree len {}",
                live,
                self.len
            );
        }
        Ok(())
    }

    fn validate_node(
        &self,
        i: usize,
        lo: Option<i64>,
        hi: Option<i64>,
        live: &mut usize,
    ) -> SimpleResult<(i64, i32)> {
        let node = &self.nodes[i];

        if node.entries.is_empty() {
            bail!("node with start {} holds no intervals", node.start);
        }
        if let Some(lo) = lo
            && node.start <= lo
        {
            bail!("node start {} violates BST order (lower bound {lo})", node.start);
        }
        if let Some(hi) = hi
            && node.start >= hi
        {
            bail!("node start {} violates BST order (upper bound {hi})", node.start);
        }

        let mut end = i64::MIN;
        for &id in &node.entries {
            let entry = &self.entries[id.0];
            if entry.payload.is_none() {
                bail!("node with start {} packs a removed interval", node.start);
            }
            if entry.range.start != node.start {
                bail!(
                    "interval start {} packed under node start {}",
                    entry.range.start,
                    node.start
                );
            }
            end = std::cmp::max(end, entry.range.end);
        }
        if end != node.end {
            bail!(
                "node start {}: cached end {} != packed max end {}",
                node.start,
                node.end,
                end
            );
        }
        *live += node.entries.len();

        let mut last = node.end;
        let mut left_height = 0;
        let mut right_height = 0;
        if let Some(left) = node.left {
            if self.nodes[left].parent != Some(i) {
                bail!("broken left parent link at node start {}", node.start);
            }
            let (child_last, child_height) =
                self.validate_node(left, lo, Some(node.start), live)?;
            last = std::cmp::max(last, child_last);
            left_height = child_height;
        }
        if let Some(right) = node.right {
            if self.nodes[right].parent != Some(i) {
                bail!("broken right parent link at node start {}", node.start);
            }
            let (child_last, child_height) =
                self.validate_node(right, Some(node.start), hi, live)?;
            last = std::cmp::max(last, child_last);
            right_height = child_height;
        }

        if last != node.last {
            bail!(
                "node start {}: augmented last {} != recomputed {}",
                node.start,
                node.last,
                last
            );
        }
        let height = 1 + std::cmp::max(left_height, right_height);
        if height != node.height {
            bail!(
                "node start {}: cached height {} != recomputed {}",
                node.start,
                node.height,
                height
            );
        }
        if (left_height - right_height).abs() > 1 {
            bail!("node start {} violates the balance bound", node.start);
        }

        Ok((last, height))
    }

    fn alloc_node(&mut self, node: Node) -> usize {
        match self.free_nodes.pop() {
            Some(i) => {
                self.nodes[i] = node;
                i
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Detach a node whose packed list has emptied
    fn remove_node(&mut self, n: usize) {
        // A node with two children first takes over its in-order successor's key and packed
        // list; the successor slot (at most one child) is then the one spliced out.
        let target = if self.nodes[n].left.is_some() && self.nodes[n].right.is_some() {
            let mut successor = self.nodes[n].right.unwrap();
            while let Some(left) = self.nodes[successor].left {
                successor = left;
            }
            let (s_start, s_end, s_entries) = {
                let s = &mut self.nodes[successor];
                (s.start, s.end, std::mem::take(&mut s.entries))
            };
            let node = &mut self.nodes[n];
            node.start = s_start;
            node.end = s_end;
            node.entries = s_entries;
            successor
        } else {
            n
        };

        let child = self.nodes[target].left.or(self.nodes[target].right);
        let parent = self.nodes[target].parent;
        if let Some(c) = child {
            self.nodes[c].parent = parent;
        }
        match parent {
            None => self.root = child,
            Some(p) => {
                if self.nodes[p].left == Some(target) {
                    self.nodes[p].left = child;
                } else {
                    self.nodes[p].right = child;
                }
            }
        }
        self.retrace(parent);
        self.free_nodes.push(target);
    }

    fn height(&self, n: Option<usize>) -> i32 {
        match n {
            Some(i) => self.nodes[i].height,
            None => 0,
        }
    }

    fn balance(&self, i: usize) -> i32 {
        self.height(self.nodes[i].left) - self.height(self.nodes[i].right)
    }

    /// Recompute height and the max-end augmentation from the children
    fn refresh(&mut self, i: usize) {
        let (left, right) = (self.nodes[i].left, self.nodes[i].right);
        let height = 1 + std::cmp::max(self.height(left), self.height(right));
        let mut last = self.nodes[i].end;
        if let Some(l) = left {
            last = std::cmp::max(last, self.nodes[l].last);
        }
        if let Some(r) = right {
            last = std::cmp::max(last, self.nodes[r].last);
        }
        let node = &mut self.nodes[i];
        node.height = height;
        node.last = last;
    }

    /// Walk from a structurally changed node to the root, refreshing caches and rebalancing
    fn retrace(&mut self, mut cur: Option<usize>) {
        while let Some(i) = cur {
            self.refresh(i);
            let subtree = self.rebalance(i);
            cur = self.nodes[subtree].parent;
        }
    }

    /// Returns the subtree root after any rotations
    fn rebalance(&mut self, i: usize) -> usize {
        let balance = self.balance(i);
        if balance > 1 {
            let left = self.nodes[i].left.unwrap();
            if self.balance(left) < 0 {
                self.rotate_left(left);
            }
            self.rotate_right(i)
        } else if balance < -1 {
            let right = self.nodes[i].right.unwrap();
            if self.balance(right) > 0 {
                self.rotate_right(right);
            }
            self.rotate_left(i)
        } else {
            i
        }
    }

    fn rotate_left(&mut self, x: usize) -> usize {
        let y = self.nodes[x].right.expect("rotate_left requires a right child");
        let middle = self.nodes[y].left;

        self.nodes[x].right = middle;
        if let Some(m) = middle {
            self.nodes[m].parent = Some(x);
        }

        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        match parent {
            None => self.root = Some(y),
            Some(p) => {
                if self.nodes[p].left == Some(x) {
                    self.nodes[p].left = Some(y);
                } else {
                    self.nodes[p].right = Some(y);
                }
            }
        }

        self.nodes[y].left = Some(x);
        self.nodes[x].parent = Some(y);

        self.refresh(x);
        self.refresh(y);
        y
    }

    fn rotate_right(&mut self, x: usize) -> usize {
        let y = self.nodes[x].left.expect("rotate_right requires a left child");
        let middle = self.nodes[y].right;

        self.nodes[x].left = middle;
        if let Some(m) = middle {
            self.nodes[m].parent = Some(x);
        }

        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        match parent {
            None => self.root = Some(y),
            Some(p) => {
                if self.nodes[p].left == Some(x) {
                    self.nodes[p].left = Some(y);
                } else {
                    self.nodes[p].right = Some(y);
                }
            }
        }

        self.nodes[y].right = Some(x);
        self.nodes[x].parent = Some(y);

        self.refresh(x);
        self.refresh(y);
        y
    }
}
