//! R-tree over N-dimensional rectangles.
//!
//! Quadratic-split insertion in the Guttman style; deletion condenses the
//! tree and reinserts orphaned entries. Items are (rectangle, primary key)
//! pairs; a key appears at most once.

use super::rect::Rect;

const MAX_ENTRIES: usize = 16;
const MIN_ENTRIES: usize = 4;

#[derive(Debug, Clone)]
struct Item {
    rect: Rect,
    key: Vec<u8>,
}

#[derive(Debug)]
enum Node {
    Leaf(Vec<Item>),
    Branch(Vec<(Rect, Node)>),
}

impl Node {
    fn bounds(&self) -> Option<Rect> {
        match self {
            Node::Leaf(items) => union_all(items.iter().map(|i| &i.rect)),
            Node::Branch(children) => union_all(children.iter().map(|(r, _)| r)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Node::Leaf(items) => items.len(),
            Node::Branch(children) => children.len(),
        }
    }
}

fn union_all<'a>(rects: impl Iterator<Item = &'a Rect>) -> Option<Rect> {
    rects.fold(None, |acc, r| match acc {
        None => Some(r.clone()),
        Some(b) => Some(b.union(r)),
    })
}

/// A spatial index over (rectangle, key) items.
#[derive(Debug)]
pub struct RTree {
    root: Node,
    len: usize,
}

impl Default for RTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RTree {
    pub fn new() -> Self {
        Self { root: Node::Leaf(Vec::new()), len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert an item. The caller keeps the key-uniqueness invariant by
    /// removing any previous rectangle for the key first.
    pub fn insert(&mut self, rect: Rect, key: Vec<u8>) {
        let item = Item { rect, key };
        if let Some((first, second)) = insert_into(&mut self.root, item) {
            let fb = first.bounds().unwrap_or_else(empty_rect);
            let sb = second.bounds().unwrap_or_else(empty_rect);
            self.root = Node::Branch(vec![(fb, first), (sb, second)]);
        }
        self.len += 1;
    }

    /// Remove the item for `key` with the given rectangle. Returns whether
    /// an item was removed.
    pub fn remove(&mut self, rect: &Rect, key: &[u8]) -> bool {
        let mut orphans = Vec::new();
        let removed = remove_from(&mut self.root, rect, key, &mut orphans);
        if removed {
            self.len -= 1;
        }
        // collapse a root branch with a single child
        if let Node::Branch(children) = &mut self.root {
            if children.len() == 1 {
                let (_, only) = children.pop().expect("len checked");
                self.root = only;
            } else if children.is_empty() {
                self.root = Node::Leaf(Vec::new());
            }
        }
        for orphan in orphans {
            self.len -= 1;
            self.insert(orphan.rect, orphan.key);
        }
        removed
    }

    /// Visit every item whose rectangle overlaps `query`. The closure
    /// returns `false` to stop early.
    pub fn search_intersects(&self, query: &Rect, mut f: impl FnMut(&Rect, &[u8]) -> bool) {
        search(&self.root, query, &mut f);
    }
}

fn empty_rect() -> Rect {
    Rect::new(Vec::new(), Vec::new())
}

fn search(node: &Node, query: &Rect, f: &mut impl FnMut(&Rect, &[u8]) -> bool) -> bool {
    match node {
        Node::Leaf(items) => {
            for item in items {
                if query.intersects(&item.rect) && !f(&item.rect, &item.key) {
                    return false;
                }
            }
        }
        Node::Branch(children) => {
            for (bounds, child) in children {
                if query.intersects(bounds) && !search(child, query, f) {
                    return false;
                }
            }
        }
    }
    true
}

/// Insert, returning two replacement nodes when the target node split.
fn insert_into(node: &mut Node, item: Item) -> Option<(Node, Node)> {
    match node {
        Node::Leaf(items) => {
            items.push(item);
            if items.len() <= MAX_ENTRIES {
                return None;
            }
            let split = split_items(std::mem::take(items));
            Some((Node::Leaf(split.0), Node::Leaf(split.1)))
        }
        Node::Branch(children) => {
            let idx = choose_subtree(children, &item.rect);
            let (bounds, child) = &mut children[idx];
            *bounds = bounds.union(&item.rect);
            if let Some((first, second)) = insert_into(child, item) {
                let fb = first.bounds().unwrap_or_else(empty_rect);
                let sb = second.bounds().unwrap_or_else(empty_rect);
                children[idx] = (fb, first);
                children.push((sb, second));
                if children.len() > MAX_ENTRIES {
                    let split = split_children(std::mem::take(children));
                    return Some((Node::Branch(split.0), Node::Branch(split.1)));
                }
            }
            None
        }
    }
}

/// Least-enlargement subtree choice; ties break on smaller area, then on
/// position for determinism.
fn choose_subtree(children: &[(Rect, Node)], rect: &Rect) -> usize {
    let mut best = 0;
    let mut best_growth = f64::INFINITY;
    let mut best_area = f64::INFINITY;
    for (i, (bounds, _)) in children.iter().enumerate() {
        let area = bounds.area();
        let growth = bounds.union(rect).area() - area;
        if growth < best_growth || (growth == best_growth && area < best_area) {
            best = i;
            best_growth = growth;
            best_area = area;
        }
    }
    best
}

fn remove_from(node: &mut Node, rect: &Rect, key: &[u8], orphans: &mut Vec<Item>) -> bool {
    match node {
        Node::Leaf(items) => {
            if let Some(pos) = items.iter().position(|i| i.key == key) {
                items.remove(pos);
                true
            } else {
                false
            }
        }
        Node::Branch(children) => {
            for i in 0..children.len() {
                if !children[i].0.intersects(rect) {
                    continue;
                }
                if remove_from(&mut children[i].1, rect, key, orphans) {
                    if children[i].1.len() < MIN_ENTRIES {
                        let (_, under) = children.remove(i);
                        collect_items(under, orphans);
                    } else {
                        children[i].0 =
                            children[i].1.bounds().unwrap_or_else(empty_rect);
                    }
                    return true;
                }
            }
            false
        }
    }
}

fn collect_items(node: Node, out: &mut Vec<Item>) {
    match node {
        Node::Leaf(items) => out.extend(items),
        Node::Branch(children) => {
            for (_, child) in children {
                collect_items(child, out);
            }
        }
    }
}

/// Quadratic split: seed with the pair wasting the most area, then assign
/// each remaining entry to the group whose bounds grow least.
fn split_items(items: Vec<Item>) -> (Vec<Item>, Vec<Item>) {
    let rects: Vec<Rect> = items.iter().map(|i| i.rect.clone()).collect();
    let (sa, sb) = pick_seeds(&rects);
    distribute(items, sa, sb, |i| i.rect.clone())
}

fn split_children(children: Vec<(Rect, Node)>) -> (Vec<(Rect, Node)>, Vec<(Rect, Node)>) {
    let rects: Vec<Rect> = children.iter().map(|(r, _)| r.clone()).collect();
    let (sa, sb) = pick_seeds(&rects);
    distribute(children, sa, sb, |c| c.0.clone())
}

fn pick_seeds(rects: &[Rect]) -> (usize, usize) {
    let mut worst = (0, 1.min(rects.len() - 1));
    let mut worst_waste = f64::NEG_INFINITY;
    for i in 0..rects.len() {
        for j in i + 1..rects.len() {
            let waste = rects[i].union(&rects[j]).area() - rects[i].area() - rects[j].area();
            if waste > worst_waste {
                worst_waste = waste;
                worst = (i, j);
            }
        }
    }
    worst
}

fn distribute<T>(
    entries: Vec<T>,
    seed_a: usize,
    seed_b: usize,
    rect_of: impl Fn(&T) -> Rect,
) -> (Vec<T>, Vec<T>) {
    let total = entries.len();
    let mut group_a: Vec<T> = Vec::new();
    let mut group_b: Vec<T> = Vec::new();
    let mut bounds_a: Option<Rect> = None;
    let mut bounds_b: Option<Rect> = None;

    for (i, entry) in entries.into_iter().enumerate() {
        let rect = rect_of(&entry);
        let to_a = if i == seed_a {
            true
        } else if i == seed_b {
            false
        } else if group_a.len() + (total - i) <= MIN_ENTRIES {
            // remaining entries must all go to A to satisfy the minimum
            true
        } else if group_b.len() + (total - i) <= MIN_ENTRIES {
            false
        } else {
            let grow_a = growth(&bounds_a, &rect);
            let grow_b = growth(&bounds_b, &rect);
            grow_a <= grow_b
        };
        if to_a {
            bounds_a = Some(union_opt(bounds_a, &rect));
            group_a.push(entry);
        } else {
            bounds_b = Some(union_opt(bounds_b, &rect));
            group_b.push(entry);
        }
    }
    (group_a, group_b)
}

fn growth(bounds: &Option<Rect>, rect: &Rect) -> f64 {
    match bounds {
        Some(b) => b.union(rect).area() - b.area(),
        None => 0.0,
    }
}

fn union_opt(bounds: Option<Rect>, rect: &Rect) -> Rect {
    match bounds {
        Some(b) => b.union(rect),
        None => rect.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(min: &[f64], max: &[f64]) -> Rect {
        Rect::new(min.to_vec(), max.to_vec())
    }

    fn collect_keys(tree: &RTree, query: &Rect) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        tree.search_intersects(query, |_, k| {
            keys.push(k.to_vec());
            true
        });
        keys.sort();
        keys
    }

    #[test]
    fn test_insert_and_search() {
        let mut tree = RTree::new();
        tree.insert(rect(&[10.0, 10.0], &[20.0, 20.0]), b"r1".to_vec());
        tree.insert(rect(&[30.0, 30.0], &[40.0, 40.0]), b"r2".to_vec());

        let hits = collect_keys(&tree, &rect(&[15.0, 15.0], &[35.0, 35.0]));
        assert_eq!(hits, vec![b"r1".to_vec(), b"r2".to_vec()]);

        let hits = collect_keys(&tree, &rect(&[21.0, 21.0], &[29.0, 29.0]));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_split_and_search_many() {
        let mut tree = RTree::new();
        for i in 0..200u32 {
            let x = f64::from(i % 20) * 10.0;
            let y = f64::from(i / 20) * 10.0;
            tree.insert(rect(&[x, y], &[x + 5.0, y + 5.0]), format!("k{i}").into_bytes());
        }
        assert_eq!(tree.len(), 200);

        // whole plane finds everything
        let all = collect_keys(&tree, &Rect::parse("[-inf -inf],[+inf +inf]").unwrap());
        assert_eq!(all.len(), 200);

        // a cell-aligned query finds exactly one
        let one = collect_keys(&tree, &rect(&[101.0, 1.0], &[104.0, 4.0]));
        assert_eq!(one, vec![b"k10".to_vec()]);
    }

    #[test]
    fn test_remove() {
        let mut tree = RTree::new();
        for i in 0..50u32 {
            let x = f64::from(i);
            tree.insert(rect(&[x, x], &[x + 0.5, x + 0.5]), format!("k{i}").into_bytes());
        }
        for i in (0..50u32).step_by(2) {
            let x = f64::from(i);
            assert!(tree.remove(&rect(&[x, x], &[x + 0.5, x + 0.5]), format!("k{i}").as_bytes()));
        }
        assert_eq!(tree.len(), 25);
        let all = collect_keys(&tree, &Rect::parse("[-inf -inf],[+inf +inf]").unwrap());
        assert_eq!(all.len(), 25);
        assert!(all.iter().all(|k| {
            let n: u32 = String::from_utf8_lossy(&k[1..]).parse().unwrap();
            n % 2 == 1
        }));
    }

    #[test]
    fn test_remove_missing() {
        let mut tree = RTree::new();
        tree.insert(rect(&[0.0], &[1.0]), b"a".to_vec());
        assert!(!tree.remove(&rect(&[0.0], &[1.0]), b"b"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_early_exit() {
        let mut tree = RTree::new();
        for i in 0..100u32 {
            tree.insert(rect(&[f64::from(i)], &[f64::from(i)]), format!("k{i}").into_bytes());
        }
        let mut seen = 0;
        tree.search_intersects(&Rect::parse("[-inf],[+inf]").unwrap(), |_, _| {
            seen += 1;
            seen < 10
        });
        assert_eq!(seen, 10);
    }
}
