//! Point quadtree over token centers.
//!
//! Rebuilt from scratch at the start of every batch. Tokens move constantly,
//! so an incrementally maintained tree would spend more time rebalancing than
//! a rebuild costs, and a fresh tree per batch keeps queries consistent with
//! the positions the batch actually evaluates.

use bevy::math::{Rect, Vec2};
use bevy::prelude::{Entity, Resource};

pub const DEFAULT_MAX_DEPTH: usize = 8;
pub const DEFAULT_NODE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy)]
struct TreeEntry {
    entity: Entity,
    position: Vec2,
}

#[derive(Debug)]
struct Node {
    bounds: Rect,
    depth: usize,
    entries: Vec<TreeEntry>,
    children: Option<Box<[Node; 4]>>,
}

impl Node {
    fn new(bounds: Rect, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            entries: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, entry: TreeEntry, max_depth: usize, node_capacity: usize) {
        if let Some(children) = self.children.as_mut() {
            let index = quadrant_index(&self.bounds, entry.position);
            children[index].insert(entry, max_depth, node_capacity);
            return;
        }

        self.entries.push(entry);

        if self.entries.len() > node_capacity && self.depth < max_depth {
            self.subdivide(max_depth, node_capacity);
        }
    }

    fn subdivide(&mut self, max_depth: usize, node_capacity: usize) {
        let center = self.bounds.center();
        let min = self.bounds.min;
        let max = self.bounds.max;
        let depth = self.depth + 1;
        let children = Box::new([
            Node::new(Rect::from_corners(min, center), depth),
            Node::new(
                Rect::from_corners(Vec2::new(center.x, min.y), Vec2::new(max.x, center.y)),
                depth,
            ),
            Node::new(
                Rect::from_corners(Vec2::new(min.x, center.y), Vec2::new(center.x, max.y)),
                depth,
            ),
            Node::new(Rect::from_corners(center, max), depth),
        ]);
        self.children = Some(children);

        let entries = std::mem::take(&mut self.entries);
        for entry in entries {
            let index = quadrant_index(&self.bounds, entry.position);
            if let Some(children) = self.children.as_mut() {
                children[index].insert(entry, max_depth, node_capacity);
            }
        }
    }

    fn query_circle(&self, center: Vec2, radius: f32, out: &mut Vec<Entity>) {
        if !circle_overlaps_rect(center, radius, &self.bounds) {
            return;
        }
        let radius_sq = radius * radius;
        for entry in &self.entries {
            if entry.position.distance_squared(center) <= radius_sq {
                out.push(entry.entity);
            }
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.query_circle(center, radius, out);
            }
        }
    }
}

/// Index of the quadrant containing `point`: 0 bottom-left, 1 bottom-right,
/// 2 top-left, 3 top-right. Points on a split line go to the higher quadrant.
fn quadrant_index(bounds: &Rect, point: Vec2) -> usize {
    let center = bounds.center();
    let right = usize::from(point.x >= center.x);
    let top = usize::from(point.y >= center.y);
    top * 2 + right
}

fn circle_overlaps_rect(center: Vec2, radius: f32, rect: &Rect) -> bool {
    let closest = center.clamp(rect.min, rect.max);
    closest.distance_squared(center) <= radius * radius
}

/// Spatial index over the current batch universe.
#[derive(Resource, Debug)]
pub struct SpatialIndex {
    max_depth: usize,
    node_capacity: usize,
    root: Option<Node>,
    /// Entries whose position fell outside the scene bounds. Rare, but hosts
    /// do park tokens off-canvas; they stay queryable via a linear sweep.
    strays: Vec<TreeEntry>,
    count: usize,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_NODE_CAPACITY)
    }
}

impl SpatialIndex {
    pub fn new(max_depth: usize, node_capacity: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            node_capacity: node_capacity.max(1),
            root: None,
            strays: Vec::new(),
            count: 0,
        }
    }

    /// Throws away the previous tree and builds a new one over `bounds`.
    pub fn rebuild(&mut self, bounds: Rect, entries: impl IntoIterator<Item = (Entity, Vec2)>) {
        let mut root = Node::new(bounds, 0);
        self.strays.clear();
        self.count = 0;
        for (entity, position) in entries {
            let entry = TreeEntry { entity, position };
            self.count += 1;
            if bounds.contains(position) {
                root.insert(entry, self.max_depth, self.node_capacity);
            } else {
                self.strays.push(entry);
            }
        }
        self.root = Some(root);
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.strays.clear();
        self.count = 0;
    }

    /// Entities whose center lies within `radius_px` of `center`, inclusive.
    pub fn query_circle(&self, center: Vec2, radius_px: f32) -> Vec<Entity> {
        if !radius_px.is_finite() {
            return self.all();
        }
        let radius = radius_px.max(0.0);
        let mut out = Vec::new();
        if let Some(root) = self.root.as_ref() {
            root.query_circle(center, radius, &mut out);
        }
        let radius_sq = radius * radius;
        for entry in &self.strays {
            if entry.position.distance_squared(center) <= radius_sq {
                out.push(entry.entity);
            }
        }
        out
    }

    pub fn all(&self) -> Vec<Entity> {
        let mut out = Vec::with_capacity(self.count);
        if let Some(root) = self.root.as_ref() {
            collect_all(root, &mut out);
        }
        out.extend(self.strays.iter().map(|entry| entry.entity));
        out
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn collect_all(node: &Node, out: &mut Vec<Entity>) {
    out.extend(node.entries.iter().map(|entry| entry.entity));
    if let Some(children) = node.children.as_ref() {
        for child in children.iter() {
            collect_all(child, out);
        }
    }
}
