//! Transform arena.
//!
//! Nodes are addressed by [`NodeId`] handles and stored in insertion order.
//! A parent is always inserted before its children, so a forward walk over
//! the arena visits every parent before the nodes that hang off it.

use std::fmt;

use glam::{Quat, Vec3};

use crate::{IkError, IkResult};

/// Handle into a transform arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// World-space position and orientation of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldTransform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl WorldTransform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    /// Maps a point given in this frame's local space into world space.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.orientation * local
    }

    /// Maps a world-space point into this frame's local space.
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse() * (world - self.position)
    }

    /// Composes a child transform expressed relative to this frame.
    pub fn compose(&self, translation: Vec3, rotation: Quat) -> Self {
        Self {
            position: self.transform_point(translation),
            orientation: (self.orientation * rotation).normalize(),
        }
    }
}

impl Default for WorldTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Minimal transform interface the solver and pose mapping operate on.
pub trait TransformGraph {
    fn contains(&self, node: NodeId) -> bool;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Cached world transform, valid as of the last [`propagate`](Self::propagate)
    /// covering this node.
    fn world_transform(&self, node: NodeId) -> WorldTransform;

    fn local_orientation(&self, node: NodeId) -> Quat;

    /// Replaces the node's local orientation. World transforms are not
    /// refreshed until [`propagate`](Self::propagate) runs.
    fn set_local_orientation(&mut self, node: NodeId, orientation: Quat);

    /// Recomputes the world transforms of `node` and all of its descendants.
    fn propagate(&mut self, node: NodeId);

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = self.parent(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    translation: Vec3,
    rotation: Quat,
    world: WorldTransform,
}

/// Arena of named transform nodes.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    nodes: Vec<Node>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node with an identity local rotation and returns its handle.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeId>,
        translation: Vec3,
    ) -> IkResult<NodeId> {
        let name = name.into();
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(IkError::UnknownNode(parent.to_string()));
            }
        }

        let id = NodeId(self.nodes.len() as u32);
        let parent_world = parent
            .map(|p| self.nodes[p.index()].world)
            .unwrap_or(WorldTransform::IDENTITY);
        self.nodes.push(Node {
            name,
            parent,
            children: Vec::new(),
            translation,
            rotation: Quat::IDENTITY,
            world: parent_world.compose(translation, Quat::IDENTITY),
        });
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(id);
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(|index| NodeId(index as u32))
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.index()).map(|n| n.name.as_str())
    }

    pub fn local_translation(&self, node: NodeId) -> Vec3 {
        self.nodes
            .get(node.index())
            .map(|n| n.translation)
            .unwrap_or(Vec3::ZERO)
    }

    pub fn set_local_translation(&mut self, node: NodeId, translation: Vec3) {
        if let Some(n) = self.nodes.get_mut(node.index()) {
            n.translation = translation;
        }
    }

    /// Sets translation and rotation together and refreshes the subtree.
    pub fn set_local_transform(&mut self, node: NodeId, translation: Vec3, rotation: Quat) {
        if let Some(n) = self.nodes.get_mut(node.index()) {
            n.translation = translation;
            n.rotation = rotation.normalize();
        }
        self.propagate(node);
    }

    /// Recomputes every cached world transform.
    pub fn update_world(&mut self) {
        for index in 0..self.nodes.len() {
            self.refresh(index);
        }
    }

    fn refresh(&mut self, index: usize) {
        let parent_world = self.nodes[index]
            .parent
            .map(|p| self.nodes[p.index()].world)
            .unwrap_or(WorldTransform::IDENTITY);
        let node = &mut self.nodes[index];
        node.world = parent_world.compose(node.translation, node.rotation);
    }
}

impl TransformGraph for Skeleton {
    fn contains(&self, node: NodeId) -> bool {
        node.index() < self.nodes.len()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.index()).and_then(|n| n.parent)
    }

    fn world_transform(&self, node: NodeId) -> WorldTransform {
        self.nodes
            .get(node.index())
            .map(|n| n.world)
            .unwrap_or(WorldTransform::IDENTITY)
    }

    fn local_orientation(&self, node: NodeId) -> Quat {
        self.nodes
            .get(node.index())
            .map(|n| n.rotation)
            .unwrap_or(Quat::IDENTITY)
    }

    fn set_local_orientation(&mut self, node: NodeId, orientation: Quat) {
        if let Some(n) = self.nodes.get_mut(node.index()) {
            n.rotation = orientation.normalize();
        }
    }

    fn propagate(&mut self, node: NodeId) {
        if !self.contains(node) {
            return;
        }
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            self.refresh(current.index());
            stack.extend(self.nodes[current.index()].children.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_world_positions_follow_parent_rotation() {
        let mut skeleton = Skeleton::new();
        let root = skeleton.add_node("root", None, Vec3::ZERO).unwrap();
        let arm = skeleton.add_node("arm", Some(root), Vec3::Y).unwrap();
        let hand = skeleton.add_node("hand", Some(arm), Vec3::Y).unwrap();

        assert!(approx(skeleton.world_transform(hand).position, Vec3::new(0.0, 2.0, 0.0)));

        skeleton.set_local_orientation(arm, Quat::from_rotation_z(-FRAC_PI_2));
        // stale until propagated
        assert!(approx(skeleton.world_transform(hand).position, Vec3::new(0.0, 2.0, 0.0)));

        skeleton.propagate(arm);
        assert!(approx(skeleton.world_transform(hand).position, Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn test_add_node_rejects_unknown_parent() {
        let mut skeleton = Skeleton::new();
        let result = skeleton.add_node("orphan", Some(NodeId(7)), Vec3::ZERO);
        assert!(matches!(result, Err(IkError::UnknownNode(_))));
    }

    #[test]
    fn test_find_and_ancestry() {
        let mut skeleton = Skeleton::new();
        let root = skeleton.add_node("root", None, Vec3::ZERO).unwrap();
        let a = skeleton.add_node("a", Some(root), Vec3::X).unwrap();
        let b = skeleton.add_node("b", Some(root), Vec3::NEG_X).unwrap();

        assert_eq!(skeleton.find("b"), Some(b));
        assert_eq!(skeleton.find("missing"), None);
        assert!(skeleton.is_ancestor(root, a));
        assert!(!skeleton.is_ancestor(a, b));
        assert!(!skeleton.is_ancestor(a, a));
    }

    #[test]
    fn test_inverse_transform_point_roundtrip() {
        let frame = WorldTransform {
            position: Vec3::new(1.0, 2.0, 3.0),
            orientation: Quat::from_rotation_y(0.7),
        };
        let p = Vec3::new(-0.5, 0.25, 4.0);
        assert!(approx(frame.transform_point(frame.inverse_transform_point(p)), p));
    }
}
