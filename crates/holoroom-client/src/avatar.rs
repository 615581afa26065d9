//! Procedural humanoid rig with one IK chain per arm.
//!
//! The rig is built in bind pose facing +z with its left arm along +x.
//! Goal nodes hang off the root so hand targets can be written in the
//! root's frame.

use std::fmt;

use glam::{Quat, Vec3};
use holoroom_ik::{solve, IkChain, IkConfig, IkError, IkResult, NodeId, Skeleton, TransformGraph};

use crate::pose_mapping::{GoalUpdate, HandGoalUpdate, HeadGoalUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn prefix(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// Sign of the rig's x axis on this side.
    fn lateral(self) -> f32 {
        match self {
            Side::Left => 1.0,
            Side::Right => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HumanBone {
    Root,
    Spine,
    Chest,
    Neck,
    Head,
    Shoulder(Side),
    UpperArm(Side),
    LowerArm(Side),
    Hand(Side),
}

impl HumanBone {
    pub fn name(self) -> String {
        match self {
            HumanBone::Root => "root".into(),
            HumanBone::Spine => "spine".into(),
            HumanBone::Chest => "chest".into(),
            HumanBone::Neck => "neck".into(),
            HumanBone::Head => "head".into(),
            HumanBone::Shoulder(side) => format!("{}_shoulder", side.prefix()),
            HumanBone::UpperArm(side) => format!("{}_upper_arm", side.prefix()),
            HumanBone::LowerArm(side) => format!("{}_lower_arm", side.prefix()),
            HumanBone::Hand(side) => format!("{}_hand", side.prefix()),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let bone = match name {
            "root" => HumanBone::Root,
            "spine" => HumanBone::Spine,
            "chest" => HumanBone::Chest,
            "neck" => HumanBone::Neck,
            "head" => HumanBone::Head,
            _ => {
                let (prefix, rest) = name.split_once('_')?;
                let side = match prefix {
                    "left" => Side::Left,
                    "right" => Side::Right,
                    _ => return None,
                };
                match rest {
                    "shoulder" => HumanBone::Shoulder(side),
                    "upper_arm" => HumanBone::UpperArm(side),
                    "lower_arm" => HumanBone::LowerArm(side),
                    "hand" => HumanBone::Hand(side),
                    _ => return None,
                }
            }
        };
        Some(bone)
    }
}

impl fmt::Display for HumanBone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone)]
struct RigChain {
    effector: HumanBone,
    chain: IkChain,
}

#[derive(Debug, Clone)]
pub struct AvatarRig {
    skeleton: Skeleton,
    root: NodeId,
    head: NodeId,
    chains: Vec<RigChain>,
    head_offset: Vec3,
    iterations: u32,
}

impl AvatarRig {
    /// Builds the humanoid skeleton and the chains described by `config`.
    ///
    /// Every chain must end at a hand bone; that bone decides which hand
    /// goal drives it.
    pub fn humanoid(config: &IkConfig) -> IkResult<Self> {
        let mut skeleton = Skeleton::new();
        let root = skeleton.add_node(HumanBone::Root.name(), None, Vec3::ZERO)?;
        let spine = skeleton.add_node(HumanBone::Spine.name(), Some(root), Vec3::new(0.0, 1.0, 0.0))?;
        let chest = skeleton.add_node(HumanBone::Chest.name(), Some(spine), Vec3::new(0.0, 0.25, 0.0))?;
        let neck = skeleton.add_node(HumanBone::Neck.name(), Some(chest), Vec3::new(0.0, 0.2, 0.0))?;
        let head = skeleton.add_node(HumanBone::Head.name(), Some(neck), Vec3::new(0.0, 0.1, 0.0))?;

        for side in [Side::Left, Side::Right] {
            let x = side.lateral();
            let shoulder = skeleton.add_node(
                HumanBone::Shoulder(side).name(),
                Some(chest),
                Vec3::new(0.05 * x, 0.15, 0.0),
            )?;
            let upper = skeleton.add_node(
                HumanBone::UpperArm(side).name(),
                Some(shoulder),
                Vec3::new(0.1 * x, 0.0, 0.0),
            )?;
            let lower = skeleton.add_node(
                HumanBone::LowerArm(side).name(),
                Some(upper),
                Vec3::new(0.28 * x, 0.0, 0.0),
            )?;
            skeleton.add_node(
                HumanBone::Hand(side).name(),
                Some(lower),
                Vec3::new(0.26 * x, 0.0, 0.0),
            )?;
        }

        let mut chains = Vec::with_capacity(config.chains.len());
        for chain_config in &config.chains {
            let effector = match HumanBone::from_name(&chain_config.effector) {
                Some(bone @ HumanBone::Hand(_)) => bone,
                _ => return Err(IkError::UnknownNode(chain_config.effector.clone())),
            };
            let effector_node = skeleton
                .find(&chain_config.effector)
                .ok_or_else(|| IkError::UnknownNode(chain_config.effector.clone()))?;
            let rest = skeleton.world_transform(effector_node).position;
            let goal = skeleton.add_node(format!("{effector}_goal"), Some(root), rest)?;
            chains.push(RigChain {
                effector,
                chain: chain_config.build(&skeleton, goal)?,
            });
        }

        let head_offset = skeleton.world_transform(head).position
            - skeleton.world_transform(root).position;

        Ok(Self {
            skeleton,
            root,
            head,
            chains,
            head_offset,
            iterations: config.iterations,
        })
    }

    /// Head position relative to the root in bind pose.
    pub fn head_offset(&self) -> Vec3 {
        self.head_offset
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn set_iterations(&mut self, iterations: u32) {
        self.iterations = iterations;
    }

    pub fn root_position(&self) -> Vec3 {
        self.skeleton.world_transform(self.root).position
    }

    pub fn root_rotation(&self) -> Quat {
        self.skeleton.world_transform(self.root).orientation
    }

    pub fn set_root(&mut self, position: Vec3, rotation: Quat) {
        self.skeleton.set_local_transform(self.root, position, rotation);
    }

    /// Local rotation of the head joint.
    pub fn head_rotation(&self) -> Quat {
        self.skeleton.local_orientation(self.head)
    }

    pub fn set_head_rotation(&mut self, rotation: Quat) {
        self.skeleton.set_local_orientation(self.head, rotation);
        self.skeleton.propagate(self.head);
    }

    /// Places the hand goal of `side` in the root's frame. Returns `false`
    /// when no chain ends at that hand.
    pub fn set_hand_goal(&mut self, side: Side, position: Vec3, orientation: Quat) -> bool {
        let Some(goal) = self
            .chains
            .iter()
            .find(|c| c.effector == HumanBone::Hand(side))
            .map(|c| c.chain.goal())
        else {
            return false;
        };
        self.skeleton.set_local_transform(goal, position, orientation);
        true
    }

    pub fn apply(&mut self, update: &GoalUpdate) {
        match update {
            GoalUpdate::Head(HeadGoalUpdate {
                root_position,
                root_rotation,
                head_rotation,
            }) => {
                self.set_root(*root_position, *root_rotation);
                self.set_head_rotation(*head_rotation);
            }
            GoalUpdate::Hand(HandGoalUpdate {
                side,
                local_position,
                local_orientation,
            }) => {
                self.set_hand_goal(*side, *local_position, *local_orientation);
            }
        }
    }

    /// Runs every chain once with the rig's iteration budget.
    pub fn solve(&mut self) {
        for rig_chain in &self.chains {
            solve(&mut self.skeleton, &rig_chain.chain, self.iterations);
        }
    }

    pub fn world_position(&self, bone: HumanBone) -> Option<Vec3> {
        let node = self.skeleton.find(&bone.name())?;
        Some(self.skeleton.world_transform(node).position)
    }

    pub fn world_rotation(&self, bone: HumanBone) -> Option<Quat> {
        let node = self.skeleton.find(&bone.name())?;
        Some(self.skeleton.world_transform(node).orientation)
    }

    /// World position of the goal driving the hand of `side`.
    pub fn hand_goal_position(&self, side: Side) -> Option<Vec3> {
        self.chains
            .iter()
            .find(|c| c.effector == HumanBone::Hand(side))
            .map(|c| self.skeleton.world_transform(c.chain.goal()).position)
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holoroom_ik::ChainConfig;

    fn rig() -> AvatarRig {
        AvatarRig::humanoid(&IkConfig::default()).unwrap()
    }

    #[test]
    fn test_bone_names_round_trip() {
        for side in [Side::Left, Side::Right] {
            for bone in [
                HumanBone::Shoulder(side),
                HumanBone::UpperArm(side),
                HumanBone::LowerArm(side),
                HumanBone::Hand(side),
            ] {
                assert_eq!(HumanBone::from_name(&bone.name()), Some(bone));
            }
        }
        assert_eq!(HumanBone::from_name("head"), Some(HumanBone::Head));
        assert_eq!(HumanBone::from_name("left_tail"), None);
    }

    #[test]
    fn test_bind_pose() {
        let rig = rig();
        assert!((rig.head_offset() - Vec3::new(0.0, 1.55, 0.0)).length() < 1e-5);

        let left = rig.world_position(HumanBone::Hand(Side::Left)).unwrap();
        let right = rig.world_position(HumanBone::Hand(Side::Right)).unwrap();
        assert!(left.x > 0.6 && right.x < -0.6);
        let goal = rig.hand_goal_position(Side::Left).unwrap();
        assert!((goal - left).length() < 1e-6);
    }

    #[test]
    fn test_chain_must_end_at_a_hand() {
        let mut config = IkConfig::default();
        config.chains = vec![ChainConfig {
            joints: Vec::new(),
            effector: "head".into(),
        }];
        assert!(matches!(
            AvatarRig::humanoid(&config),
            Err(IkError::UnknownNode(name)) if name == "head"
        ));
    }

    #[test]
    fn test_hand_goal_is_reached_after_turning() {
        let mut rig = rig();
        rig.set_iterations(50);
        rig.set_root(Vec3::new(1.0, 0.0, 2.0), Quat::from_rotation_y(0.5));

        let local_goal = Vec3::new(0.35, 1.1, 0.3);
        assert!(rig.set_hand_goal(Side::Left, local_goal, Quat::IDENTITY));
        rig.solve();

        let goal = rig.hand_goal_position(Side::Left).unwrap();
        let expected = Vec3::new(1.0, 0.0, 2.0) + Quat::from_rotation_y(0.5) * local_goal;
        assert!((goal - expected).length() < 1e-4);

        let hand = rig.world_position(HumanBone::Hand(Side::Left)).unwrap();
        assert!((hand - goal).length() < 0.1, "hand {hand} goal {goal}");
    }

    #[test]
    fn test_head_rotation_leaves_root_alone() {
        let mut rig = rig();
        rig.set_head_rotation(Quat::from_rotation_x(0.4));
        assert_eq!(rig.root_rotation(), Quat::IDENTITY);
        let head = rig.world_rotation(HumanBone::Head).unwrap();
        assert!(head.angle_between(Quat::from_rotation_x(0.4)) < 1e-5);
    }
}
