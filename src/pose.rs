//! Pose data model
//!
//! Keypoints follow the 17-part PoseNet layout. Positions are stored in pixel
//! space of the frame the pose was estimated on.

/// Body part labels in PoseNet output order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartName {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

/// Number of keypoints in a pose
pub const NUM_KEYPOINTS: usize = 17;

impl PartName {
    /// All parts, indexed the same way as [`Pose::keypoints`]
    pub const ALL: [PartName; NUM_KEYPOINTS] = [
        PartName::Nose,
        PartName::LeftEye,
        PartName::RightEye,
        PartName::LeftEar,
        PartName::RightEar,
        PartName::LeftShoulder,
        PartName::RightShoulder,
        PartName::LeftElbow,
        PartName::RightElbow,
        PartName::LeftWrist,
        PartName::RightWrist,
        PartName::LeftHip,
        PartName::RightHip,
        PartName::LeftKnee,
        PartName::RightKnee,
        PartName::LeftAnkle,
        PartName::RightAnkle,
    ];

    /// Position of this part in a pose's keypoint array
    pub fn index(self) -> usize {
        self as usize
    }

    /// camelCase label as used by PoseNet
    pub fn label(self) -> &'static str {
        match self {
            PartName::Nose => "nose",
            PartName::LeftEye => "leftEye",
            PartName::RightEye => "rightEye",
            PartName::LeftEar => "leftEar",
            PartName::RightEar => "rightEar",
            PartName::LeftShoulder => "leftShoulder",
            PartName::RightShoulder => "rightShoulder",
            PartName::LeftElbow => "leftElbow",
            PartName::RightElbow => "rightElbow",
            PartName::LeftWrist => "leftWrist",
            PartName::RightWrist => "rightWrist",
            PartName::LeftHip => "leftHip",
            PartName::RightHip => "rightHip",
            PartName::LeftKnee => "leftKnee",
            PartName::RightKnee => "rightKnee",
            PartName::LeftAnkle => "leftAnkle",
            PartName::RightAnkle => "rightAnkle",
        }
    }
}

/// Anatomically connected parts forming the skeleton
pub const CONNECTED_PARTS: [(PartName, PartName); 12] = [
    (PartName::LeftHip, PartName::LeftShoulder),
    (PartName::LeftElbow, PartName::LeftShoulder),
    (PartName::LeftElbow, PartName::LeftWrist),
    (PartName::LeftHip, PartName::LeftKnee),
    (PartName::LeftKnee, PartName::LeftAnkle),
    (PartName::RightHip, PartName::RightShoulder),
    (PartName::RightElbow, PartName::RightShoulder),
    (PartName::RightElbow, PartName::RightWrist),
    (PartName::RightHip, PartName::RightKnee),
    (PartName::RightKnee, PartName::RightAnkle),
    (PartName::LeftShoulder, PartName::RightShoulder),
    (PartName::LeftHip, PartName::RightHip),
];

/// Pixel position, stored (y, x) like the model output
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub y: f32,
    pub x: f32,
}

impl Position {
    pub fn new(y: f32, x: f32) -> Self {
        Self { y, x }
    }
}

/// A detected anatomical landmark
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub position: Position,
    /// Confidence in [0, 1]
    pub score: f32,
    pub part: PartName,
}

impl Keypoint {
    pub fn new(part: PartName, y: f32, x: f32, score: f32) -> Self {
        Self {
            position: Position::new(y, x),
            score,
            part,
        }
    }
}

/// All keypoints of one detected person
#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    pub keypoints: [Keypoint; NUM_KEYPOINTS],
    pub score: f32,
}

impl Pose {
    /// Pose with every keypoint at the origin and zero confidence
    pub fn empty() -> Self {
        Self {
            keypoints: PartName::ALL.map(|part| Keypoint::new(part, 0.0, 0.0, 0.0)),
            score: 0.0,
        }
    }

    pub fn keypoint(&self, part: PartName) -> &Keypoint {
        &self.keypoints[part.index()]
    }

    pub fn keypoint_mut(&mut self, part: PartName) -> &mut Keypoint {
        &mut self.keypoints[part.index()]
    }
}

/// Axis-aligned box around a set of keypoints
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

/// Mirror a pose horizontally for a frame `image_width` pixels wide.
///
/// Keypoint order is preserved, so after flipping the "left" parts sit on the
/// canvas side a mirror would show them on.
pub fn flip_pose_horizontal(pose: &Pose, image_width: u32) -> Pose {
    let mut flipped = pose.clone();
    for keypoint in flipped.keypoints.iter_mut() {
        keypoint.position.x = image_width as f32 - 1.0 - keypoint.position.x;
    }
    flipped
}

/// Pairs of connected keypoints where both ends reach `min_confidence`
pub fn adjacent_keypoints(keypoints: &[Keypoint], min_confidence: f32) -> Vec<(Keypoint, Keypoint)> {
    CONNECTED_PARTS
        .iter()
        .filter_map(|&(a, b)| {
            let ka = keypoints.get(a.index())?;
            let kb = keypoints.get(b.index())?;
            (ka.score >= min_confidence && kb.score >= min_confidence).then_some((*ka, *kb))
        })
        .collect()
}

/// Bounding box of all keypoints, or `None` for an empty slice
pub fn bounding_box(keypoints: &[Keypoint]) -> Option<BoundingBox> {
    let first = keypoints.first()?;
    let init = BoundingBox {
        min_x: first.position.x,
        min_y: first.position.y,
        max_x: first.position.x,
        max_y: first.position.y,
    };
    Some(keypoints.iter().fold(init, |b, k| BoundingBox {
        min_x: b.min_x.min(k.position.x),
        min_y: b.min_y.min(k.position.y),
        max_x: b.max_x.max(k.position.x),
        max_y: b.max_y.max(k.position.y),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confident_pose() -> Pose {
        let mut pose = Pose::empty();
        for (i, kp) in pose.keypoints.iter_mut().enumerate() {
            kp.position = Position::new(10.0 * i as f32, 5.0 * i as f32);
            kp.score = 0.9;
        }
        pose
    }

    #[test]
    fn test_part_order_matches_indices() {
        for (i, part) in PartName::ALL.iter().enumerate() {
            assert_eq!(part.index(), i);
        }
        assert_eq!(PartName::LeftEye.index(), 1);
        assert_eq!(PartName::RightEye.index(), 2);
        assert_eq!(PartName::RightAnkle.label(), "rightAnkle");
    }

    #[test]
    fn test_adjacent_keypoints_all_confident() {
        let pose = confident_pose();
        let pairs = adjacent_keypoints(&pose.keypoints, 0.5);
        assert_eq!(pairs.len(), CONNECTED_PARTS.len());
    }

    #[test]
    fn test_adjacent_keypoints_threshold_is_inclusive() {
        let mut pose = confident_pose();
        pose.keypoint_mut(PartName::LeftWrist).score = 0.5;
        pose.keypoint_mut(PartName::RightWrist).score = 0.49;
        let pairs = adjacent_keypoints(&pose.keypoints, 0.5);

        // Only the right elbow-wrist pair drops out
        assert_eq!(pairs.len(), CONNECTED_PARTS.len() - 1);
        assert!(pairs
            .iter()
            .all(|(a, b)| a.part != PartName::RightWrist && b.part != PartName::RightWrist));
    }

    #[test]
    fn test_adjacent_keypoints_short_slice() {
        let pose = confident_pose();
        assert!(adjacent_keypoints(&pose.keypoints[..3], 0.0).is_empty());
    }

    #[test]
    fn test_flip_pose_horizontal() {
        let mut pose = Pose::empty();
        pose.keypoint_mut(PartName::LeftEye).position = Position::new(100.0, 70.0);
        pose.keypoint_mut(PartName::RightEye).position = Position::new(100.0, 50.0);

        let flipped = flip_pose_horizontal(&pose, 640);
        assert_eq!(flipped.keypoint(PartName::LeftEye).position, Position::new(100.0, 569.0));
        assert_eq!(flipped.keypoint(PartName::RightEye).position, Position::new(100.0, 589.0));
        assert_eq!(flipped.keypoint(PartName::LeftEye).part, PartName::LeftEye);
    }

    #[test]
    fn test_bounding_box() {
        let pose = confident_pose();
        let bbox = bounding_box(&pose.keypoints).unwrap();
        assert_eq!(bbox.min_x, 0.0);
        assert_eq!(bbox.min_y, 0.0);
        assert_eq!(bbox.max_x, 80.0);
        assert_eq!(bbox.max_y, 160.0);
        assert_eq!(bbox.width(), 80.0);
        assert!(bounding_box(&[]).is_none());
    }
}
