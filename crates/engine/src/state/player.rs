use std::cell::Cell;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Self) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Moves toward `target` by at most `max_step`, landing exactly on it
    /// when it is within reach.
    pub fn move_towards(self, target: Self, max_step: f32) -> Self {
        let distance = self.distance(target);
        if distance <= max_step || distance <= f32::EPSILON {
            return target;
        }
        let t = max_step / distance;
        Self {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            z: self.z + (target.z - self.z) * t,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlayerTransform {
    position: Cell<Vec3>,
}

impl PlayerTransform {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: Cell::new(position),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    pub fn teleport_to(&self, position: Vec3) {
        self.position.set(position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_towards_snaps_when_in_reach() {
        let start = Vec3::new(0.0, 0.0, 0.0);
        let target = Vec3::new(3.0, 0.0, 4.0);

        let step = start.move_towards(target, 2.5);
        assert!((step.distance(target) - 2.5).abs() < 1e-5);
        assert_eq!(step.move_towards(target, 2.5), target);
    }
}
